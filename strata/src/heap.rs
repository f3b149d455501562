//! The table heap: a forward-linked chain of data pages holding one
//! table's tuple versions.

use std::sync::Arc;

use crate::buffer_pool::BufferPoolManager;
use crate::error::StorageError;
use crate::page::PAGE_TYPE_DATA;
use crate::tuple::{encode_row_id, Tuple};
use crate::{PageId, Result, INVALID_PAGE_ID};

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    table_id: u32,
    first_page: PageId,
    last_page: PageId,
}

/// A tuple paired with its physical location.
#[derive(Debug, Clone)]
pub struct TupleWithRid {
    pub tuple: Tuple,
    pub page_id: PageId,
    pub slot_num: u16,
}

impl TableHeap {
    /// Creates a heap with one freshly allocated page.
    pub fn create(bpm: Arc<BufferPoolManager>, table_id: u32) -> Result<Self> {
        let first = bpm.new_page(PAGE_TYPE_DATA)?.page_id();
        Ok(TableHeap {
            bpm,
            table_id,
            first_page: first,
            last_page: first,
        })
    }

    /// Rebinds to an existing page chain from the catalog.
    pub fn load(
        bpm: Arc<BufferPoolManager>,
        table_id: u32,
        first_page: PageId,
        last_page: PageId,
    ) -> Self {
        TableHeap {
            bpm,
            table_id,
            first_page,
            last_page,
        }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    pub fn last_page(&self) -> PageId {
        self.last_page
    }

    /// Places the tuple, following the chain past full pages and growing it
    /// when the end is reached. The tuple's row id is rewritten in place to
    /// its final location before that location is returned.
    pub fn insert(&mut self, tuple: &mut Tuple) -> Result<(PageId, u16)> {
        let data = tuple.serialize();
        let mut current = self.last_page;

        loop {
            let guard = self.bpm.fetch(current)?;
            let insert_result = guard.write().insert_tuple(&data);
            match insert_result {
                Ok(slot_num) => {
                    tuple.row_id = encode_row_id(current, slot_num);
                    guard.write().update_tuple(slot_num, &tuple.serialize())?;
                    self.last_page = current;
                    return Ok((current, slot_num));
                }
                Err(StorageError::PageFull) => {
                    let next = guard.read().next_page_id();
                    if next != INVALID_PAGE_ID {
                        // The catalog's last-page hint can lag behind the
                        // chain after a crash; keep walking.
                        current = next;
                        continue;
                    }
                    let new_guard = self.bpm.new_page(PAGE_TYPE_DATA)?;
                    let new_id = new_guard.page_id();
                    guard.write().set_next_page_id(new_id);
                    drop(new_guard);
                    // The link is not logged; persist it now so recovery can
                    // reach tuples replayed onto the new page.
                    self.bpm.flush(current)?;
                    current = new_id;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get(&self, page_id: PageId, slot_num: u16) -> Result<Tuple> {
        let guard = self.bpm.fetch(page_id)?;
        let data = guard.read().get_tuple(slot_num)?;
        Tuple::deserialize(&data)
    }

    pub fn update(&self, page_id: PageId, slot_num: u16, tuple: &Tuple) -> Result<()> {
        let guard = self.bpm.fetch(page_id)?;
        let mut page = guard.write();
        page.update_tuple(slot_num, &tuple.serialize())
    }

    /// Tombstones the slot holding the version.
    pub fn delete(&self, page_id: PageId, slot_num: u16) -> Result<()> {
        let guard = self.bpm.fetch(page_id)?;
        let mut page = guard.write();
        page.delete_tuple(slot_num)
    }

    /// Walks the chain from the first page, emitting every live version
    /// with its location. One page is pinned at a time.
    pub fn scan(&self) -> Result<Vec<TupleWithRid>> {
        let mut results = Vec::new();
        let mut current = self.first_page;

        while current != INVALID_PAGE_ID {
            let guard = self.bpm.fetch(current)?;
            let page = guard.read();
            for (slot_num, data) in page.live_tuples() {
                let tuple = Tuple::deserialize(&data)?;
                results.push(TupleWithRid {
                    tuple,
                    page_id: current,
                    slot_num,
                });
            }
            let next = page.next_page_id();
            drop(page);
            drop(guard);
            current = next;
        }

        Ok(results)
    }
}
