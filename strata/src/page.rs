//! The slotted page layout.
//!
//! Layout:
//!
//! ```text
//! +--------------------+
//! | Header (28 bytes)  |
//! +--------------------+
//! | Slot directory  -> |
//! +--------------------+
//! | Free space         |
//! +--------------------+
//! | <-  Tuple payloads |
//! +--------------------+
//! ```
//!
//! Header format:
//!   PageID (4) + PageType (1) + Reserved (3) + LSN (8) +
//!   SlotCount (2) + FreeSpaceBegin (2) + FreeSpaceEnd (2) +
//!   NextPageID (4) + Reserved (2)
//!
//! The slot directory grows forward from the header, tuple payloads grow
//! backward from the tail. A slot is 4 bytes: payload offset (2) + payload
//! length (2); length 0 tombstones the slot and its number is never reused.

use crate::error::StorageError;
use crate::{Lsn, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};

pub const PAGE_HEADER_SIZE: usize = 28;

pub const PAGE_TYPE_DATA: u8 = 1;
pub const PAGE_TYPE_BTREE: u8 = 2;
pub const PAGE_TYPE_CATALOG: u8 = 3;

const SLOT_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub page_type: u8,
    pub is_dirty: bool,
    pub data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new(id: PageId, page_type: u8) -> Self {
        let mut page = Page {
            id,
            page_type,
            is_dirty: false,
            data: Box::new([0; PAGE_SIZE]),
        };
        page.init();
        page
    }

    fn init(&mut self) {
        self.data.fill(0);
        self.data[0..4].copy_from_slice(&self.id.to_le_bytes());
        self.data[4] = self.page_type;
        self.data[8..16].copy_from_slice(&0u64.to_le_bytes());
        self.set_slot_count(0);
        self.set_free_space_begin(PAGE_HEADER_SIZE as u16);
        self.set_free_space_end(PAGE_SIZE as u16);
        self.data[22..26].copy_from_slice(&INVALID_PAGE_ID.to_le_bytes());
    }

    /// Rebuilds a page from a raw on-disk image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::Corruption(format!(
                "page image is {} bytes, expected {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        let id = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let page_type = data[4];
        Ok(Page {
            id,
            page_type,
            is_dirty: false,
            data,
        })
    }

    /// The raw on-disk image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    // Header accessors.

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.data[16..18].try_into().unwrap())
    }

    fn set_slot_count(&mut self, count: u16) {
        self.data[16..18].copy_from_slice(&count.to_le_bytes());
    }

    pub fn free_space_begin(&self) -> u16 {
        u16::from_le_bytes(self.data[18..20].try_into().unwrap())
    }

    fn set_free_space_begin(&mut self, begin: u16) {
        self.data[18..20].copy_from_slice(&begin.to_le_bytes());
    }

    pub fn free_space_end(&self) -> u16 {
        u16::from_le_bytes(self.data[20..22].try_into().unwrap())
    }

    fn set_free_space_end(&mut self, end: u16) {
        self.data[20..22].copy_from_slice(&end.to_le_bytes());
    }

    pub fn lsn(&self) -> Lsn {
        u64::from_le_bytes(self.data[8..16].try_into().unwrap())
    }

    /// The page LSN changes only through this call; the slotted-page
    /// mutators below never touch it.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[8..16].copy_from_slice(&lsn.to_le_bytes());
    }

    pub fn next_page_id(&self) -> PageId {
        u32::from_le_bytes(self.data[22..26].try_into().unwrap())
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        self.data[22..26].copy_from_slice(&next.to_le_bytes());
        self.is_dirty = true;
    }

    // Slot directory. Slot i lives at PAGE_HEADER_SIZE + 4*i.

    fn slot(&self, slot_num: u16) -> (u16, u16) {
        let pos = PAGE_HEADER_SIZE + slot_num as usize * SLOT_SIZE;
        let offset = u16::from_le_bytes(self.data[pos..pos + 2].try_into().unwrap());
        let length = u16::from_le_bytes(self.data[pos + 2..pos + 4].try_into().unwrap());
        (offset, length)
    }

    fn set_slot(&mut self, slot_num: u16, offset: u16, length: u16) {
        let pos = PAGE_HEADER_SIZE + slot_num as usize * SLOT_SIZE;
        self.data[pos..pos + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[pos + 2..pos + 4].copy_from_slice(&length.to_le_bytes());
    }

    /// Free bytes available for one more insert, accounting for the slot
    /// directory entry the insert would append.
    pub fn free_space(&self) -> i32 {
        self.free_space_end() as i32 - self.free_space_begin() as i32 - SLOT_SIZE as i32
    }

    /// Places `data` at the tail of the free region and appends a slot.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Result<u16> {
        if self.free_space() < data.len() as i32 {
            return Err(StorageError::PageFull);
        }

        let free_end = self.free_space_end();
        let new_end = free_end - data.len() as u16;
        self.data[new_end as usize..free_end as usize].copy_from_slice(data);

        let slot_num = self.slot_count();
        self.set_slot(slot_num, new_end, data.len() as u16);
        self.set_slot_count(slot_num + 1);
        self.set_free_space_begin(self.free_space_begin() + SLOT_SIZE as u16);
        self.set_free_space_end(new_end);

        self.is_dirty = true;
        Ok(slot_num)
    }

    pub fn get_tuple(&self, slot_num: u16) -> Result<Vec<u8>> {
        if slot_num >= self.slot_count() {
            return Err(StorageError::SlotNotFound);
        }
        let (offset, length) = self.slot(slot_num);
        if length == 0 {
            return Err(StorageError::SlotNotFound);
        }
        Ok(self.data[offset as usize..(offset + length) as usize].to_vec())
    }

    /// Overwrites in place when the new payload fits in the old one,
    /// otherwise tombstones the old region and relocates to the tail.
    pub fn update_tuple(&mut self, slot_num: u16, data: &[u8]) -> Result<()> {
        if slot_num >= self.slot_count() {
            return Err(StorageError::SlotNotFound);
        }
        if data.len() > PAGE_SIZE - PAGE_HEADER_SIZE {
            return Err(StorageError::PageFull);
        }

        let (offset, old_len) = self.slot(slot_num);
        let new_len = data.len() as u16;

        if new_len <= old_len {
            self.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            self.set_slot(slot_num, offset, new_len);
            self.is_dirty = true;
            return Ok(());
        }

        // Relocation needs fresh space at the tail; the old region is
        // abandoned where it is.
        if (self.free_space_end() as i32 - self.free_space_begin() as i32) < new_len as i32 {
            return Err(StorageError::PageFull);
        }

        self.set_slot(slot_num, offset, 0);

        let free_end = self.free_space_end();
        let new_end = free_end - new_len;
        self.data[new_end as usize..free_end as usize].copy_from_slice(data);
        self.set_free_space_end(new_end);
        self.set_slot(slot_num, new_end, new_len);
        self.is_dirty = true;
        Ok(())
    }

    /// Tombstones the slot. The payload bytes and the slot's offset stay in
    /// place so the slot number is never reused.
    pub fn delete_tuple(&mut self, slot_num: u16) -> Result<()> {
        if slot_num >= self.slot_count() {
            return Err(StorageError::SlotNotFound);
        }
        let (offset, _) = self.slot(slot_num);
        self.set_slot(slot_num, offset, 0);
        self.is_dirty = true;
        Ok(())
    }

    /// Every live (non-tombstoned) tuple with its slot number.
    pub fn live_tuples(&self) -> Vec<(u16, Vec<u8>)> {
        let mut tuples = Vec::new();
        for i in 0..self.slot_count() {
            let (offset, length) = self.slot(i);
            if length > 0 {
                tuples.push((i, self.data[offset as usize..(offset + length) as usize].to_vec()));
            }
        }
        tuples
    }
}
