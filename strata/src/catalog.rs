//! The persisted catalog: table names, schemas, heap page bounds and the
//! optional per-table index root, all packed into one dedicated page.
//!
//! Page body (after the 28-byte page header): num-tables u32 +
//! next-table-id u32, then per table: table-id u32, name (u16 len + UTF-8),
//! first-page u32, last-page u32, index-root u32 (InvalidPageId when
//! absent), indexed column name (u16 len + UTF-8, empty when absent),
//! num-columns u16, then per column: name (u16 len + UTF-8), type u8,
//! nullable u8.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::buffer_pool::BufferPoolManager;
use crate::datum::{Column, Schema, ValueType};
use crate::error::StorageError;
use crate::heap::TableHeap;
use crate::page::{PAGE_HEADER_SIZE, PAGE_TYPE_CATALOG};
use crate::{PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    catalog_page: PageId,
    schemas: HashMap<String, Schema>,
    heaps: HashMap<u32, TableHeap>,
    table_ids: HashMap<String, u32>,
    next_table_id: u32,
    index_roots: HashMap<u32, PageId>,
    index_columns: HashMap<u32, String>,
}

impl Catalog {
    /// Allocates the catalog page for a brand-new database.
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let catalog_page = bpm.new_page(PAGE_TYPE_CATALOG)?.page_id();
        let catalog = Catalog {
            bpm,
            catalog_page,
            schemas: HashMap::new(),
            heaps: HashMap::new(),
            table_ids: HashMap::new(),
            next_table_id: 1,
            index_roots: HashMap::new(),
            index_columns: HashMap::new(),
        };
        catalog.save()?;
        Ok(catalog)
    }

    /// Loads the directory from its page.
    pub fn load(bpm: Arc<BufferPoolManager>, catalog_page: PageId) -> Result<Self> {
        let mut catalog = Catalog {
            bpm: bpm.clone(),
            catalog_page,
            schemas: HashMap::new(),
            heaps: HashMap::new(),
            table_ids: HashMap::new(),
            next_table_id: 1,
            index_roots: HashMap::new(),
            index_columns: HashMap::new(),
        };

        let guard = bpm.fetch(catalog_page)?;
        let page = guard.read();
        catalog.deserialize(&page.data[PAGE_HEADER_SIZE..])?;
        Ok(catalog)
    }

    pub fn page_id(&self) -> PageId {
        self.catalog_page
    }

    /// Registers a table and allocates its first heap page.
    pub fn create_table(&mut self, schema: Schema) -> Result<u32> {
        if self.table_ids.contains_key(&schema.table_name) {
            return Err(StorageError::TableExists(schema.table_name));
        }

        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let heap = TableHeap::create(self.bpm.clone(), table_id)?;
        self.table_ids.insert(schema.table_name.clone(), table_id);
        self.schemas.insert(schema.table_name.clone(), schema);
        self.heaps.insert(table_id, heap);

        self.save()?;
        Ok(table_id)
    }

    pub fn schema(&self, table_name: &str) -> Option<&Schema> {
        self.schemas.get(table_name)
    }

    pub fn table_id(&self, table_name: &str) -> Option<u32> {
        self.table_ids.get(table_name).copied()
    }

    pub fn heap(&self, table_id: u32) -> Option<&TableHeap> {
        self.heaps.get(&table_id)
    }

    pub fn heap_mut(&mut self, table_id: u32) -> Option<&mut TableHeap> {
        self.heaps.get_mut(&table_id)
    }

    pub fn set_index(&mut self, table_id: u32, root: PageId, column: &str) -> Result<()> {
        self.index_roots.insert(table_id, root);
        self.index_columns.insert(table_id, column.to_string());
        self.save()
    }

    pub fn index_root(&self, table_id: u32) -> Option<PageId> {
        self.index_roots.get(&table_id).copied()
    }

    pub fn index_column(&self, table_id: u32) -> Option<&str> {
        self.index_columns.get(&table_id).map(|s| s.as_str())
    }

    /// Table names sorted by table id.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<(u32, String)> = self
            .table_ids
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn table_count(&self) -> usize {
        self.table_ids.len()
    }

    /// Serializes the directory back onto its page.
    pub fn save(&self) -> Result<()> {
        let mut body = Vec::new();
        body.put_u32_le(self.table_ids.len() as u32);
        body.put_u32_le(self.next_table_id);

        let mut entries: Vec<(&String, u32)> =
            self.table_ids.iter().map(|(name, id)| (name, *id)).collect();
        entries.sort_by_key(|(_, id)| *id);

        for (name, table_id) in entries {
            let schema = &self.schemas[name];
            let heap = &self.heaps[&table_id];
            let index_root = self
                .index_roots
                .get(&table_id)
                .copied()
                .unwrap_or(INVALID_PAGE_ID);
            let index_column = self
                .index_columns
                .get(&table_id)
                .map(|s| s.as_str())
                .unwrap_or("");

            body.put_u32_le(table_id);
            put_string(&mut body, name)?;
            body.put_u32_le(heap.first_page());
            body.put_u32_le(heap.last_page());
            body.put_u32_le(index_root);
            put_string(&mut body, index_column)?;
            body.put_u16_le(schema.columns.len() as u16);
            for column in &schema.columns {
                put_string(&mut body, &column.name)?;
                body.put_u8(column.ty as u8);
                body.put_u8(column.nullable as u8);
            }
        }

        if body.len() > PAGE_SIZE - PAGE_HEADER_SIZE {
            return Err(StorageError::Serialization(
                "catalog page overflow".to_string(),
            ));
        }

        let guard = self.bpm.fetch(self.catalog_page)?;
        let mut page = guard.write();
        page.data[PAGE_HEADER_SIZE..].fill(0);
        page.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + body.len()].copy_from_slice(&body);
        page.is_dirty = true;
        Ok(())
    }

    fn deserialize(&mut self, mut body: &[u8]) -> Result<()> {
        if body.remaining() < 8 {
            return Err(StorageError::Corruption(
                "catalog page body truncated".to_string(),
            ));
        }
        let num_tables = body.get_u32_le();
        self.next_table_id = body.get_u32_le().max(1);

        for _ in 0..num_tables {
            if body.remaining() < 4 {
                return Err(corrupt());
            }
            let table_id = body.get_u32_le();
            let table_name = get_string(&mut body)?;
            if body.remaining() < 12 {
                return Err(corrupt());
            }
            let first_page = body.get_u32_le();
            let last_page = body.get_u32_le();
            let index_root = body.get_u32_le();
            let index_column = get_string(&mut body)?;
            if body.remaining() < 2 {
                return Err(corrupt());
            }
            let num_columns = body.get_u16_le();

            let mut columns = Vec::with_capacity(num_columns as usize);
            for _ in 0..num_columns {
                let name = get_string(&mut body)?;
                if body.remaining() < 2 {
                    return Err(corrupt());
                }
                let ty = ValueType::from_u8(body.get_u8())?;
                let nullable = body.get_u8() != 0;
                columns.push(Column { name, ty, nullable });
            }

            let schema = Schema {
                table_name: table_name.clone(),
                columns,
            };
            let heap = TableHeap::load(self.bpm.clone(), table_id, first_page, last_page);

            self.schemas.insert(table_name.clone(), schema);
            self.heaps.insert(table_id, heap);
            self.table_ids.insert(table_name, table_id);
            if index_root != INVALID_PAGE_ID {
                self.index_roots.insert(table_id, index_root);
                if !index_column.is_empty() {
                    self.index_columns.insert(table_id, index_column);
                }
            }
        }

        Ok(())
    }
}

fn corrupt() -> StorageError {
    StorageError::Corruption("catalog page body truncated".to_string())
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(StorageError::Serialization(format!(
            "catalog string too long: {} bytes",
            s.len()
        )));
    }
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(corrupt());
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(corrupt());
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| StorageError::Corruption("catalog string is invalid UTF-8".to_string()))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use tempfile::tempdir;

    fn schema(name: &str) -> Schema {
        Schema {
            table_name: name.to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ValueType::Int,
                    nullable: false,
                },
                Column {
                    name: "name".to_string(),
                    ty: ValueType::Text,
                    nullable: true,
                },
            ],
        }
    }

    #[test]
    fn create_load_round_trip() {
        let dir = tempdir().unwrap();
        let pager = Arc::new(Pager::open(dir.path().join("test.db")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pager.clone(), 16));

        let catalog_page;
        {
            let mut catalog = Catalog::create(bpm.clone()).unwrap();
            catalog_page = catalog.page_id();
            let users = catalog.create_table(schema("users")).unwrap();
            let orders = catalog.create_table(schema("orders")).unwrap();
            assert_eq!((users, orders), (1, 2));
            catalog.set_index(users, 42, "id").unwrap();
            bpm.flush_all().unwrap();
        }

        let bpm2 = Arc::new(BufferPoolManager::new(pager, 16));
        let catalog = Catalog::load(bpm2, catalog_page).unwrap();
        assert_eq!(catalog.table_names(), vec!["users", "orders"]);
        assert_eq!(catalog.table_id("users"), Some(1));
        assert_eq!(catalog.schema("users").unwrap(), &schema("users"));
        assert_eq!(catalog.index_root(1), Some(42));
        assert_eq!(catalog.index_column(1), Some("id"));
        assert_eq!(catalog.index_root(2), None);

        let heap = catalog.heap(2).unwrap();
        assert_ne!(heap.first_page(), INVALID_PAGE_ID);
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let dir = tempdir().unwrap();
        let pager = Arc::new(Pager::open(dir.path().join("test.db")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pager, 16));

        let mut catalog = Catalog::create(bpm).unwrap();
        catalog.create_table(schema("users")).unwrap();
        assert!(matches!(
            catalog.create_table(schema("users")),
            Err(StorageError::TableExists(_))
        ));
    }

    #[test]
    fn empty_catalog_round_trip() {
        let dir = tempdir().unwrap();
        let pager = Arc::new(Pager::open(dir.path().join("test.db")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pager, 16));

        let catalog = Catalog::create(bpm.clone()).unwrap();
        let page = catalog.page_id();
        drop(catalog);

        let catalog = Catalog::load(bpm, page).unwrap();
        assert_eq!(catalog.table_count(), 0);
    }
}
