//! The disk manager: random-access page I/O over a single flat file.
//!
//! File layout: 16-byte header (magic "MINIDBPD", version, num-pages),
//! then page 0, 1, ... each exactly `PAGE_SIZE` bytes.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::page::{Page, PAGE_TYPE_DATA};
use crate::{PageId, Result, PAGE_SIZE};

const DISK_HEADER_SIZE: usize = 16;
const DISK_MAGIC: u64 = 0x4D49_4E49_4442_5044; // "MINIDBPD"
const DISK_VERSION: u32 = 1;

pub struct Pager {
    inner: Mutex<PagerInner>,
}

struct PagerInner {
    file: File,
    num_pages: u32,
}

impl Pager {
    /// Creates or opens a database file, validating the header of an
    /// existing one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut inner = PagerInner { file, num_pages: 0 };
        if existed {
            inner.read_header()?;
        } else {
            inner.write_header()?;
            inner.file.sync_all()?;
        }

        Ok(Pager {
            inner: Mutex::new(inner),
        })
    }

    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        if page_id >= inner.num_pages {
            return Err(StorageError::PageOutOfRange(page_id));
        }

        let offset = page_offset(page_id);
        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        inner.file.read_exact(&mut buf)?;
        Page::from_bytes(&buf)
    }

    pub fn write_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        if page.id >= inner.num_pages {
            return Err(StorageError::PageOutOfRange(page.id));
        }

        let offset = page_offset(page.id);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Bumps the page count and writes a fresh initialized page image so a
    /// subsequent read never observes uninitialized bytes. The page and the
    /// updated header hit stable storage before the id is handed out.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_id = inner.num_pages;
        inner.num_pages += 1;

        let result = (|| -> Result<()> {
            inner.write_num_pages()?;
            let page = Page::new(page_id, PAGE_TYPE_DATA);
            let offset = page_offset(page_id);
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.write_all(page.as_bytes())?;
            inner.file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = result {
            inner.num_pages -= 1;
            let _ = inner.write_num_pages();
            return Err(e);
        }

        Ok(page_id)
    }

    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }
}

impl PagerInner {
    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; DISK_HEADER_SIZE];
        header[0..8].copy_from_slice(&DISK_MAGIC.to_le_bytes());
        header[8..12].copy_from_slice(&DISK_VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        let mut header = [0u8; DISK_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .read_exact(&mut header)
            .map_err(|_| StorageError::Corruption("data file header truncated".to_string()))?;

        let magic = u64::from_le_bytes(header[0..8].try_into().unwrap());
        if magic != DISK_MAGIC {
            return Err(StorageError::Corruption(
                "invalid data file magic".to_string(),
            ));
        }
        let version = u32::from_le_bytes(header[8..12].try_into().unwrap());
        if version != DISK_VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported data file version {version}"
            )));
        }
        self.num_pages = u32::from_le_bytes(header[12..16].try_into().unwrap());
        Ok(())
    }

    fn write_num_pages(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(12))?;
        self.file.write_all(&self.num_pages.to_le_bytes())?;
        Ok(())
    }
}

fn page_offset(page_id: PageId) -> u64 {
    DISK_HEADER_SIZE as u64 + page_id as u64 * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let pager = Pager::open(&path).unwrap();
        let page_id = pager.allocate_page().unwrap();
        assert_eq!(page_id, 0);
        assert_eq!(pager.num_pages(), 1);

        let mut page = pager.read_page(page_id).unwrap();
        page.set_lsn(123);
        pager.write_page(&page).unwrap();
        pager.sync().unwrap();

        drop(pager);
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.num_pages(), 1);
        let page = pager.read_page(page_id).unwrap();
        assert_eq!(page.lsn(), 123);
    }

    #[test]
    fn allocated_page_is_initialized_on_disk() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("test.db")).unwrap();

        let page_id = pager.allocate_page().unwrap();
        let page = pager.read_page(page_id).unwrap();
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.next_page_id(), crate::INVALID_PAGE_ID);
    }

    #[test]
    fn out_of_range_read_and_write_fail() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("test.db")).unwrap();

        assert!(matches!(
            pager.read_page(0),
            Err(StorageError::PageOutOfRange(0))
        ));

        let page = Page::new(9, PAGE_TYPE_DATA);
        assert!(matches!(
            pager.write_page(&page),
            Err(StorageError::PageOutOfRange(9))
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, b"NOTMINIDB_______").unwrap();

        assert!(matches!(
            Pager::open(&path),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn bad_version_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut header = Vec::new();
        header.extend_from_slice(&DISK_MAGIC.to_le_bytes());
        header.extend_from_slice(&99u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, header).unwrap();

        assert!(matches!(
            Pager::open(&path),
            Err(StorageError::Corruption(_))
        ));
    }
}
