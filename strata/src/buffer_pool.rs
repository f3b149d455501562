//! The buffer pool: a fixed-capacity LRU cache of pages over the disk
//! manager, with pin counting and dirty tracking.
//!
//! The pool owns every cached page. Callers borrow a page between fetch and
//! unpin through a `PageGuard`; dropping the guard unpins. Eviction only
//! considers frames with a pin count of zero, so a live guard can never be
//! invalidated. Before a dirty page is written back the WAL is forced up to
//! that page's LSN.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::StorageError;
use crate::failpoint::{self, FailPoint};
use crate::page::Page;
use crate::pager::Pager;
use crate::wal::WalManager;
use crate::{Lsn, PageId, Result};

struct Frame {
    page: Arc<RwLock<Page>>,
    pin_count: u32,
}

struct PoolInner {
    frames: HashMap<PageId, Frame>,
    /// Front is most recently used.
    lru: VecDeque<PageId>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

pub struct BufferPoolManager {
    pager: Arc<Pager>,
    wal: Option<Arc<WalManager>>,
    inner: Mutex<PoolInner>,
}

/// An RAII pin on a cached page. `read`/`write` expose the page for the
/// guard's lifetime; mutators on `Page` set its dirty flag themselves.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    page: Arc<RwLock<Page>>,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id);
    }
}

impl BufferPoolManager {
    pub fn new(pager: Arc<Pager>, capacity: usize) -> Self {
        Self::build(pager, capacity, None)
    }

    /// A pool wired to the WAL honours the WAL rule: dirty pages are only
    /// written back once the log is durable up to their page LSN.
    pub fn with_wal(pager: Arc<Pager>, capacity: usize, wal: Arc<WalManager>) -> Self {
        Self::build(pager, capacity, Some(wal))
    }

    fn build(pager: Arc<Pager>, capacity: usize, wal: Option<Arc<WalManager>>) -> Self {
        BufferPoolManager {
            pager,
            wal,
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                lru: VecDeque::new(),
                capacity,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns a pinned guard on the page, reading it from disk on a miss.
    pub fn fetch(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();

        if let Some(frame) = inner.frames.get_mut(&page_id) {
            frame.pin_count += 1;
            let page = frame.page.clone();
            inner.hits += 1;
            touch_lru(&mut inner.lru, page_id);
            return Ok(PageGuard {
                pool: self,
                page_id,
                page,
            });
        }

        inner.misses += 1;
        if inner.frames.len() >= inner.capacity {
            self.evict_one(&mut inner)?;
        }

        let page = self.pager.read_page(page_id)?;
        let page = Arc::new(RwLock::new(page));
        inner.frames.insert(
            page_id,
            Frame {
                page: page.clone(),
                pin_count: 1,
            },
        );
        inner.lru.push_front(page_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            page,
        })
    }

    /// Allocates a page on disk and installs it pinned and dirty.
    pub fn new_page(&self, page_type: u8) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();

        if inner.frames.len() >= inner.capacity {
            self.evict_one(&mut inner)?;
        }

        let page_id = self.pager.allocate_page()?;
        let mut page = Page::new(page_id, page_type);
        page.is_dirty = true;
        let page = Arc::new(RwLock::new(page));

        inner.frames.insert(
            page_id,
            Frame {
                page: page.clone(),
                pin_count: 1,
            },
        );
        inner.lru.push_front(page_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            page,
        })
    }

    fn unpin(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(&page_id) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    /// Writes the page out if it is cached and dirty.
    pub fn flush(&self, page_id: PageId) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&page_id) {
            let mut page = frame.page.write();
            if page.is_dirty {
                self.write_back(&page)?;
                page.is_dirty = false;
            }
        }
        Ok(())
    }

    /// Flushes every dirty page and syncs the disk manager.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.inner.lock();
        for frame in inner.frames.values() {
            let mut page = frame.page.write();
            if page.is_dirty {
                self.write_back(&page)?;
                page.is_dirty = false;
            }
        }
        self.pager.sync()
    }

    /// Snapshot of `{page id -> page LSN}` over dirty pages, for checkpoint.
    pub fn dirty_pages(&self) -> Vec<(PageId, Lsn)> {
        let inner = self.inner.lock();
        let mut dirty = Vec::new();
        for (page_id, frame) in &inner.frames {
            let page = frame.page.read();
            if page.is_dirty {
                dirty.push((*page_id, page.lsn()));
            }
        }
        dirty
    }

    pub fn set_page_lsn(&self, page_id: PageId, lsn: Lsn) {
        let inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&page_id) {
            let mut page = frame.page.write();
            page.set_lsn(lsn);
            page.is_dirty = true;
        }
    }

    /// (hits, misses, cached pages).
    pub fn stats(&self) -> (u64, u64, usize) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses, inner.frames.len())
    }

    /// Pin count of a cached page; None if not cached. Test support.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.inner.lock().frames.get(&page_id).map(|f| f.pin_count)
    }

    /// Scans from the LRU tail for the first unpinned frame, flushing it if
    /// dirty, and drops it from the cache.
    fn evict_one(&self, inner: &mut PoolInner) -> Result<()> {
        let victim = inner
            .lru
            .iter()
            .rev()
            .copied()
            .find(|id| inner.frames.get(id).map(|f| f.pin_count == 0).unwrap_or(false));

        let Some(victim) = victim else {
            return Err(StorageError::AllPinned);
        };

        if let Some(frame) = inner.frames.get(&victim) {
            let mut page = frame.page.write();
            if page.is_dirty {
                self.write_back(&page)?;
                page.is_dirty = false;
            }
        }
        debug!(page_id = victim, "evicting page");
        inner.frames.remove(&victim);
        inner.lru.retain(|id| *id != victim);
        Ok(())
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        failpoint::trigger(FailPoint::FlushBeforePage)?;
        if let Some(wal) = &self.wal {
            wal.force(page.lsn())?;
        }
        self.pager.write_page(page)
    }
}

fn touch_lru(lru: &mut VecDeque<PageId>, page_id: PageId) {
    lru.retain(|id| *id != page_id);
    lru.push_front(page_id);
}
