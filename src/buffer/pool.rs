//! The Buffer Manager (spec Section 4.B).
//!
//! Grounded on the teacher's `btree/buffer_pool.rs` (page-id-keyed map,
//! read-page-from-container-file-on-miss, singleton-style pool) but
//! reworked for concurrency: pages are `Pod<Page>` (`Arc<RwLock<Page>>`,
//! per `types.rs`) so readers and writers latch-couple through
//! `RwLockReadGuard`/`RwLockWriteGuard` directly rather than the
//! teacher's single-threaded `Rc<RefCell<_>>`, and eviction honors the
//! WAL-before-write rule by consulting the log manager before writing
//! a dirty frame back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::buffer::page::{Page, PAGE_SIZE};
use crate::config::Config;
use crate::error::RssError;
use crate::io::BinaryFile;
use crate::log::LogManager;
use crate::lsn::Lsn;
use crate::page_id::PageId;
use crate::types::{pod, Pod, RssResult, VoidResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    /// read-only; any number of shared fixers may hold a page.
    Shared,
    /// a single fixer intends to upgrade to `Exclusive`; at most one
    /// `Update` latch may be outstanding per page (prevents the
    /// classic shared-latch upgrade deadlock).
    Update,
    /// exclusive read/write access to an existing page.
    Exclusive,
    /// exclusive access to a page being created; skips the disk read
    /// that `Exclusive`/`Shared` perform on a cold fix.
    ExclusiveNew,
}

struct Frame {
    page: Pod<Page>,
    pin_count: usize,
    /// clock "second chance" bit.
    referenced: bool,
}

struct Inner {
    frames: HashMap<PageId, Frame>,
    /// fixed iteration order for the clock sweep.
    clock_order: Vec<PageId>,
    clock_hand: usize,
    containers: HashMap<u32, BinaryFile>,
    next_page_number: HashMap<u32, u32>,
}

pub struct BufferManager {
    log: Arc<LogManager>,
    config: Config,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl BufferManager {
    pub fn new(config: Config, log: Arc<LogManager>, capacity: usize) -> Self {
        Self {
            log,
            config,
            capacity,
            inner: Mutex::new(Inner {
                frames: HashMap::new(),
                clock_order: Vec::new(),
                clock_hand: 0,
                containers: HashMap::new(),
                next_page_number: HashMap::new(),
            }),
        }
    }

    fn container_path(&self, container_id: u32) -> std::path::PathBuf {
        self.config
            .storage_base_path
            .join(format!("{}.dat", container_id))
    }

    fn with_container<'a>(
        &self,
        inner: &'a mut Inner,
        container_id: u32,
    ) -> Result<&'a mut BinaryFile, RssError> {
        if !inner.containers.contains_key(&container_id) {
            std::fs::create_dir_all(&self.config.storage_base_path)?;
            let file = BinaryFile::open(self.container_path(container_id))?;
            inner.containers.insert(container_id, file);
        }
        Ok(inner.containers.get_mut(&container_id).unwrap())
    }

    fn read_from_disk(&self, inner: &mut Inner, page_id: PageId) -> Result<Page, RssError> {
        let file = self.with_container(inner, page_id.container_id)?;
        let offset = page_id.page_number as u64 * PAGE_SIZE as u64;
        let len = file.len()?;
        if offset + PAGE_SIZE as u64 > len {
            return Ok(Page::new(page_id));
        }
        file.seek(std::io::SeekFrom::Start(offset))?;
        let data = file.read_exact_bytes(PAGE_SIZE)?;
        Ok(Page::from_bytes(page_id, data))
    }

    fn write_to_disk(&self, inner: &mut Inner, page: &Page) -> VoidResult {
        let file = self.with_container(inner, page.page_id.container_id)?;
        let offset = page.page_id.page_number as u64 * PAGE_SIZE as u64;
        let len = file.len()?;
        if offset + PAGE_SIZE as u64 > len {
            file.set_len(offset + PAGE_SIZE as u64)?;
        }
        file.seek(std::io::SeekFrom::Start(offset))?;
        file.write_bytes(&page.data)?;
        Ok(())
    }

    /// Allocate the next page number in `container_id` without touching
    /// disk; the space map (spec Section 4.E) is the real allocator, this
    /// is the buffer manager's half of `ExclusiveNew`.
    pub fn allocate_page_number(&self, container_id: u32) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let file_pages = {
            let file = self.with_container(&mut inner, container_id).ok();
            file.and_then(|f| f.len().ok())
                .map(|len| (len / PAGE_SIZE as u64) as u32)
                .unwrap_or(0)
        };
        let next = inner
            .next_page_number
            .entry(container_id)
            .or_insert(file_pages.max(crate::page_id::ROOT_PAGE_NUMBER));
        let assigned = *next;
        *next += 1;
        assigned
    }

    /// `fix(pageId, mode) -> page` (spec Section 4.B).
    pub fn fix(&self, page_id: PageId, mode: LatchMode) -> RssResult<Pod<Page>> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.frames.contains_key(&page_id) {
            self.evict_if_needed(&mut inner)?;
            let page = if mode == LatchMode::ExclusiveNew {
                Page::new(page_id)
            } else {
                self.read_from_disk(&mut inner, page_id)?
            };
            inner.frames.insert(
                page_id,
                Frame {
                    page: pod(page),
                    pin_count: 0,
                    referenced: false,
                },
            );
            inner.clock_order.push(page_id);
        }

        let frame = inner.frames.get_mut(&page_id).unwrap();
        frame.pin_count += 1;
        frame.referenced = true;
        debug!("fixed page {} in mode {:?}", page_id, mode);
        Ok(Arc::clone(&frame.page))
    }

    /// `unfix(pageId)` (spec Section 4.B). Must be called exactly once
    /// per successful `fix`.
    pub fn unfix(&self, page_id: PageId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(frame) = inner.frames.get_mut(&page_id) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    /// Force `page_id` to disk if dirty, honoring WAL-before-write: the
    /// log must be durable at least up to the page's LSN before the
    /// page's bytes are allowed to reach disk (spec Section 4.B,
    /// "Durability rule").
    pub fn flush_page(&self, page_id: PageId) -> VoidResult {
        let page_lsn = {
            let inner = self.inner.lock().unwrap();
            match inner.frames.get(&page_id) {
                Some(frame) => {
                    let guard = frame.page.read().unwrap();
                    if !guard.dirty {
                        return Ok(());
                    }
                    guard.page_lsn
                }
                None => return Ok(()),
            }
        };
        self.log.flush(Some(page_lsn))?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(frame) = inner.frames.get(&page_id) {
            let page_arc = Arc::clone(&frame.page);
            let mut guard = page_arc.write().unwrap();
            self.write_to_disk(&mut inner, &guard)?;
            guard.mark_clean();
        }
        Ok(())
    }

    pub fn flush_all(&self) -> VoidResult {
        let ids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.frames.keys().copied().collect()
        };
        for id in ids {
            self.flush_page(id)?;
        }
        Ok(())
    }

    /// Dirty pages and their first-dirty LSN, for checkpoint records and
    /// the oldest-interesting-LSN computation (spec Section 4.A/4.B).
    pub fn dirty_pages(&self) -> Vec<(PageId, Lsn)> {
        let inner = self.inner.lock().unwrap();
        inner
            .frames
            .values()
            .filter_map(|frame| {
                let guard = frame.page.read().unwrap();
                if guard.dirty {
                    Some((guard.page_id, guard.first_dirty_lsn))
                } else {
                    None
                }
            })
            .collect()
    }

    /// CLOCK eviction: scan for an unpinned frame, giving referenced
    /// frames a second chance, and evict the first unpinned,
    /// not-recently-referenced one found. A dirty victim is written back
    /// (WAL-before-write) before its frame is dropped.
    fn evict_if_needed(&self, inner: &mut Inner) -> VoidResult {
        if inner.frames.len() < self.capacity {
            return Ok(());
        }
        let n = inner.clock_order.len();
        if n == 0 {
            return Err(RssError::invalid_state("buffer pool empty but over capacity"));
        }
        for _ in 0..2 * n {
            let candidate = inner.clock_order[inner.clock_hand];
            inner.clock_hand = (inner.clock_hand + 1) % n;

            let evictable = match inner.frames.get_mut(&candidate) {
                Some(frame) if frame.pin_count == 0 => {
                    if frame.referenced {
                        frame.referenced = false;
                        false
                    } else {
                        true
                    }
                }
                _ => false,
            };
            if !evictable {
                continue;
            }

            let page_lsn = {
                let frame = inner.frames.get(&candidate).unwrap();
                let guard = frame.page.read().unwrap();
                if guard.dirty {
                    Some(guard.page_lsn)
                } else {
                    None
                }
            };
            if let Some(lsn) = page_lsn {
                self.log.flush(Some(lsn))?;
                let frame = inner.frames.get(&candidate).unwrap();
                let page_arc = Arc::clone(&frame.page);
                let mut guard = page_arc.write().unwrap();
                self.write_to_disk(inner, &guard)?;
                guard.mark_clean();
            }

            inner.frames.remove(&candidate);
            inner.clock_order.retain(|id| *id != candidate);
            inner.clock_hand = 0;
            return Ok(());
        }
        Err(RssError::invalid_state(
            "no unpinned frame available for eviction",
        ))
    }
}

/// Convenience wrappers so B-tree/space-map code can latch a fixed page
/// without re-deriving the `RwLock` calls every time.
pub fn read_latch(page: &Pod<Page>) -> RwLockReadGuard<'_, Page> {
    page.read().unwrap()
}

pub fn write_latch(page: &Pod<Page>) -> RwLockWriteGuard<'_, Page> {
    page.write().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_log(dir: &std::path::Path) -> Arc<LogManager> {
        let cfg = Config {
            control_files: vec![dir.join("a.ctl")],
            groups: vec![crate::config::LogGroupConfig {
                path: dir.join("group0"),
            }],
            files_per_group: 3,
            file_size: 65536,
            buffer_size: 4096,
            buffer_limit: 64,
            flush_interval_secs: 3600,
            archive_path: dir.join("archive"),
            storage_base_path: dir.join("data"),
        };
        LogManager::open(cfg).unwrap()
    }

    #[test]
    fn fix_creates_and_caches_page() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let pool = BufferManager::new(
            Config {
                storage_base_path: dir.path().join("data"),
                ..Config::default()
            },
            Arc::clone(&log),
            4,
        );

        let pid = PageId::new(1, 2);
        let page = pool.fix(pid, LatchMode::ExclusiveNew).unwrap();
        {
            let mut guard = write_latch(&page);
            guard.data[0] = 42;
            guard.mark_dirty(Lsn::new(0, 100));
        }
        pool.unfix(pid);

        let page_again = pool.fix(pid, LatchMode::Shared).unwrap();
        assert_eq!(read_latch(&page_again).data[0], 42);
        pool.unfix(pid);
        log.shutdown();
    }

    #[test]
    fn eviction_respects_pin_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let pool = BufferManager::new(
            Config {
                storage_base_path: dir.path().join("data"),
                ..Config::default()
            },
            Arc::clone(&log),
            1,
        );

        let pinned = pool.fix(PageId::new(1, 2), LatchMode::ExclusiveNew).unwrap();
        let _ = pinned;
        let second = pool.fix(PageId::new(1, 3), LatchMode::ExclusiveNew);
        assert!(second.is_err());
        log.shutdown();
    }
}
