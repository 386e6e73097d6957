//! Category lock registry.
//!
//! Hardware is guarded per device *class*, not per device: all cameras share one lock, all
//! scanning stages share another, and so on. The registry is built once at startup with one
//! lock for every [`DeviceKind`] and handed to each component that talks to hardware.
//!
//! # Discipline
//!
//! - Hold a guard only for the duration of the hardware call it protects.
//! - Never hold a guard across an emission to the presentation sink.
//! - Never hold guards for two categories at once, and never re-acquire a category the
//!   current context already holds (the underlying mutex is not re-entrant and would
//!   deadlock).
//!
//! There is no timeout. A device that never returns stalls only the tasks waiting on its
//! category.

use crate::hardware::DeviceKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// RAII guard for one category lock. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct CategoryGuard {
    kind: DeviceKind,
    _guard: OwnedMutexGuard<()>,
}

impl CategoryGuard {
    /// The category this guard holds.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

#[derive(Debug, Default)]
struct CategoryLock {
    mutex: Arc<Mutex<()>>,
    acquisitions: AtomicU64,
}

/// One mutual-exclusion lock per device category.
///
/// Cloning is cheap and every clone refers to the same locks.
#[derive(Debug, Clone)]
pub struct LockRegistry {
    locks: Arc<[CategoryLock; DeviceKind::ALL.len()]>,
}

impl LockRegistry {
    /// Create the registry with one lock per [`DeviceKind`].
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Default::default()),
        }
    }

    fn lock(&self, kind: DeviceKind) -> &CategoryLock {
        &self.locks[kind as usize]
    }

    /// Wait for and take the lock for `kind`.
    pub async fn acquire(&self, kind: DeviceKind) -> CategoryGuard {
        let lock = self.lock(kind);
        if lock.mutex.try_lock().is_err() {
            tracing::trace!(category = %kind, "category lock contended, waiting");
        }
        let guard = Arc::clone(&lock.mutex).lock_owned().await;
        lock.acquisitions.fetch_add(1, Ordering::Relaxed);
        CategoryGuard {
            kind,
            _guard: guard,
        }
    }

    /// Take the lock for `kind` only if it is free right now.
    pub fn try_acquire(&self, kind: DeviceKind) -> Option<CategoryGuard> {
        let lock = self.lock(kind);
        let guard = Arc::clone(&lock.mutex).try_lock_owned().ok()?;
        lock.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(CategoryGuard {
            kind,
            _guard: guard,
        })
    }

    /// Whether some context currently holds the lock for `kind`.
    pub fn is_held(&self, kind: DeviceKind) -> bool {
        self.lock(kind).mutex.try_lock().is_err()
    }

    /// Total successful acquisitions of `kind` since startup.
    pub fn acquisitions(&self, kind: DeviceKind) -> u64 {
        self.lock(kind).acquisitions.load(Ordering::Relaxed)
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
