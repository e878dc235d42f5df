use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-client call counters
#[derive(Debug, Default)]
pub(crate) struct ClientStats {
    get: AtomicUsize,
    list: AtomicUsize,
    list_by_index: AtomicUsize,
    delete: AtomicUsize,
    update: AtomicUsize,
    update_status: AtomicUsize,
    enqueue_after: AtomicUsize,
}

/// Point-in-time copy of a client's call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub list: usize,
    pub list_by_index: usize,
    pub delete: usize,
    pub update: usize,
    pub update_status: usize,
    pub enqueue_after: usize,
}

impl CallCounts {
    /// Total number of calls of any kind
    pub fn total(&self) -> usize {
        self.get
            + self.list
            + self.list_by_index
            + self.delete
            + self.update
            + self.update_status
            + self.enqueue_after
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Call {
    Get,
    List,
    ListByIndex,
    Delete,
    Update,
    UpdateStatus,
    EnqueueAfter,
}

impl ClientStats {
    pub(crate) fn record(&self, call: Call) {
        let counter = match call {
            Call::Get => &self.get,
            Call::List => &self.list,
            Call::ListByIndex => &self.list_by_index,
            Call::Delete => &self.delete,
            Call::Update => &self.update,
            Call::UpdateStatus => &self.update_status,
            Call::EnqueueAfter => &self.enqueue_after,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CallCounts {
        CallCounts {
            get: self.get.load(Ordering::Relaxed),
            list: self.list.load(Ordering::Relaxed),
            list_by_index: self.list_by_index.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            update: self.update.load(Ordering::Relaxed),
            update_status: self.update_status.load(Ordering::Relaxed),
            enqueue_after: self.enqueue_after.load(Ordering::Relaxed),
        }
    }
}
