use tokio::sync::watch;

use super::Task;

/// Subscription to the full task collection.
///
/// The first `next()` yields the current snapshot without waiting; later calls wait
/// for the next committed change and yield the collection as it is then. Snapshots
/// published in quick succession may coalesce into the latest one.
#[derive(Debug, Clone)]
pub struct TaskStream {
    rx: watch::Receiver<Vec<Task>>,
    primed: bool,
}

impl TaskStream {
    pub fn new(rx: watch::Receiver<Vec<Task>>) -> Self {
        Self { rx, primed: false }
    }

    /// Next snapshot, or `None` once the publishing store has been dropped.
    pub async fn next(&mut self) -> Option<Vec<Task>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Current snapshot without consuming a change notification.
    pub fn latest(&self) -> Vec<Task> {
        self.rx.borrow().clone()
    }
}
