//! Change notification.

use rowsync_protocol::DataETag;
use tokio::sync::mpsc;

/// Enqueued after every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChanged {
    /// Table that changed.
    pub table_id: String,
    /// dataETag of the commit.
    pub data_etag: DataETag,
}

/// Receives change notifications.
///
/// Enqueueing must not block and must not fail the commit.
pub trait TaskQueue: Send + Sync {
    /// Enqueues a notification.
    fn enqueue(&self, task: TableChanged);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQueue;

impl TaskQueue for NoopQueue {
    fn enqueue(&self, _task: TableChanged) {}
}

/// Forwards notifications to a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<TableChanged>,
}

impl ChannelQueue {
    /// Creates a queue and the receiver its notifications arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TableChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskQueue for ChannelQueue {
    fn enqueue(&self, task: TableChanged) {
        if let Err(e) = self.tx.send(task) {
            tracing::debug!(table = %e.0.table_id, "change listener gone, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_queue_delivers() {
        let (queue, mut rx) = ChannelQueue::new();
        queue.enqueue(TableChanged {
            table_id: "t".into(),
            data_etag: DataETag::new("d1"),
        });
        let task = rx.try_recv().unwrap();
        assert_eq!(task.table_id, "t");
        assert_eq!(task.data_etag.as_str(), "d1");
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (queue, rx) = ChannelQueue::new();
        drop(rx);
        queue.enqueue(TableChanged {
            table_id: "t".into(),
            data_etag: DataETag::new("d1"),
        });
    }
}
