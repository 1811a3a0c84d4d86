//! Listener interaction queue ordered by descending priority, FIFO within a
//! priority level.
//!
//! A new item is inserted before the first element of strictly lower
//! priority, so higher-priority requests jump the line but never displace an
//! item that has already been dequeued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::protocol::QueueSnapshot;
use crate::submission::SubmissionKind;

/// Priority carried by dialogue requests.
pub const DIALOGUE_PRIORITY: i32 = 10;
/// Priority carried by plain text/audio submissions.
pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Text,
    Audio,
    Phone,
    Dialogue,
}

impl From<SubmissionKind> for ItemKind {
    fn from(kind: SubmissionKind) -> Self {
        match kind {
            SubmissionKind::Text => ItemKind::Text,
            SubmissionKind::Audio => ItemKind::Audio,
        }
    }
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Audio => "audio",
            ItemKind::Phone => "phone",
            ItemKind::Dialogue => "dialogue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub user_id: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub text: Option<String>,
    pub priority: i32,
    pub status: ItemStatus,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, kind: ItemKind) -> Self {
        let priority = match kind {
            ItemKind::Dialogue => DIALOGUE_PRIORITY,
            _ => DEFAULT_PRIORITY,
        };
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            text: None,
            priority,
            status: ItemStatus::Queued,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text.filter(|t| !t.is_empty());
        self
    }

    /// Short label used in queue previews: the text, or the kind when empty.
    pub fn preview(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// Shared priority queue. Every operation takes the lock once, so each is
/// atomic with respect to every other.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    items: RwLock<Vec<QueueItem>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, stamping status and enqueue time. An item whose id is
    /// already present replaces the earlier entry.
    pub async fn enqueue(&self, mut item: QueueItem) -> QueueItem {
        item.status = ItemStatus::Queued;
        item.enqueued_at = Utc::now();

        let mut items = self.items.write().await;
        items.retain(|existing| existing.id != item.id);
        let index = items
            .iter()
            .position(|existing| item.priority > existing.priority)
            .unwrap_or(items.len());
        items.insert(index, item.clone());
        item
    }

    pub async fn peek(&self) -> Option<QueueItem> {
        self.items.read().await.first().cloned()
    }

    /// Remove the head and mark it processing.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let mut items = self.items.write().await;
        if items.is_empty() {
            return None;
        }
        let mut item = items.remove(0);
        item.status = ItemStatus::Processing;
        Some(item)
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut items = self.items.write().await;
        match items.iter().position(|item| item.id == id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copies of the first `min(n, len)` items.
    pub async fn top_n(&self, n: usize) -> Vec<QueueItem> {
        self.items.read().await.iter().take(n).cloned().collect()
    }

    pub async fn update_status(&self, id: &str, status: ItemStatus) -> bool {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Count plus previews of the first `n` items, taken under one read lock.
    pub async fn snapshot(&self, n: usize) -> QueueSnapshot {
        let items = self.items.read().await;
        QueueSnapshot {
            count: items.len(),
            top: items.iter().take(n).map(QueueItem::preview).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, priority: i32) -> QueueItem {
        let mut item = QueueItem::new(id, "user", ItemKind::Text);
        item.priority = priority;
        item
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let queue = PriorityQueue::new();
        assert!(queue.peek().await.is_none());
        assert!(queue.dequeue().await.is_none());
        assert!(!queue.remove("missing").await);
        assert!(!queue.update_status("missing", ItemStatus::Failed).await);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = PriorityQueue::new();
        queue.enqueue(item("a", 0)).await;
        queue.enqueue(item("b", 10)).await;
        queue.enqueue(item("c", 0)).await;
        queue.enqueue(item("d", 10)).await;
        queue.enqueue(item("e", 5)).await;

        let ids: Vec<String> = queue.top_n(10).await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b", "d", "e", "a", "c"]);
    }

    #[tokio::test]
    async fn test_peek_is_max_priority_earliest() {
        let queue = PriorityQueue::new();
        for (id, priority) in [("x", 1), ("y", 3), ("z", 3), ("w", 2)] {
            queue.enqueue(item(id, priority)).await;
        }
        let mut order = Vec::new();
        while let Some(head) = queue.peek().await {
            let taken = queue.dequeue().await.unwrap();
            assert_eq!(head.id, taken.id);
            assert_eq!(taken.status, ItemStatus::Processing);
            order.push(taken.id);
        }
        assert_eq!(order, vec!["y", "z", "w", "x"]);
    }

    #[tokio::test]
    async fn test_dequeued_item_not_preempted() {
        let queue = PriorityQueue::new();
        queue.enqueue(item("low", 0)).await;
        let taken = queue.dequeue().await.unwrap();
        queue.enqueue(item("high", 10)).await;
        assert_eq!(taken.id, "low");
        assert_eq!(queue.peek().await.unwrap().id, "high");
    }

    #[tokio::test]
    async fn test_enqueue_then_remove_restores_size() {
        let queue = PriorityQueue::new();
        queue.enqueue(item("a", 0)).await;
        let before = queue.len().await;
        queue.enqueue(item("x", 10)).await;
        assert!(queue.remove("x").await);
        assert_eq!(queue.len().await, before);
        assert!(!queue.remove("x").await);
    }

    #[tokio::test]
    async fn test_duplicate_id_replaces() {
        let queue = PriorityQueue::new();
        queue.enqueue(item("a", 0)).await;
        queue.enqueue(item("a", 10)).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.peek().await.unwrap().priority, 10);
    }

    #[tokio::test]
    async fn test_top_n_is_stable_snapshot() {
        let queue = PriorityQueue::new();
        for i in 0..5 {
            queue.enqueue(item(&format!("i{i}"), 0)).await;
        }
        let first = queue.top_n(3).await;
        let second = queue.top_n(3).await;
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(queue.top_n(99).await.len(), 5);
    }

    #[tokio::test]
    async fn test_update_status_and_enqueue_stamps() {
        let queue = PriorityQueue::new();
        let mut raw = item("a", 0);
        raw.status = ItemStatus::Failed;
        let stored = queue.enqueue(raw).await;
        assert_eq!(stored.status, ItemStatus::Queued);
        assert!(queue.update_status("a", ItemStatus::Completed).await);
        assert_eq!(queue.peek().await.unwrap().status, ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_snapshot_previews() {
        let queue = PriorityQueue::new();
        queue
            .enqueue(QueueItem::new("t", "u1", ItemKind::Text).with_text(Some("夜景".into())))
            .await;
        queue.enqueue(QueueItem::new("d", "u2", ItemKind::Dialogue)).await;
        let snapshot = queue.snapshot(3).await;
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.top, vec!["dialogue".to_string(), "夜景".to_string()]);
    }

    #[test]
    fn test_dialogue_items_get_dialogue_priority() {
        assert_eq!(QueueItem::new("d", "u", ItemKind::Dialogue).priority, DIALOGUE_PRIORITY);
        assert_eq!(QueueItem::new("t", "u", ItemKind::Audio).priority, DEFAULT_PRIORITY);
    }
}
