//! 有界消息历史
//!
//! 保留最近 N 条消息，超出容量时按 FIFO 淘汰最旧的消息

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::Message;

/// 默认历史容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// 消息历史缓冲区
pub struct MessageHistory {
    capacity: usize,
    entries: RwLock<VecDeque<Arc<Message>>>,
}

impl MessageHistory {
    /// 创建指定容量的历史缓冲区（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加消息，返回被淘汰的消息（如果有）
    pub async fn push(&self, message: Arc<Message>) -> Option<Arc<Message>> {
        let mut entries = self.entries.write().await;
        entries.push_back(message);
        if entries.len() > self.capacity {
            entries.pop_front()
        } else {
            None
        }
    }

    /// 最近 `limit` 条消息的快照
    pub async fn snapshot(&self, limit: usize) -> HistoryView {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        HistoryView {
            entries: entries.iter().skip(skip).cloned().collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// 历史快照
///
/// 有限且可重复遍历：`iter()` 每次都从最新的消息重新开始，
/// 遍历本身不会修改路由器状态
#[derive(Debug, Clone, Default)]
pub struct HistoryView {
    /// 按插入顺序（旧 -> 新）
    entries: Vec<Arc<Message>>,
}

impl HistoryView {
    /// 从新到旧惰性遍历
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator + '_ {
        self.entries.iter().rev().map(|m| &**m)
    }

    /// 按插入顺序（旧 -> 新）遍历
    pub fn chronological(&self) -> impl Iterator<Item = &Message> + '_ {
        self.entries.iter().map(|m| &**m)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 复制为从新到旧排列的消息列表
    pub fn to_vec(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a HistoryView {
    type Item = &'a Message;
    type IntoIter = std::iter::Map<
        std::iter::Rev<std::slice::Iter<'a, Arc<Message>>>,
        fn(&'a Arc<Message>) -> &'a Message,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .iter()
            .rev()
            .map(deref_entry as fn(&'a Arc<Message>) -> &'a Message)
    }
}

fn deref_entry(entry: &Arc<Message>) -> &Message {
    entry
}
