//! 单个频道的有界消息日志

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::{Message, MessageKind};

/// 最近 capacity 条 Create 消息；Update 按 message_id 原地替换，Delete 按 message_id 删除，
/// 找不到对应 ID 时忽略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLog {
    capacity: usize,
    messages: VecDeque<Message>,
}

impl ChannelLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    pub fn apply(&mut self, message: &Message) {
        match message.kind {
            MessageKind::Create => {
                self.messages.push_back(message.clone());
                while self.messages.len() > self.capacity {
                    self.messages.pop_front();
                }
            }
            MessageKind::Update => {
                if let Some(slot) = self.messages.iter_mut().find(|m| m.message_id == message.message_id) {
                    *slot = message.clone();
                }
            }
            MessageKind::Delete => {
                if let Some(i) = self.messages.iter().position(|m| m.message_id == message.message_id) {
                    self.messages.remove(i);
                }
            }
        }
    }

    /// 调整容量（加载旧快照后使用），多出的旧消息被丢弃
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// 最近 n 条（按时间顺序）
    pub fn last(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }
}
