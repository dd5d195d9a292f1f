//! 入站消息模型
//!
//! 由 Service 产生、插件消费的不可变快照；分发时包在 `Arc` 中，插件需要可变历史时自行复制。

use serde::{Deserialize, Serialize};

/// 消息事件类型：决定插件自有日志的处理方式（追加 / 按 message_id 替换 / 按 message_id 删除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Create,
    Update,
    Delete,
}

/// 一条入站聊天事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 频道 ID（私聊时为私聊频道）
    pub channel_id: String,
    /// 发送者 ID
    pub user_id: String,
    /// 发送者显示名
    pub user_name: String,
    /// 发送者头像引用（URL 或后端自定义引用）
    #[serde(default)]
    pub user_avatar: String,
    /// 已清洗的文本（如 mention 已替换为名称）
    pub text: String,
    /// 原始文本
    pub raw_text: String,
    /// 后端消息 ID
    pub message_id: String,
    #[serde(default)]
    pub kind: MessageKind,
}

impl Message {
    /// 新建一条 Create 消息，raw_text 与 text 相同，message_id 随机生成
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_avatar: String::new(),
            raw_text: text.clone(),
            text,
            message_id: uuid::Uuid::new_v4().to_string(),
            kind: MessageKind::Create,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.user_avatar = avatar.into();
        self
    }

    /// 单独设置原始文本（text 保持不变）
    pub fn with_raw_text(mut self, raw: impl Into<String>) -> Self {
        self.raw_text = raw.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults() {
        let m = Message::new("c1", "u1", "alice", "hello");
        assert_eq!(m.kind, MessageKind::Create);
        assert_eq!(m.raw_text, "hello");
        assert!(!m.message_id.is_empty());
    }

    #[test]
    fn test_message_kind_serde_default() {
        let json = r#"{"channel_id":"c","user_id":"u","user_name":"n","text":"t","raw_text":"t","message_id":"m"}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.kind, MessageKind::Create);
        assert_eq!(m.user_avatar, "");
    }
}
