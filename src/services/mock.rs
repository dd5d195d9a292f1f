//! Mock 后端（用于测试，无需网络）
//!
//! 消息由测试通过 `push` 注入；所有发出的内容记录在内存中，可用 `sent` / `wait_for_sent` 检查。

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::core::{
    AppAuthorization, Message, MessageStream, PresenceEvent, PresenceFeed, Service, ServiceError,
    UserDirectory,
};

/// Mock 机器人自身的用户 ID
pub const MOCK_SELF_ID: &str = "mock-bot";

/// 记录下来的一次发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Message { channel: String, text: String },
    File { channel: String, filename: String, data: Vec<u8> },
    Private { user_id: String, text: String },
}

impl SentMessage {
    /// 文本内容（文件为 UTF-8 解码后的内容）
    pub fn text(&self) -> String {
        match self {
            SentMessage::Message { text, .. } | SentMessage::Private { text, .. } => text.clone(),
            SentMessage::File { data, .. } => String::from_utf8_lossy(data).into_owned(),
        }
    }
}

/// Mock 后端
pub struct MockService {
    name: String,
    user_name: String,
    prefix: String,
    multiline: bool,
    fail_open: bool,
    owner_id: Option<String>,
    private_channels: HashSet<String>,
    unreachable: HashSet<String>,
    authorize_url: Option<String>,
    avatars: Option<HashMap<String, String>>,
    presence: bool,
    joined: Mutex<HashSet<String>>,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
    presence_subscribers: Mutex<Vec<mpsc::UnboundedSender<PresenceEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    sent_notify: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockService {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            name: name.into(),
            user_name: "mockbot".to_string(),
            prefix: "!".to_string(),
            multiline: true,
            fail_open: false,
            owner_id: None,
            private_channels: HashSet::new(),
            unreachable: HashSet::new(),
            authorize_url: None,
            avatars: None,
            presence: false,
            joined: Mutex::new(HashSet::new()),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            presence_subscribers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
        }
    }

    /// open 返回错误
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_multiline(mut self, multiline: bool) -> Self {
        self.multiline = multiline;
        self
    }

    pub fn with_owner(mut self, user_id: impl Into<String>) -> Self {
        self.owner_id = Some(user_id.into());
        self
    }

    /// 把频道标记为私聊频道
    pub fn with_private_channel(mut self, channel: impl Into<String>) -> Self {
        self.private_channels.insert(channel.into());
        self
    }

    /// 预先加入的频道/服务器；再次 join 会得到 AlreadyJoined
    pub fn with_joined(self, target: impl Into<String>) -> Self {
        lock(&self.joined).insert(target.into());
        self
    }

    /// join 该目标时返回传输错误
    pub fn with_unreachable(mut self, target: impl Into<String>) -> Self {
        self.unreachable.insert(target.into());
        self
    }

    /// 提供 OAuth 授权链接能力
    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = Some(url.into());
        self
    }

    /// 提供用户目录能力并登记一个头像
    pub fn with_avatar(mut self, user_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.avatars
            .get_or_insert_with(HashMap::new)
            .insert(user_id.into(), url.into());
        self
    }

    /// 提供在线状态订阅能力
    pub fn with_presence(mut self) -> Self {
        self.presence = true;
        self
    }

    /// 注入一条入站消息
    pub fn push(&self, message: Message) {
        let guard = lock(&self.sender);
        let Some(tx) = guard.as_ref() else {
            tracing::warn!("Mock service {} stream already closed", self.name);
            return;
        };
        if let Err(e) = tx.try_send(message) {
            tracing::warn!("Mock service {} dropped message: {}", self.name, e);
        }
    }

    /// 关闭消息流，监听循环随之结束
    pub fn close_stream(&self) {
        lock(&self.sender).take();
    }

    /// 向所有订阅者推送在线状态事件
    pub fn emit_presence(&self, event: PresenceEvent) {
        lock(&self.presence_subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// 等到至少发出 count 条内容（最多 2 秒），返回当前记录
    pub async fn wait_for_sent(&self, count: usize) -> Vec<SentMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let notified = self.sent_notify.notified();
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent();
            }
        }
    }

    fn record(&self, sent: SentMessage) {
        lock(&self.sent).push(sent);
        self.sent_notify.notify_waiters();
    }
}

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &str {
        &self.name
    }

    fn user_name(&self) -> &str {
        &self.user_name
    }

    async fn open(&self) -> Result<MessageStream, ServiceError> {
        if self.fail_open {
            return Err(ServiceError::NotConnected(format!("{} refused connection", self.name)));
        }
        lock(&self.receiver)
            .take()
            .ok_or_else(|| ServiceError::Transport(format!("{} already opened", self.name)))
    }

    async fn join(&self, target: &str) -> Result<(), ServiceError> {
        if self.unreachable.contains(target) {
            return Err(ServiceError::Transport(format!("cannot reach {}", target)));
        }
        if !lock(&self.joined).insert(target.to_string()) {
            return Err(ServiceError::AlreadyJoined);
        }
        Ok(())
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), ServiceError> {
        self.record(SentMessage::Message {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_file(&self, channel: &str, filename: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        self.record(SentMessage::File {
            channel: channel.to_string(),
            filename: filename.to_string(),
            data,
        });
        Ok(())
    }

    async fn private_message(&self, user_id: &str, text: &str) -> Result<(), ServiceError> {
        self.record(SentMessage::Private {
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn typing(&self, _channel: &str) {}

    fn is_self(&self, message: &Message) -> bool {
        message.user_id == MOCK_SELF_ID
    }

    fn is_private(&self, message: &Message) -> bool {
        self.private_channels.contains(&message.channel_id)
    }

    fn is_owner(&self, message: &Message) -> bool {
        self.owner_id.as_deref() == Some(message.user_id.as_str())
    }

    fn channel_count(&self) -> usize {
        lock(&self.joined).len()
    }

    fn command_prefix(&self) -> &str {
        &self.prefix
    }

    fn supports_multiline(&self) -> bool {
        self.multiline
    }

    fn presence_feed(&self) -> Option<&dyn PresenceFeed> {
        if self.presence {
            Some(self)
        } else {
            None
        }
    }

    fn app_authorization(&self) -> Option<&dyn AppAuthorization> {
        if self.authorize_url.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn user_directory(&self) -> Option<&dyn UserDirectory> {
        if self.avatars.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl PresenceFeed for MockService {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PresenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.presence_subscribers).push(tx);
        rx
    }
}

impl AppAuthorization for MockService {
    fn authorize_url(&self) -> String {
        self.authorize_url.clone().unwrap_or_default()
    }
}

#[async_trait]
impl UserDirectory for MockService {
    async fn avatar_url(&self, user_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.avatars.as_ref().and_then(|m| m.get(user_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_already_joined() {
        let service = MockService::new("discord").with_joined("abc").with_unreachable("zzz");
        assert!(matches!(service.join("abc").await, Err(ServiceError::AlreadyJoined)));
        assert!(matches!(service.join("zzz").await, Err(ServiceError::Transport(_))));
        service.join("def").await.unwrap();
        assert_eq!(service.channel_count(), 2);
    }

    #[tokio::test]
    async fn test_open_once() {
        let service = MockService::new("irc");
        let mut stream = service.open().await.unwrap();
        assert!(service.open().await.is_err());

        service.push(Message::new("c", "u", "n", "hi"));
        service.close_stream();
        assert_eq!(stream.recv().await.unwrap().text, "hi");
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_capability_probes() {
        let plain = MockService::new("irc");
        assert!(plain.presence_feed().is_none());
        assert!(plain.app_authorization().is_none());
        assert!(plain.user_directory().is_none());

        let rich = MockService::new("discord")
            .with_presence()
            .with_authorize_url("https://example.com/oauth")
            .with_avatar("u1", "https://example.com/u1.png");
        assert!(rich.presence_feed().is_some());
        assert_eq!(
            rich.app_authorization().map(|a| a.authorize_url()),
            Some("https://example.com/oauth".to_string())
        );
        assert!(rich.user_directory().is_some());
    }

    #[tokio::test]
    async fn test_wait_for_sent() {
        let service = std::sync::Arc::new(MockService::new("irc"));
        let s = std::sync::Arc::clone(&service);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            s.send_message("c", "late").await.unwrap();
        });
        let sent = service.wait_for_sent(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text(), "late");
    }
}
