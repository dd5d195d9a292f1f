//! Service（聊天后端）能力接口
//!
//! 中枢与插件只依赖此 trait，不依赖任何具体后端类型；Discord / IRC / Slack 等各自实现一份。
//! 后端特有能力（在线状态、OAuth 授权链接、用户目录）通过「能力探测」方法按需获取，
//! 默认返回 None，核心接口保持封闭。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::ServiceError;
use super::message::Message;

/// 后端产生的消息流；中枢在 open 时接管，直到后端关闭发送端
pub type MessageStream = mpsc::Receiver<Message>;

/// 聊天后端 trait
#[async_trait]
pub trait Service: Send + Sync {
    /// 服务名（唯一，同时作为持久化目录名）
    fn name(&self) -> &str;

    /// 机器人自身在该服务上的显示名
    fn user_name(&self) -> &str;

    /// 连接后端并返回消息流；中枢对每个服务只调用一次
    async fn open(&self) -> Result<MessageStream, ServiceError>;

    /// 加入频道/服务器；已在其中时返回 `ServiceError::AlreadyJoined`
    async fn join(&self, target: &str) -> Result<(), ServiceError>;

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), ServiceError>;

    async fn send_file(&self, channel: &str, filename: &str, data: Vec<u8>) -> Result<(), ServiceError>;

    async fn private_message(&self, user_id: &str, text: &str) -> Result<(), ServiceError>;

    /// 显示「正在输入」，失败静默
    async fn typing(&self, channel: &str);

    /// 消息是否由机器人自己发出
    fn is_self(&self, message: &Message) -> bool;

    /// 消息是否来自私聊频道
    fn is_private(&self, message: &Message) -> bool;

    /// 发送者是否为机器人所有者
    fn is_owner(&self, message: &Message) -> bool;

    /// 已连接的频道（或服务器）数
    fn channel_count(&self) -> usize;

    /// 公共频道中的命令前缀
    fn command_prefix(&self) -> &str;

    /// 是否支持多行消息；不支持时调用方需逐行发送
    fn supports_multiline(&self) -> bool;

    /// 在线状态订阅（如 Discord presence）
    fn presence_feed(&self) -> Option<&dyn PresenceFeed> {
        None
    }

    /// OAuth 授权链接（机器人通过授权而非邀请加入）
    fn app_authorization(&self) -> Option<&dyn AppAuthorization> {
        None
    }

    /// 用户目录（按 ID 查询其他用户）
    fn user_directory(&self) -> Option<&dyn UserDirectory> {
        None
    }
}

/// 一个用户的在线状态：当前活动（游戏等），None 表示无活动
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub user_id: String,
    pub activity: Option<String>,
}

impl Presence {
    pub fn new(user_id: impl Into<String>, activity: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            activity: activity.map(str::to_string),
        }
    }
}

/// 在线状态事件
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// 连接/服务器可用时的完整快照，应立即整批写入
    Snapshot(Vec<Presence>),
    /// 重连后的批量替换，高频，应排队
    Replace(Vec<Presence>),
    /// 单个用户的状态变更，应排队
    Update(Presence),
}

/// 在线状态订阅能力
pub trait PresenceFeed: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PresenceEvent>;
}

/// OAuth 授权链接能力
pub trait AppAuthorization: Send + Sync {
    fn authorize_url(&self) -> String;
}

/// 用户目录能力
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 查询用户头像 URL，用户不存在时返回 None
    async fn avatar_url(&self, user_id: &str) -> Result<Option<String>, ServiceError>;
}

/// 按服务能力发送多行文本：支持多行则一次发送，否则逐行发送，遇错停止
pub async fn send_lines(
    service: &dyn Service,
    channel: &str,
    lines: &[String],
) -> Result<(), ServiceError> {
    if service.supports_multiline() {
        return service.send_message(channel, &lines.join("\n")).await;
    }
    for line in lines {
        service.send_message(channel, line).await?;
    }
    Ok(())
}
