//! 核心：消息模型、Service/Plugin 能力接口、中枢（注册、分发、持久化、关闭）

pub mod bot;
pub mod builder;
pub mod error;
pub mod message;
pub mod metrics;
pub mod plugin;
pub mod service;
pub mod shutdown;
pub mod storage;

pub use bot::{Bot, SaveReport, ServiceState};
pub use builder::BotBuilder;
pub use error::{PluginError, RegistryError, ServiceError, StorageError};
pub use message::{Message, MessageKind};
pub use metrics::{format_uptime, BotMetrics};
pub use plugin::{Plugin, SimplePlugin};
pub use service::{
    send_lines, AppAuthorization, MessageStream, Presence, PresenceEvent, PresenceFeed, Service,
    UserDirectory,
};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use storage::BlobStorage;
