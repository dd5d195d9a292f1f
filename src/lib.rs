//! chathub - 多后端聊天机器人中枢
//!
//! 模块划分：
//! - **commands**: 命令路由（前缀、私聊、大小写不敏感匹配）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 消息模型、Service / Plugin 接口、Bot 中枢（注册、分发、持久化、关闭）
//! - **observability**: 日志初始化
//! - **plugins**: 内置插件（help、stats、invite、avatar、comic、played）
//! - **services**: 终端后端与 Mock 后端
//! - **store**: 插件的嵌入式 KV 存储

pub mod commands;
pub mod config;
pub mod core;
pub mod observability;
pub mod plugins;
pub mod services;
pub mod store;

pub use crate::commands::{CommandContext, CommandHandler, CommandHelp, CommandPlugin};
pub use crate::core::{Bot, BotBuilder, Message, MessageKind, Plugin, Service};
