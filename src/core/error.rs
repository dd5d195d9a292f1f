//! 错误类型
//!
//! 按关注点划分：Service（后端调用）、Plugin（加载/保存）、Storage（命名空间 blob 读写）。
//! 中枢对所有错误一律「记录并继续」，没有进程级致命错误。

use thiserror::Error;

use crate::store::StoreError;

/// 聊天后端调用错误
#[derive(Error, Debug)]
pub enum ServiceError {
    /// 已经在该频道/服务器中；调用方应给出提示性回复而非报错
    #[error("Already joined")]
    AlreadyJoined,

    #[error("Service not connected: {0}")]
    NotConnected(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 插件加载/保存错误
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 注册阶段错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service already registered: {0}")]
    DuplicateService(String),

    #[error("Service not registered: {0}")]
    UnknownService(String),

    #[error("Plugin {plugin} already registered on service {service}")]
    DuplicatePlugin { service: String, plugin: String },
}

/// 插件 blob 读写错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
