//! 插件的二级持久化：嵌入式有序 KV 存储

pub mod kv;

pub use kv::{KvStore, WriteBatch};

use thiserror::Error;

/// KV 存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is closed")]
    Closed,
}
