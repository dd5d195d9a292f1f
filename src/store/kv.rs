//! 嵌入式有序 KV 存储（SQLite 单表）
//!
//! 键为外部实体 ID（如 user id），值为序列化后的记录。批量写入在一个事务内完成，
//! 用于把高频事件攒成一次落盘。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StoreError;

enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// 一组写操作，作为一个事务提交
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key.into(), value));
    }

    /// 以 JSON 编码写入
    pub fn put_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), StoreError> {
        self.put(key, serde_json::to_vec(value)?);
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// KV 存储句柄；在插件 load 中打开一次，通过 Bot 关闭回调关闭一次
pub struct KvStore {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl KvStore {
    /// 打开（不存在则创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            );
            "#,
        )?;
        if let Some(p) = &path {
            tracing::debug!("KV store opened at {:?}", p);
        }
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.conn();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// 读取并按 JSON 解码
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let guard = self.conn();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// 在一个事务内提交整批写操作
    pub fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = self.conn();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            let mut delete = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for op in &batch.ops {
                match op {
                    BatchOp::Put(key, value) => {
                        put.execute(rusqlite::params![key, value])?;
                    }
                    BatchOp::Delete(key) => {
                        delete.execute([key])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// 所有键，按字典序
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.conn();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let guard = self.conn();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn is_closed(&self) -> bool {
        self.conn().is_none()
    }

    /// 关闭连接；之后的读写返回 `StoreError::Closed`
    pub fn close(&self) -> Result<(), StoreError> {
        let Some(conn) = self.conn().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let store = KvStore::open_in_memory().unwrap();
        assert!(store.get("a").unwrap().is_none());
        store.put("a", b"1").unwrap();
        store.put("a", b"2").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"2");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_batch_and_ordered_keys() {
        let store = KvStore::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch.put("c", b"3".to_vec());
        batch.put("a", b"1".to_vec());
        batch.put("b", b"2".to_vec());
        batch.delete("c");
        assert_eq!(batch.len(), 4);
        store.write(batch).unwrap();

        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_json_helpers() {
        let store = KvStore::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch.put_json("k", &vec![1, 2, 3]).unwrap();
        store.write(batch).unwrap();
        let v: Vec<i32> = store.get_json("k").unwrap().unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn test_close_then_access_fails() {
        let store = KvStore::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get("a"), Err(StoreError::Closed)));
        // 重复关闭无副作用
        store.close().unwrap();
    }

    #[test]
    fn test_reopen_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc").join("PlayedDB");
        {
            let store = KvStore::open(&path).unwrap();
            store.put("u1", b"x").unwrap();
            store.close().unwrap();
        }
        let store = KvStore::open(&path).unwrap();
        assert_eq!(store.get("u1").unwrap().unwrap(), b"x");
    }
}
