//! 插件 blob 持久化：`<data_dir>/<service>/<plugin>`
//!
//! 每个服务一个目录、每个插件一个文件；文件不存在表示首次运行。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::StorageError;

/// 命名空间 blob 存储
#[derive(Debug, Clone)]
pub struct BlobStorage {
    root: PathBuf,
}

impl BlobStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 某个服务的数据目录（插件的二级存储也放在这里）
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    pub fn path(&self, service: &str, plugin: &str) -> PathBuf {
        self.service_dir(service).join(plugin)
    }

    /// 读取 blob；文件不存在时返回 None
    pub async fn read(&self, service: &str, plugin: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(service, plugin);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// 写入 blob：先写临时文件再 rename；每次写入的临时文件名唯一，并发写入互不覆盖
    pub async fn write(&self, service: &str, plugin: &str, data: &[u8]) -> Result<(), StorageError> {
        let dir = self.service_dir(service);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;

        let path = self.path(service, plugin);
        let tmp = dir.join(format!(".{}.{}.tmp", plugin, uuid::Uuid::new_v4()));
        let to_err = |source| StorageError::Write {
            path: path.display().to_string(),
            source,
        };
        let written = match tokio::fs::write(&tmp, data).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written.map_err(to_err)
    }
}
