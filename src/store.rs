//! 宿主提供给插件的键值存储。
//!
//! 插件只依赖 `get / set / delete` 三个操作，不做事务，后写覆盖先写。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::write_atomic;

/// 按键读写字符串值的存储
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 读取值，不存在时返回 `default`
    async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// 删除键，返回删除前是否存在
    async fn delete(&self, key: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// 以单个 TOML 文件持久化的存储
///
/// 读操作走内存缓存，每次修改后整体原子写回磁盘。
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<StoreFile>,
}

impl FileStore {
    /// 打开存储文件，文件不存在时从空表开始
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("读取存储文件失败: {}", path.display()))?;
            toml::from_str::<StoreFile>(&content)
                .with_context(|| format!("解析存储文件失败: {}", path.display()))?
        } else {
            StoreFile::default()
        };

        Ok(Self {
            path,
            cache: RwLock::new(file),
        })
    }

    async fn flush(&self, data: &StoreFile) -> Result<()> {
        let content = toml::to_string_pretty(data).context("序列化存储失败")?;
        write_atomic(self.path.clone(), content)
            .await
            .with_context(|| format!("写入存储文件失败: {}", self.path.display()))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.entries.insert(key.to_string(), value.to_string());
        self.flush(&cache).await?;
        debug!(target: "Store", key, "写入");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cache = self.cache.write().await;
        let existed = cache.entries.remove(key).is_some();
        if existed {
            self.flush(&cache).await?;
            debug!(target: "Store", key, "删除");
        }
        Ok(existed)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// 纯内存存储，进程退出即丢失
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
