//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 本模块提供：
//! - 按命名空间（sled Tree）隔离的键值存储
//! - JSON 序列化的值
//! - 前缀扫描

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ChatSyncError, Result};

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: PathBuf,
    db: Arc<Db>,
    tree: Tree,
}

impl KvStore {
    /// 打开 `<base_path>/kv` 下的数据库，并使用 `namespace` 对应的 Tree
    pub async fn open(base_path: &Path, namespace: &str) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| ChatSyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 旧实例可能刚释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut attempt = 0;
        let db = loop {
            match sled::open(&kv_path) {
                Ok(db) => break db,
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(ChatSyncError::KvStore(format!("打开 sled 数据库失败: {}", e)));
                    }
                    debug!("sled 被占用，第 {} 次重试", attempt);
                    tokio::time::sleep(tokio::time::Duration::from_millis(RETRY_DELAY_MS << attempt)).await;
                }
            }
        };

        let tree = db
            .open_tree(namespace)
            .map_err(|e| ChatSyncError::KvStore(format!("打开 Tree 失败: {}", e)))?;

        info!("KV 存储已打开: path={}, namespace={}", kv_path.display(), namespace);

        Ok(Self {
            base_path,
            db: Arc::new(db),
            tree,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 设置键值对
    pub async fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ChatSyncError::Serialization(format!("序列化值失败: {}", e)))?;
        self.tree
            .insert(key, bytes)
            .map_err(|e| ChatSyncError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取值
    pub async fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        match self.tree.get(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| ChatSyncError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键，返回是否存在
    pub async fn remove<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.tree.remove(key)?.is_some())
    }

    /// 按前缀扫描
    pub async fn scan_prefix<V: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, V)>> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let value = serde_json::from_slice(&bytes)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
