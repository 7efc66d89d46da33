//! Base64 缓存模块
//!
//! 原始 `src`（解析前）→ PNG Data URI。条目首次写入后不再覆盖，也不淘汰，
//! 生命周期与插件实例一致。克隆得到的句柄共享同一份数据。
//!
//! 懒加载另有一组“进行中”键：同一 `src` 同时只允许一个加载任务。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::image_handler::ImageError;

#[derive(Debug, Clone, Default)]
pub struct Base64Cache {
    entries: Arc<RwLock<HashMap<String, String>>>,
    pending: Arc<Mutex<HashSet<String>>>,
}

/// 懒加载占位：存活期间同一 `src` 不会再启动新的加载，Drop 时释放。
#[must_use]
#[derive(Debug)]
pub struct FillGuard {
    pending: Arc<Mutex<HashSet<String>>>,
    src: String,
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.src);
        }
    }
}

impl Base64Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, src: &str) -> Result<Option<String>, ImageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ImageError::Cache(format!("读取缓存失败：{}", e)))?;
        Ok(entries.get(src).cloned())
    }

    pub fn contains(&self, src: &str) -> Result<bool, ImageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ImageError::Cache(format!("读取缓存失败：{}", e)))?;
        Ok(entries.contains_key(src))
    }

    /// 写入条目，返回是否真正写入。
    ///
    /// 已存在的键保持原值；空的 Data URI（“跳过”结果）不写入。
    pub fn insert_if_absent(&self, src: &str, data_uri: String) -> Result<bool, ImageError> {
        if data_uri.is_empty() {
            return Ok(false);
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| ImageError::Cache(format!("写入缓存失败：{}", e)))?;

        if entries.contains_key(src) {
            return Ok(false);
        }
        entries.insert(src.to_string(), data_uri);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 为 `src` 登记一次懒加载。
    ///
    /// 已缓存或已有加载在途时返回 `None`。
    pub fn begin_fill(&self, src: &str) -> Result<Option<FillGuard>, ImageError> {
        if self.contains(src)? {
            return Ok(None);
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ImageError::Cache(format!("登记懒加载失败：{}", e)))?;
        if !pending.insert(src.to_string()) {
            return Ok(None);
        }

        Ok(Some(FillGuard {
            pending: Arc::clone(&self.pending),
            src: src.to_string(),
        }))
    }

    pub fn is_filling(&self, src: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains(src))
            .unwrap_or(false)
    }

    /// 当前所有条目的拷贝，供序列化时一次性读取。
    pub fn snapshot(&self) -> Result<HashMap<String, String>, ImageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ImageError::Cache(format!("读取缓存失败：{}", e)))?;
        Ok(entries.clone())
    }
}
