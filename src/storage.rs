// 该文件是 Shaowang （哨望） 项目的一部分。
// src/storage.rs - 对象存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod directory_store;
pub use self::directory_store::{DirectoryObjectStore, DirectoryObjectStoreError};

/// 原始图像与标注图像的存取。单键强一致。
pub trait ObjectStore {
  type Error: std::error::Error + Send + Sync + 'static;

  fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Self::Error>;

  /// 返回对象位置
  fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, Self::Error>;

  /// 对象位置，不检查对象是否存在
  fn location(&self, bucket: &str, key: &str) -> String;
}

#[derive(Error, Debug)]
pub enum MemoryObjectStoreError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("对象不存在: {bucket}/{key}")]
  NotFound { bucket: String, key: String },
}

/// 进程内对象存储，位置形如 `memory://{bucket}/{key}`
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
  objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
    let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
    objects.get(&(bucket.to_string(), key.to_string())).cloned()
  }

  pub fn len(&self) -> usize {
    self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl FromUrlWithScheme for MemoryObjectStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryObjectStore {
  type Error = MemoryObjectStoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(MemoryObjectStoreError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new())
  }
}

impl ObjectStore for MemoryObjectStore {
  type Error = MemoryObjectStoreError;

  fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Self::Error> {
    self.get(bucket, key).ok_or_else(|| MemoryObjectStoreError::NotFound {
      bucket: bucket.to_string(),
      key: key.to_string(),
    })
  }

  fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, Self::Error> {
    let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
    objects.insert((bucket.to_string(), key.to_string()), bytes.to_vec());
    Ok(self.location(bucket, key))
  }

  fn location(&self, bucket: &str, key: &str) -> String {
    format!("{}://{bucket}/{key}", Self::SCHEME)
  }
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
  #[error("目录存储错误: {0}")]
  Directory(#[from] DirectoryObjectStoreError),
  #[error("内存存储错误: {0}")]
  Memory(#[from] MemoryObjectStoreError),
  #[error("不支持的对象存储方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的对象存储后端
pub enum ObjectStoreBackend {
  Directory(DirectoryObjectStore),
  Memory(MemoryObjectStore),
}

impl FromUrl for ObjectStoreBackend {
  type Error = ObjectStoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryObjectStore::SCHEME => Ok(ObjectStoreBackend::Directory(
        DirectoryObjectStore::from_url(url)?,
      )),
      MemoryObjectStore::SCHEME => Ok(ObjectStoreBackend::Memory(MemoryObjectStore::from_url(
        url,
      )?)),
      other => Err(ObjectStoreError::SchemeMismatch(other.to_string())),
    }
  }
}

impl ObjectStore for ObjectStoreBackend {
  type Error = ObjectStoreError;

  fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Self::Error> {
    match self {
      ObjectStoreBackend::Directory(store) => Ok(store.download(bucket, key)?),
      ObjectStoreBackend::Memory(store) => Ok(store.download(bucket, key)?),
    }
  }

  fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, Self::Error> {
    match self {
      ObjectStoreBackend::Directory(store) => Ok(store.upload(bucket, key, bytes)?),
      ObjectStoreBackend::Memory(store) => Ok(store.upload(bucket, key, bytes)?),
    }
  }

  fn location(&self, bucket: &str, key: &str) -> String {
    match self {
      ObjectStoreBackend::Directory(store) => store.location(bucket, key),
      ObjectStoreBackend::Memory(store) => store.location(bucket, key),
    }
  }
}
