// 该文件是 Shaowang （哨望） 项目的一部分。
// src/storage/directory_store.rs - 基于目录的对象存储
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

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use super::ObjectStore;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum DirectoryObjectStoreError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("非法的对象路径: {bucket}/{key}")]
  InvalidKey { bucket: String, key: String },
  #[error("I/O 错误 ({path}): {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// 桶对应根目录下的子目录，对象键对应相对路径。
///
/// `folder:///var/lib/shaowang/buckets`
pub struct DirectoryObjectStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryObjectStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryObjectStore {
  type Error = DirectoryObjectStoreError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryObjectStoreError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }
    Ok(Self::new(uri.path()))
  }
}

impl DirectoryObjectStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, DirectoryObjectStoreError> {
    let relative = Path::new(bucket).join(key);
    let plain = !bucket.is_empty()
      && !key.is_empty()
      && relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
      return Err(DirectoryObjectStoreError::InvalidKey {
        bucket: bucket.to_string(),
        key: key.to_string(),
      });
    }
    Ok(self.directory.join(relative))
  }
}

impl ObjectStore for DirectoryObjectStore {
  type Error = DirectoryObjectStoreError;

  fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Self::Error> {
    let path = self.object_path(bucket, key)?;
    std::fs::read(&path).map_err(|source| DirectoryObjectStoreError::IoError { path, source })
  }

  fn upload(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, Self::Error> {
    let path = self.object_path(bucket, key)?;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| DirectoryObjectStoreError::IoError {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    std::fs::write(&path, bytes).map_err(|source| DirectoryObjectStoreError::IoError {
      path: path.clone(),
      source,
    })?;

    info!("保存对象到文件: {}", path.display());
    Ok(self.location(bucket, key))
  }

  fn location(&self, bucket: &str, key: &str) -> String {
    let path = self.directory.join(bucket).join(key);
    Url::from_file_path(&path)
      .map(String::from)
      .unwrap_or_else(|()| path.display().to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upload_then_download() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path());

    let location = store.upload("content", "images/a.png", b"png bytes").unwrap();
    assert!(location.starts_with("file://"));
    assert!(location.ends_with("/content/images/a.png"));
    assert_eq!(store.download("content", "images/a.png").unwrap(), b"png bytes");
  }

  #[test]
  fn missing_object_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path());
    assert!(matches!(
      store.download("b", "nope.jpg"),
      Err(DirectoryObjectStoreError::IoError { .. })
    ));
  }

  #[test]
  fn traversal_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(dir.path());
    for (bucket, key) in [("b", "../../etc/passwd"), ("..", "x"), ("b", "/abs"), ("", "x")] {
      assert!(matches!(
        store.download(bucket, key),
        Err(DirectoryObjectStoreError::InvalidKey { .. })
      ));
    }
  }
}
