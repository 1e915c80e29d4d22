// 该文件是 Shaowang （哨望） 项目的一部分。
// src/state/directory_store.rs - 基于目录的状态存储
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

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{Item, KeyValueStore};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum DirectoryStoreError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每张表一个子目录，每个键一个 JSON 文件。
///
/// `folder:///var/lib/shaowang/tables`
pub struct DirectoryStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryStore {
  type Error = DirectoryStoreError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryStoreError::SchemeMismatch(uri.scheme().to_string()));
    }
    Ok(Self::new(uri.path()))
  }
}

impl DirectoryStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  // 表名和键都经过编码，不会逃出根目录
  fn item_path(&self, table: &str, key: &str) -> PathBuf {
    self
      .directory
      .join(urlencoding::encode(table).as_ref())
      .join(format!("{}.json", urlencoding::encode(key)))
  }
}

impl KeyValueStore for DirectoryStore {
  type Error = DirectoryStoreError;

  fn get(&self, table: &str, key: &str) -> Result<Option<Item>, Self::Error> {
    let path = self.item_path(table, key);
    match std::fs::read(&path) {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Self::Error> {
    let path = self.item_path(table, key);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    // 先写临时文件再改名，读者不会看到写了一半的记录
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, serde_json::to_vec_pretty(&item)?)?;
    std::fs::rename(&staging, &path)?;
    debug!("写入记录: {}", path.display());
    Ok(())
  }

  fn list(&self, table: &str) -> Result<Vec<Item>, Self::Error> {
    let directory = self.directory.join(urlencoding::encode(table).as_ref());
    let entries = match std::fs::read_dir(&directory) {
      Ok(entries) => entries,
      Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(err) => return Err(err.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
      let path = entry?.path();
      // 跳过写了一半的 .json.tmp
      if path.extension().is_some_and(|ext| ext == "json") {
        paths.push(path);
      }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
      items.push(serde_json::from_slice(&std::fs::read(&path)?)?);
    }
    Ok(items)
  }
}
