// 该文件是 Shaowang （哨望） 项目的一部分。
// src/state.rs - 键值状态存储
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

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{BoxError, FromUrl, FromUrlWithScheme, config::TableNames};

mod directory_store;
pub use self::directory_store::{DirectoryStore, DirectoryStoreError};

/// 一条记录：字段名到字符串值
pub type Item = BTreeMap<String, String>;

/// 主键字段名
pub const KEY_FIELD: &str = "id";

const LAST_INVOCATION_KEY: &str = "1";
const LAST_INVOCATION_FIELD: &str = "timestamp";
const PROMPT_ID_KEY: &str = "prompt_id";
const PROMPT_ID_FIELD: &str = "prompt_id";
const PROMPT_TEXT_FIELD: &str = "prompt";

/// 单键读写，不需要事务
pub trait KeyValueStore {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get(&self, table: &str, key: &str) -> Result<Option<Item>, Self::Error>;
  fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Self::Error>;
  /// 整表扫描，按键排序；只用于管理操作
  fn list(&self, table: &str) -> Result<Vec<Item>, Self::Error>;
}

/// 提示词表中的一行
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredPrompt {
  pub id: String,
  pub prompt: String,
}

#[derive(Error, Debug)]
pub enum StateError {
  #[error("状态存储访问失败: {0}")]
  Store(#[source] BoxError),
  #[error("记录 {key} 缺少字段 {field}")]
  MissingField { key: String, field: &'static str },
  #[error("记录 {key} 的字段 {field} 格式错误: {value:?}")]
  Malformed {
    key: String,
    field: &'static str,
    value: String,
  },
}

/// 查询结果的三种情形。
///
/// `NotFound` 与 `Failed` 在业务上都回退到默认值，但日志中需要区分。
#[derive(Debug)]
pub enum Lookup<T> {
  Found(T),
  NotFound,
  Failed(StateError),
}

impl<T> Lookup<T> {
  pub fn found(self) -> Option<T> {
    match self {
      Lookup::Found(value) => Some(value),
      _ => None,
    }
  }
}

/// 流水线状态的类型化访问层，不含业务逻辑
pub struct StateStore<'a, S> {
  store: &'a S,
  tables: &'a TableNames,
}

impl<'a, S: KeyValueStore> StateStore<'a, S> {
  pub fn new(store: &'a S, tables: &'a TableNames) -> Self {
    Self { store, tables }
  }

  pub fn tables(&self) -> &TableNames {
    self.tables
  }

  fn lookup_field(&self, table: &str, key: &str, field: &'static str) -> Lookup<String> {
    match self.store.get(table, key) {
      Ok(Some(mut item)) => match item.remove(field) {
        Some(value) => Lookup::Found(value),
        None => Lookup::Failed(StateError::MissingField {
          key: key.to_string(),
          field,
        }),
      },
      Ok(None) => Lookup::NotFound,
      Err(err) => Lookup::Failed(StateError::Store(Box::new(err))),
    }
  }

  fn put_field(
    &self,
    table: &str,
    key: &str,
    field: &'static str,
    value: String,
  ) -> Result<(), StateError> {
    let item = Item::from([
      (KEY_FIELD.to_string(), key.to_string()),
      (field.to_string(), value),
    ]);
    self.put_item(table, key, item)
  }

  pub fn put_item(&self, table: &str, key: &str, item: Item) -> Result<(), StateError> {
    self
      .store
      .put(table, key, item)
      .map_err(|err| StateError::Store(Box::new(err)))
  }

  pub fn last_invocation(&self) -> Lookup<DateTime<Utc>> {
    match self.lookup_field(&self.tables.util, LAST_INVOCATION_KEY, LAST_INVOCATION_FIELD) {
      Lookup::Found(raw) => match parse_timestamp(&raw) {
        Some(at) => Lookup::Found(at),
        None => Lookup::Failed(StateError::Malformed {
          key: LAST_INVOCATION_KEY.to_string(),
          field: LAST_INVOCATION_FIELD,
          value: raw,
        }),
      },
      Lookup::NotFound => Lookup::NotFound,
      Lookup::Failed(err) => Lookup::Failed(err),
    }
  }

  pub fn set_last_invocation(&self, at: DateTime<Utc>) -> Result<(), StateError> {
    self.put_field(
      &self.tables.util,
      LAST_INVOCATION_KEY,
      LAST_INVOCATION_FIELD,
      format_timestamp(at),
    )
  }

  pub fn active_prompt_id(&self) -> Lookup<String> {
    self.lookup_field(&self.tables.util, PROMPT_ID_KEY, PROMPT_ID_FIELD)
  }

  /// 切换当前提示词，不检查模板是否存在（缺失时按内置模板处理）
  pub fn select_prompt(&self, prompt_id: &str) -> Result<(), StateError> {
    self.put_field(
      &self.tables.util,
      PROMPT_ID_KEY,
      PROMPT_ID_FIELD,
      prompt_id.to_string(),
    )
  }

  pub fn prompt_text(&self, prompt_id: &str) -> Lookup<String> {
    self.lookup_field(&self.tables.prompt, prompt_id, PROMPT_TEXT_FIELD)
  }

  /// 新增或覆盖一个提示词模板
  pub fn put_prompt(&self, prompt_id: &str, text: &str) -> Result<(), StateError> {
    self.put_field(
      &self.tables.prompt,
      prompt_id,
      PROMPT_TEXT_FIELD,
      text.to_string(),
    )
  }

  /// 所有提示词模板；缺少正文的行跳过
  pub fn list_prompts(&self) -> Result<Vec<StoredPrompt>, StateError> {
    let items = self
      .store
      .list(&self.tables.prompt)
      .map_err(|err| StateError::Store(Box::new(err)))?;

    Ok(
      items
        .into_iter()
        .filter_map(|mut item| {
          let id = item.remove(KEY_FIELD)?;
          match item.remove(PROMPT_TEXT_FIELD) {
            Some(prompt) => Some(StoredPrompt { id, prompt }),
            None => {
              warn!("提示词 {} 缺少字段 {}，跳过", id, PROMPT_TEXT_FIELD);
              None
            }
          }
        })
        .collect(),
    )
  }

  pub fn item(&self, table: &str, key: &str) -> Lookup<Item> {
    match self.store.get(table, key) {
      Ok(Some(item)) => Lookup::Found(item),
      Ok(None) => Lookup::NotFound,
      Err(err) => Lookup::Failed(StateError::Store(Box::new(err))),
    }
  }
}

/// 时间戳以 Unix 秒（含小数）的字符串形式存储
pub fn format_timestamp(at: DateTime<Utc>) -> String {
  format!("{:.6}", at.timestamp_micros() as f64 / 1_000_000.0)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let secs: f64 = raw.trim().parse().ok()?;
  if !secs.is_finite() {
    return None;
  }
  let whole = secs.floor();
  let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
  DateTime::from_timestamp(whole as i64, nanos)
}

/// 进程内存储，用于测试与 `memory://`
#[derive(Debug, Default)]
pub struct MemoryStore {
  items: Mutex<HashMap<(String, String), Item>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl FromUrlWithScheme for MemoryStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryStore {
  type Error = StateBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StateBackendError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new())
  }
}

impl KeyValueStore for MemoryStore {
  type Error = Infallible;

  fn get(&self, table: &str, key: &str) -> Result<Option<Item>, Self::Error> {
    let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
    Ok(items.get(&(table.to_string(), key.to_string())).cloned())
  }

  fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Self::Error> {
    let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
    items.insert((table.to_string(), key.to_string()), item);
    Ok(())
  }

  fn list(&self, table: &str) -> Result<Vec<Item>, Self::Error> {
    let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
    let mut rows: Vec<(&String, &Item)> = items
      .iter()
      .filter(|((t, _), _)| t == table)
      .map(|((_, key), item)| (key, item))
      .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    Ok(rows.into_iter().map(|(_, item)| item.clone()).collect())
  }
}

#[derive(Error, Debug)]
pub enum StateBackendError {
  #[error("目录存储错误: {0}")]
  Directory(#[from] DirectoryStoreError),
  #[error("不支持的状态存储方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的状态存储后端
pub enum StateBackend {
  Directory(DirectoryStore),
  Memory(MemoryStore),
}

impl FromUrl for StateBackend {
  type Error = StateBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryStore::SCHEME => Ok(StateBackend::Directory(DirectoryStore::from_url(url)?)),
      MemoryStore::SCHEME => Ok(StateBackend::Memory(MemoryStore::from_url(url)?)),
      other => Err(StateBackendError::SchemeMismatch(other.to_string())),
    }
  }
}

impl KeyValueStore for StateBackend {
  type Error = StateBackendError;

  fn get(&self, table: &str, key: &str) -> Result<Option<Item>, Self::Error> {
    match self {
      StateBackend::Directory(store) => Ok(store.get(table, key)?),
      StateBackend::Memory(store) => match store.get(table, key) {
        Ok(item) => Ok(item),
        Err(never) => match never {},
      },
    }
  }

  fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Self::Error> {
    match self {
      StateBackend::Directory(store) => Ok(store.put(table, key, item)?),
      StateBackend::Memory(store) => match store.put(table, key, item) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
    }
  }

  fn list(&self, table: &str) -> Result<Vec<Item>, Self::Error> {
    match self {
      StateBackend::Directory(store) => Ok(store.list(table)?),
      StateBackend::Memory(store) => match store.list(table) {
        Ok(items) => Ok(items),
        Err(never) => match never {},
      },
    }
  }
}
