// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/record.rs - 分析结果记录
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

use chrono::{DateTime, Utc};
use tracing::info;

use crate::inference::Classification;
use crate::state::{
  Item, KEY_FIELD, KeyValueStore, Lookup, StateError, StateStore, format_timestamp,
};

/// 结果表中唯一一行的键，每次成功调用覆盖上一次
pub const LATEST_RECORD_ID: &str = "1";

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
  pub id: String,
  pub timestamp: DateTime<Utc>,
  pub caption: String,
  pub model_name: String,
  /// 标签检测原始响应 (JSON)
  pub raw_labels: String,
  /// 防护装备检测原始响应 (JSON)
  pub raw_ppe: String,
  pub source_location: String,
  pub annotated_location: String,
  pub classification: Classification,
}

impl IncidentRecord {
  pub fn to_item(&self) -> Item {
    Item::from([
      (KEY_FIELD.to_string(), self.id.clone()),
      ("timestamp".to_string(), format_timestamp(self.timestamp)),
      ("caption".to_string(), self.caption.clone()),
      ("image_caption_model".to_string(), self.model_name.clone()),
      ("rekognition_labels".to_string(), self.raw_labels.clone()),
      ("rekognition_ppe".to_string(), self.raw_ppe.clone()),
      ("s3_location".to_string(), self.source_location.clone()),
      ("front_s3_location".to_string(), self.annotated_location.clone()),
      ("classification".to_string(), self.classification.to_string()),
    ])
  }
}

pub struct Record<'a, S> {
  state: &'a StateStore<'a, S>,
}

impl<'a, S: KeyValueStore> Record<'a, S> {
  pub fn new(state: &'a StateStore<'a, S>) -> Self {
    Self { state }
  }

  /// 覆盖写入，不重试；失败由调用方决定
  pub fn persist(&self, record: &IncidentRecord) -> Result<(), StateError> {
    let table = &self.state.tables().result;
    self.state.put_item(table, &record.id, record.to_item())?;
    info!("分析结果已写入 {}/{}", table, record.id);
    Ok(())
  }

  /// 最近一次写入的结果行，原样返回
  pub fn latest(&self) -> Lookup<Item> {
    self.state.item(&self.state.tables().result, LATEST_RECORD_ID)
  }
}
