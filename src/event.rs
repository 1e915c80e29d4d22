// 该文件是 Shaowang （哨望） 项目的一部分。
// src/event.rs - 触发事件与响应
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

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
  #[error("事件缺少字段 {0}")]
  MissingField(&'static str),
  #[error("对象键解码失败: {0}")]
  KeyDecode(#[from] std::string::FromUtf8Error),
}

/// 新图像事件，至少投递一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentEvent {
  pub bucket: String,
  pub key: String,
}

impl IncidentEvent {
  pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      bucket: bucket.into(),
      key: key.into(),
    }
  }

  /// 从存储通知中取第一条记录：`Records[0].s3.bucket.name` 与 `Records[0].s3.object.key`。
  ///
  /// 通知中的键经过表单编码，`+` 表示空格。
  pub fn from_notification(notification: &Value) -> Result<Self, EventError> {
    let record = notification
      .pointer("/Records/0/s3")
      .ok_or(EventError::MissingField("Records[0].s3"))?;
    let bucket = record
      .pointer("/bucket/name")
      .and_then(Value::as_str)
      .ok_or(EventError::MissingField("s3.bucket.name"))?;
    let key = record
      .pointer("/object/key")
      .and_then(Value::as_str)
      .ok_or(EventError::MissingField("s3.object.key"))?;

    let key = urlencoding::decode(&key.replace('+', " "))?.into_owned();
    Ok(Self::new(bucket, key))
  }

  /// 对象键的最后一段
  pub fn file_name(&self) -> &str {
    self.key.rsplit('/').next().unwrap_or(&self.key)
  }
}

/// 成功与跳过的响应形式相同
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HandlerResponse {
  #[serde(rename = "statusCode")]
  pub status_code: u16,
  pub body: Value,
}

impl HandlerResponse {
  pub fn ok(event: Value) -> Self {
    Self {
      status_code: 200,
      body: event,
    }
  }
}
