// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detect/http_detector.rs - HTTP 检测服务客户端
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

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{Detector, ImageRef};
use crate::FromUrl;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum HttpDetectorError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URL 错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("HTTP 请求失败: {0}")]
  RequestError(#[from] Box<ureq::Error>),
  #[error("响应解析失败: {0}")]
  IoError(#[from] std::io::Error),
}

/// 检测服务客户端。
///
/// 请求体以桶名和对象键引用图像，服务自行读取对象：
/// `POST {base}/detect-labels`、`POST {base}/detect-protective-equipment`。
pub struct HttpDetector {
  agent: ureq::Agent,
  base: Url,
}

impl FromUrl for HttpDetector {
  type Error = HttpDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" => {}
      other => return Err(HttpDetectorError::SchemeMismatch(other.to_string())),
    }

    let mut base = url.clone();
    // 保证 join 时保留路径前缀
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    Ok(Self {
      agent: ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build(),
      base,
    })
  }
}

impl HttpDetector {
  fn post(&self, endpoint: &str, image: ImageRef<'_>) -> Result<ureq::Response, HttpDetectorError> {
    let url = self.base.join(endpoint)?;
    debug!("请求检测服务: {}", url);
    let body = json!({
      "Image": {
        "S3Object": {
          "Bucket": image.bucket,
          "Name": image.key,
        }
      }
    });
    self
      .agent
      .post(url.as_str())
      .send_json(body)
      .map_err(|err| HttpDetectorError::RequestError(Box::new(err)))
  }
}

/// 把响应头 `Date` 记到 `ResponseMetadata.HTTPHeaders.date`，已有的值不覆盖
fn attach_response_date(body: &mut Value, date: &str) {
  let Some(body) = body.as_object_mut() else {
    return;
  };
  let metadata = body
    .entry("ResponseMetadata")
    .or_insert_with(|| json!({}));
  if let Some(metadata) = metadata.as_object_mut()
    && let Some(headers) = metadata
      .entry("HTTPHeaders")
      .or_insert_with(|| json!({}))
      .as_object_mut()
  {
    headers
      .entry("date")
      .or_insert_with(|| Value::from(date));
  }
}

impl Detector for HttpDetector {
  type Error = HttpDetectorError;

  fn detect_labels(&self, image: ImageRef<'_>) -> Result<Value, Self::Error> {
    let response = self.post("detect-labels", image)?;
    Ok(response.into_json()?)
  }

  fn detect_ppe(&self, image: ImageRef<'_>) -> Result<Value, Self::Error> {
    let response = self.post("detect-protective-equipment", image)?;
    let date = response.header("date").map(str::to_string);
    let mut body: Value = response.into_json()?;
    if let Some(date) = date {
      attach_response_date(&mut body, &date);
    }
    Ok(body)
  }
}
