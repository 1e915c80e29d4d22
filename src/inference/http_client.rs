// 该文件是 Shaowang （哨望） 项目的一部分。
// src/inference/http_client.rs - HTTP 多模态推理客户端
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

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{InferenceClient, MessagesRequest};
use crate::FromUrl;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
// 生成 1500 个 token 可能需要较长时间
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum HttpInferenceError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URL 错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("HTTP 请求失败: {0}")]
  RequestError(#[from] Box<ureq::Error>),
  #[error("响应解析失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型响应中没有文本内容")]
  EmptyResponse,
}

#[derive(Deserialize, Debug)]
struct ResponseBlock {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ModelResponse {
  #[serde(default)]
  content: Vec<ResponseBlock>,
}

impl ModelResponse {
  fn into_text(self) -> Option<String> {
    self
      .content
      .into_iter()
      .find(|block| block.kind == "text")
      .and_then(|block| block.text)
  }
}

/// `POST {base}/model/{model_id}/invoke`，请求体即 Messages 格式
pub struct HttpInferenceClient {
  agent: ureq::Agent,
  base: Url,
}

impl FromUrl for HttpInferenceClient {
  type Error = HttpInferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" => {}
      other => return Err(HttpInferenceError::SchemeMismatch(other.to_string())),
    }

    let mut base = url.clone();
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

impl HttpInferenceClient {
  fn invoke_url(&self, model_id: &str) -> Result<Url, HttpInferenceError> {
    // 模型 id 中常有 `:`，需要编码
    Ok(
      self
        .base
        .join(&format!("model/{}/invoke", urlencoding::encode(model_id)))?,
    )
  }
}

impl InferenceClient for HttpInferenceClient {
  type Error = HttpInferenceError;

  fn invoke(&self, model_id: &str, request: &MessagesRequest) -> Result<String, Self::Error> {
    let url = self.invoke_url(model_id)?;
    debug!("调用模型: {}", url);
    let response = self
      .agent
      .post(url.as_str())
      .send_json(request)
      .map_err(|err| HttpInferenceError::RequestError(Box::new(err)))?;
    let body: ModelResponse = response.into_json()?;
    body.into_text().ok_or(HttpInferenceError::EmptyResponse)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn model_id_is_encoded_into_path() {
    let client =
      HttpInferenceClient::from_url(&Url::parse("https://runtime.local/v1").unwrap()).unwrap();
    assert_eq!(
      client
        .invoke_url("anthropic.claude-3-sonnet-20240229-v1:0")
        .unwrap()
        .as_str(),
      "https://runtime.local/v1/model/anthropic.claude-3-sonnet-20240229-v1%3A0/invoke"
    );
  }

  #[test]
  fn first_text_block_is_the_completion() {
    let body: ModelResponse = serde_json::from_str(
      r#"{"content":[{"type":"tool_use"},{"type":"text","text":"\"image_caption\":\"x\"}"}]}"#,
    )
    .unwrap();
    assert_eq!(body.into_text().as_deref(), Some("\"image_caption\":\"x\"}"));

    let empty: ModelResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
    assert!(empty.into_text().is_none());
  }
}
