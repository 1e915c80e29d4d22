// 该文件是 Shaowang （哨望） 项目的一部分。
// src/inference.rs - 多模态模型调用与输出解析
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

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::BoxError;

#[cfg(feature = "http_backend")]
mod http_client;
#[cfg(feature = "http_backend")]
pub use self::http_client::{HttpInferenceClient, HttpInferenceError};

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const SYSTEM_PROMPT: &str =
  "Answer the question below. The final output should be in the JSON format.";
pub const MAX_TOKENS: u32 = 1500;

/// 预填给助手的开头，引导模型直接续写 JSON
pub const ASSISTANT_PRIMER: &str = "{";

pub const FALLBACK_CAPTION: &str = "No description";

static TAG_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"<.*?>").expect("标签正则表达式无效"));

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ImageSource {
  #[serde(rename = "type")]
  pub kind: &'static str,
  pub media_type: String,
  pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
  Image { source: ImageSource },
  Text { text: String },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Message {
  pub role: Role,
  pub content: Vec<ContentBlock>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MessagesRequest {
  pub anthropic_version: &'static str,
  pub max_tokens: u32,
  pub system: &'static str,
  pub messages: Vec<Message>,
}

impl MessagesRequest {
  /// 一轮用户消息（图像 + 提示词），加一轮只含 `{` 的助手消息
  pub fn with_image(image: &[u8], prompt: &str) -> Self {
    let source = ImageSource {
      kind: "base64",
      media_type: sniff_media_type(image).to_string(),
      data: general_purpose::STANDARD.encode(image),
    };

    Self {
      anthropic_version: ANTHROPIC_VERSION,
      max_tokens: MAX_TOKENS,
      system: SYSTEM_PROMPT,
      messages: vec![
        Message {
          role: Role::User,
          content: vec![
            ContentBlock::Image { source },
            ContentBlock::Text {
              text: prompt.to_string(),
            },
          ],
        },
        Message {
          role: Role::Assistant,
          content: vec![ContentBlock::Text {
            text: ASSISTANT_PRIMER.to_string(),
          }],
        },
      ],
    }
  }
}

fn sniff_media_type(image: &[u8]) -> &'static str {
  match image::guess_format(image) {
    Ok(image::ImageFormat::Jpeg) => "image/jpeg",
    Ok(image::ImageFormat::Gif) => "image/gif",
    Ok(image::ImageFormat::WebP) => "image/webp",
    _ => "image/png",
  }
}

pub trait InferenceClient {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 返回模型续写的文本（不含预填的 `{`）
  fn invoke(&self, model_id: &str, request: &MessagesRequest) -> Result<String, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  NoIncident = 0,
  Incident = 1,
}

impl Classification {
  pub fn code(self) -> u8 {
    self as u8
  }

  fn from_value(value: &Value) -> Option<Self> {
    let code = match value {
      Value::Number(n) => n.as_u64()?,
      Value::Bool(b) => u64::from(*b),
      Value::String(s) => s.trim().parse().ok()?,
      _ => return None,
    };
    match code {
      0 => Some(Classification::NoIncident),
      1 => Some(Classification::Incident),
      _ => None,
    }
  }
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.code())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResult {
  pub caption: String,
  pub classification: Classification,
}

impl Default for InferenceResult {
  fn default() -> Self {
    Self {
      caption: FALLBACK_CAPTION.to_string(),
      classification: Classification::NoIncident,
    }
  }
}

#[derive(Error, Debug)]
pub enum ParseFailure {
  #[error("不是合法的 JSON: {0}")]
  InvalidJson(#[from] serde_json::Error),
  #[error("缺少字段 {0}")]
  MissingField(&'static str),
  #[error("字段 {field} 的值无效: {value}")]
  InvalidField { field: &'static str, value: Value },
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型调用失败: {0}")]
  Invoke(#[source] BoxError),
}

/// 解析补上 `{` 之后的模型输出
pub fn parse_model_output(text: &str) -> Result<InferenceResult, ParseFailure> {
  let text = escape_control_in_strings(text);
  let value: Value = serde_json::from_str(&text)?;

  let caption = match value.get("image_caption") {
    Some(Value::String(caption)) => caption.clone(),
    Some(other) => {
      return Err(ParseFailure::InvalidField {
        field: "image_caption",
        value: other.clone(),
      });
    }
    None => return Err(ParseFailure::MissingField("image_caption")),
  };

  let raw = value
    .get("classification")
    .ok_or(ParseFailure::MissingField("classification"))?;
  let classification =
    Classification::from_value(raw).ok_or_else(|| ParseFailure::InvalidField {
      field: "classification",
      value: raw.clone(),
    })?;

  Ok(InferenceResult {
    caption,
    classification,
  })
}

/// 字符串字面量里的裸控制字符（模型常输出真实换行）转义后再解析
fn escape_control_in_strings(text: &str) -> Cow<'_, str> {
  if !text.chars().any(char::is_control) {
    return Cow::Borrowed(text);
  }

  let mut out = String::with_capacity(text.len() + 16);
  let mut in_string = false;
  let mut escaped = false;
  for c in text.chars() {
    if in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      } else if (c as u32) < 0x20 {
        match c {
          '\n' => out.push_str("\\n"),
          '\r' => out.push_str("\\r"),
          '\t' => out.push_str("\\t"),
          other => out.push_str(&format!("\\u{:04x}", other as u32)),
        }
        continue;
      }
    } else if c == '"' {
      in_string = true;
    }
    out.push(c);
  }
  Cow::Owned(out)
}

/// 去掉 `<...>` 形式的标签，不处理嵌套或残缺的标记
pub fn strip_tags(caption: &str) -> String {
  TAG_PATTERN.replace_all(caption, "").into_owned()
}

pub struct InferenceAdapter<'a, C> {
  client: &'a C,
  model_id: &'a str,
}

impl<'a, C: InferenceClient> InferenceAdapter<'a, C> {
  pub fn new(client: &'a C, model_id: &'a str) -> Self {
    Self { client, model_id }
  }

  /// 模型调用失败向上传递；输出无法解析时使用默认结果，不报错
  pub fn infer(&self, image: &[u8], prompt: &str) -> Result<InferenceResult, InferenceError> {
    let request = MessagesRequest::with_image(image, prompt);
    let completion = self
      .client
      .invoke(self.model_id, &request)
      .map_err(|err| InferenceError::Invoke(Box::new(err)))?;

    let text = format!("{ASSISTANT_PRIMER}{completion}");
    debug!("模型输出: {}", text);

    let mut result = match parse_model_output(&text) {
      Ok(result) => result,
      Err(failure) => {
        warn!("模型输出无法解析，使用默认结果: {}", failure);
        InferenceResult::default()
      }
    };
    result.caption = strip_tags(&result.caption);
    info!(
      "模型 {} 分类: {}, 描述长度: {}",
      self.model_id,
      result.classification,
      result.caption.chars().count()
    );
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::cell::RefCell;

  #[test]
  fn well_formed_output_parses() {
    let result =
      parse_model_output(r#"{"image_caption":"A worker without a hard hat.","classification":1}"#)
        .unwrap();
    assert_eq!(result.caption, "A worker without a hard hat.");
    assert_eq!(result.classification, Classification::Incident);
  }

  #[test]
  fn classification_accepts_string_and_bool() {
    let result = parse_model_output(r#"{"image_caption":"x","classification":"0"}"#).unwrap();
    assert_eq!(result.classification, Classification::NoIncident);
    let result = parse_model_output(r#"{"image_caption":"x","classification":true}"#).unwrap();
    assert_eq!(result.classification, Classification::Incident);
  }

  #[test]
  fn malformed_outputs_are_reported() {
    assert!(matches!(
      parse_model_output(r#"{"image_caption":"cut off"#),
      Err(ParseFailure::InvalidJson(_))
    ));
    assert!(matches!(
      parse_model_output(r#"{"image_caption":"no class"}"#),
      Err(ParseFailure::MissingField("classification"))
    ));
    assert!(matches!(
      parse_model_output(r#"{"image_caption":"x","classification":7}"#),
      Err(ParseFailure::InvalidField { .. })
    ));
    assert!(matches!(
      parse_model_output(r#"{"image_caption":"x","classification":1} trailing"#),
      Err(ParseFailure::InvalidJson(_))
    ));
  }

  #[test]
  fn raw_newlines_inside_strings_are_tolerated() {
    let result =
      parse_model_output("{\n\"image_caption\": \"line one\nline two\",\n\"classification\": 0}")
        .unwrap();
    assert_eq!(result.caption, "line one\nline two");
  }

  #[test]
  fn tags_are_stripped_from_captions() {
    assert_eq!(
      strip_tags("<note>Two people</note> near forklift"),
      "Two people near forklift"
    );
    assert_eq!(strip_tags("no markup"), "no markup");
  }

  #[test]
  fn request_primes_assistant_with_brace() {
    let png = {
      let mut buf = Vec::new();
      image::RgbImage::new(2, 2)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
      buf
    };
    let request = MessagesRequest::with_image(&png, "describe");
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(value["anthropic_version"], json!(ANTHROPIC_VERSION));
    assert_eq!(value["max_tokens"], json!(1500));
    assert_eq!(value["messages"][0]["role"], json!("user"));
    assert_eq!(value["messages"][0]["content"][0]["type"], json!("image"));
    assert_eq!(
      value["messages"][0]["content"][0]["source"]["media_type"],
      json!("image/png")
    );
    assert_eq!(value["messages"][0]["content"][1], json!({"type": "text", "text": "describe"}));
    assert_eq!(value["messages"][1]["role"], json!("assistant"));
    assert_eq!(value["messages"][1]["content"][0]["text"], json!("{"));
  }

  struct ScriptedClient {
    reply: String,
    seen_model: RefCell<Option<String>>,
  }

  #[derive(Debug, Error)]
  #[error("throttled")]
  struct Throttled;

  impl InferenceClient for ScriptedClient {
    type Error = Throttled;

    fn invoke(&self, model_id: &str, _: &MessagesRequest) -> Result<String, Throttled> {
      *self.seen_model.borrow_mut() = Some(model_id.to_string());
      Ok(self.reply.clone())
    }
  }

  struct DownClient;

  impl InferenceClient for DownClient {
    type Error = Throttled;

    fn invoke(&self, _: &str, _: &MessagesRequest) -> Result<String, Throttled> {
      Err(Throttled)
    }
  }

  #[test]
  fn adapter_prepends_brace_and_strips_tags() {
    let client = ScriptedClient {
      reply: r#""image_caption":"<b>Smoke</b> near the dock","classification":1}"#.to_string(),
      seen_model: RefCell::new(None),
    };
    let result = InferenceAdapter::new(&client, "model-x")
      .infer(b"not really an image", "prompt")
      .unwrap();
    assert_eq!(result.caption, "Smoke near the dock");
    assert_eq!(result.classification, Classification::Incident);
    assert_eq!(client.seen_model.borrow().as_deref(), Some("model-x"));
  }

  #[test]
  fn adapter_substitutes_default_for_garbage() {
    let client = ScriptedClient {
      reply: "I cannot help with that.".to_string(),
      seen_model: RefCell::new(None),
    };
    let result = InferenceAdapter::new(&client, "m").infer(b"", "p").unwrap();
    assert_eq!(result, InferenceResult::default());
    assert_eq!(result.caption, "No description");
    assert_eq!(result.classification.code(), 0);
  }

  #[test]
  fn invoke_failure_is_an_error() {
    let err = InferenceAdapter::new(&DownClient, "m").infer(b"", "p").unwrap_err();
    assert!(matches!(err, InferenceError::Invoke(_)));
  }
}
