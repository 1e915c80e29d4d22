// 该文件是 Shaowang （哨望） 项目的一部分。
// src/prompt.rs - 提示词模板
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
use tracing::{info, warn};

use crate::state::{KeyValueStore, Lookup, StateError, StateStore, StoredPrompt};

pub const DEFAULT_PROMPT_ID: &str = "default";

pub const LABEL_PLACEHOLDER: &str = "label_result";
pub const PPE_PLACEHOLDER: &str = "ppe_result";

/// 内置模板，`{{`/`}}` 输出字面量花括号
pub const DEFAULT_TEMPLATE: &str = r#"
<instruction>
You are an AI assistant tasked with analyzing images and determining if any accident is occurring in the scene. You will be provided with an image, the results of an image recognition model, and the results of a personal protective equipment (PPE) detection model.
Your task is to:
1. Answer the following question: "Tell us what the situation is like with this image in detail. Is there any trouble going on? Generate captions in more than 3 sentences." (image_caption)
2. Determine if there is an on-going trouble or dangerous situation (classification), and output either 0 (No) or 1 (Yes).
Your output must be formatted as a JSON object with image_caption and classification keys.
{{
"image_caption": "<caption here>",
"classification": <0 or 1>
}}
Please provide your analysis based on the given inputs.
</instruction>
<label_result>{label_result}</label_result>
<ppe_result>{ppe_result}</ppe_result>
<reference>When answering the question related to the position of the image, you can use the fact that a value of 'Left' closer to 0.0 indicates the left side of the image, closer to 0.50 the middle, and closer to 1.0 the right side. And you can find the numbers of people in "Number of Persons" of ppe_result.</reference>
<outputRule>The final output should be by JSON and any other characters except JSON object is prohibited to output.</outputRule>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
  Stored,
  BuiltIn,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
  pub id: String,
  pub text: String,
  pub source: PromptSource,
}

impl PromptTemplate {
  pub fn built_in(id: &str) -> Self {
    Self {
      id: id.to_string(),
      text: DEFAULT_TEMPLATE.to_string(),
      source: PromptSource::BuiltIn,
    }
  }

  /// 只做占位符替换。未知的 `{name}` 原样保留。
  pub fn render(&self, label_result: &str, ppe_result: &str) -> String {
    let mut out = String::with_capacity(self.text.len() + label_result.len() + ppe_result.len());
    let mut rest = self.text.as_str();

    while let Some(pos) = rest.find(['{', '}']) {
      out.push_str(&rest[..pos]);
      let tail = &rest[pos..];

      if tail.starts_with("{{") {
        out.push('{');
        rest = &tail[2..];
      } else if tail.starts_with("}}") {
        out.push('}');
        rest = &tail[2..];
      } else if let Some(name) = tail
        .strip_prefix('{')
        .and_then(|t| t.split_once('}'))
        .map(|(name, _)| name)
        .filter(|name| *name == LABEL_PLACEHOLDER || *name == PPE_PLACEHOLDER)
      {
        out.push_str(if name == LABEL_PLACEHOLDER {
          label_result
        } else {
          ppe_result
        });
        rest = &tail[name.len() + 2..];
      } else {
        out.push_str(&tail[..1]);
        rest = &tail[1..];
      }
    }
    out.push_str(rest);
    out
  }
}

/// 提示词列表与当前选中的 id，供管理端展示
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptCatalog {
  pub prompts: Vec<StoredPrompt>,
  pub selected_id: String,
}

pub struct PromptResolver<'a, S> {
  state: &'a StateStore<'a, S>,
}

impl<'a, S: KeyValueStore> PromptResolver<'a, S> {
  pub fn new(state: &'a StateStore<'a, S>) -> Self {
    Self { state }
  }

  /// 当前启用的提示词 id；未设置时写入 `default`
  pub fn active_prompt_id(&self) -> String {
    match self.state.active_prompt_id() {
      Lookup::Found(id) => return id,
      Lookup::NotFound => info!("未设置提示词 id，初始化为 {}", DEFAULT_PROMPT_ID),
      Lookup::Failed(err) => warn!("读取提示词 id 失败，使用 {}: {}", DEFAULT_PROMPT_ID, err),
    }
    if let Err(err) = self.state.select_prompt(DEFAULT_PROMPT_ID) {
      warn!("写入提示词 id 失败: {}", err);
    }
    DEFAULT_PROMPT_ID.to_string()
  }

  pub fn resolve(&self, prompt_id: &str) -> PromptTemplate {
    match self.state.prompt_text(prompt_id) {
      Lookup::Found(text) => {
        info!("使用提示词模板 {}", prompt_id);
        return PromptTemplate {
          id: prompt_id.to_string(),
          text,
          source: PromptSource::Stored,
        };
      }
      Lookup::NotFound => info!("未找到提示词 {}，使用内置模板", prompt_id),
      Lookup::Failed(err) => warn!("读取提示词 {} 失败，使用内置模板: {}", prompt_id, err),
    }
    PromptTemplate::built_in(prompt_id)
  }

  pub fn catalog(&self) -> Result<PromptCatalog, StateError> {
    Ok(PromptCatalog {
      prompts: self.state.list_prompts()?,
      selected_id: self.active_prompt_id(),
    })
  }
}
