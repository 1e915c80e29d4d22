// 该文件是 Shaowang （哨望） 项目的一部分。
// src/config.rs - 流水线配置
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

pub const DEFAULT_MIN_CONFIDENCE: f32 = 75.0;
pub const DEFAULT_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

/// 三张表的名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
  /// 分析结果表，只保留最新一条
  pub result: String,
  /// 防抖时间戳与当前提示词 id
  pub util: String,
  /// 提示词模板
  pub prompt: String,
}

impl Default for TableNames {
  fn default() -> Self {
    Self {
      result: "classifications".to_string(),
      util: "lambda-last-call".to_string(),
      prompt: "prompt-templates".to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 标注阈值，严格大于才绘制 (0 - 100)
  pub min_confidence: f32,
  /// 两次调用之间的最小间隔
  pub interval: Duration,
  /// 多模态模型标识
  pub model_id: String,
  pub tables: TableNames,
  /// 标注图像上传的目标桶
  pub output_bucket: String,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      min_confidence: DEFAULT_MIN_CONFIDENCE,
      interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
      model_id: DEFAULT_MODEL_ID.to_string(),
      tables: TableNames::default(),
      output_bucket: "content".to_string(),
    }
  }
}
