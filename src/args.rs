// 该文件是 Shaowang （哨望） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use shaowang::config::{
  DEFAULT_INTERVAL_SECS, DEFAULT_MIN_CONFIDENCE, DEFAULT_MODEL_ID, PipelineConfig, TableNames,
};

/// Shaowang 事件处理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 对象存储，例如 folder:///var/lib/shaowang/buckets
  #[arg(long, env = "OBJECT_STORE_URL", value_name = "URL")]
  pub objects: Url,

  /// 状态存储，folder:///path 或 memory://
  #[arg(long, env = "STATE_STORE_URL", value_name = "URL")]
  pub state: Url,

  /// 视觉检测服务地址
  #[arg(long, env = "DETECTION_SERVICE_URL", value_name = "URL")]
  pub detector: Url,

  /// 多模态推理服务地址
  #[arg(long, env = "INFERENCE_SERVICE_URL", value_name = "URL")]
  pub inference: Url,

  /// 标注阈值 (0 - 100)，严格大于才绘制
  #[arg(long, env = "MIN_CONFIDENCE", default_value_t = DEFAULT_MIN_CONFIDENCE, value_name = "THRESHOLD")]
  pub min_confidence: f32,

  /// 两次调用之间的最小间隔（秒）
  #[arg(long, env = "INTERVAL_TIME", default_value_t = DEFAULT_INTERVAL_SECS, value_name = "SECONDS")]
  pub interval: u64,

  /// 多模态模型标识
  #[arg(long, env = "BEDROCK_MODEL_NAME", default_value = DEFAULT_MODEL_ID, value_name = "MODEL")]
  pub model: String,

  /// 分析结果表
  #[arg(long, env = "TABLE_NAME", default_value = "classifications")]
  pub result_table: String,

  /// 防抖与提示词 id 表
  #[arg(long, env = "UTIL_TABLE_NAME", default_value = "lambda-last-call")]
  pub util_table: String,

  /// 提示词模板表
  #[arg(long, env = "PROMPT_TABLE_NAME", default_value = "prompt-templates")]
  pub prompt_table: String,

  /// 标注图像上传的目标桶
  #[arg(long, env = "SAVE_BUCKET_NAME", default_value = "content")]
  pub output_bucket: String,

  /// 标签文字使用的字体文件 (TTF/OTF)
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 存储通知 JSON 文件，缺省时从标准输入读取
  #[arg(long, value_name = "FILE")]
  pub event: Option<PathBuf>,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      min_confidence: self.min_confidence,
      interval: Duration::from_secs(self.interval),
      model_id: self.model.clone(),
      tables: TableNames {
        result: self.result_table.clone(),
        util: self.util_table.clone(),
        prompt: self.prompt_table.clone(),
      },
      output_bucket: self.output_bucket.clone(),
    }
  }
}
