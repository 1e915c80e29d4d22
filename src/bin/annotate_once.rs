// 该文件是 Shaowang （哨望） 项目的一部分。
// src/bin/annotate_once.rs - 离线标注工具
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

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shaowang::{
  config::DEFAULT_MIN_CONFIDENCE,
  detect::{LabelResponse, summarize_labels},
  output::{Draw, output_format},
};

/// 把保存下来的标签检测结果画到本地图像上，用于离线检查阈值
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 标签检测响应 JSON
  #[arg(long, value_name = "JSON")]
  pub labels: PathBuf,
  /// 输出图像，格式由扩展名决定
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 标注阈值 (0 - 100)
  #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE, value_name = "THRESHOLD")]
  pub min_confidence: f32,
  /// 标签文字使用的字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图像: {}", args.input.display());
  info!("检测结果: {}", args.labels.display());
  info!("输出路径: {}", args.output.display());

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let source = image::open(&args.input)
    .with_context(|| format!("无法读取图像: {}", args.input.display()))?
    .to_rgb8();
  let file = File::open(&args.labels)
    .with_context(|| format!("无法打开检测结果: {}", args.labels.display()))?;
  let labels: LabelResponse = serde_json::from_reader(BufReader::new(file))?;

  for summary in summarize_labels(&labels) {
    info!(
      "{}: 置信度 {:.1}, 实例 {}",
      summary.name,
      summary.confidence,
      summary.instance_count()
    );
  }

  let now = std::time::Instant::now();
  let annotated = draw.render(&source, &labels.labels, args.min_confidence);
  info!("绘制了 {} 个边框，耗时: {:.2?}", annotated.boxes.len(), now.elapsed());

  let file_name = args
    .output
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  let encoded = annotated.encode(output_format(&file_name))?;
  if let Some(parent) = args.output.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(&args.output, encoded)?;
  info!("保存图像到文件: {}", args.output.display());

  Ok(())
}
