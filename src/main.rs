// 该文件是 Shaowang （哨望） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shaowang::{
  FromUrl,
  detect::HttpDetector,
  inference::HttpInferenceClient,
  output::Draw,
  state::StateBackend,
  storage::ObjectStoreBackend,
  task::IncidentTask,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("对象存储: {}", args.objects);
  info!("状态存储: {}", args.state);
  info!("检测服务: {}", args.detector);
  info!("推理服务: {}, 模型: {}", args.inference, args.model);

  let config = args.pipeline_config();
  let objects = ObjectStoreBackend::from_url(&args.objects)?;
  let store = StateBackend::from_url(&args.state)?;
  let detector = HttpDetector::from_url(&args.detector)?;
  let client = HttpInferenceClient::from_url(&args.inference)?;
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)
      .with_context(|| format!("加载字体失败: {}", path.display()))?,
    None => {
      warn!("未指定字体，标注中不绘制文字");
      Draw::default()
    }
  };

  let notification: Value = match &args.event {
    Some(path) => {
      let file = File::open(path).with_context(|| format!("无法打开事件文件: {}", path.display()))?;
      serde_json::from_reader(BufReader::new(file))?
    }
    None => serde_json::from_reader(std::io::stdin().lock())?,
  };

  let task = IncidentTask::new(&config, &objects, &detector, &client, &store, &draw);
  let response = task.handle(notification)?;
  println!("{}", serde_json::to_string(&response)?);

  Ok(())
}
