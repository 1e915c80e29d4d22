// 该文件是 Shaowang （哨望） 项目的一部分。
// src/bin/admin.rs - 提示词与结果管理工具
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

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use url::Url;

use shaowang::{
  FromUrl,
  config::TableNames,
  output::Record,
  prompt::PromptResolver,
  state::{Lookup, StateBackend, StateStore},
};

/// 管理提示词模板，查看最近一次分析结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 状态存储，folder:///path 或 memory://
  #[arg(long, env = "STATE_STORE_URL", value_name = "URL")]
  pub state: Url,

  /// 分析结果表
  #[arg(long, env = "TABLE_NAME", default_value = "classifications")]
  pub result_table: String,

  /// 防抖与提示词 id 表
  #[arg(long, env = "UTIL_TABLE_NAME", default_value = "lambda-last-call")]
  pub util_table: String,

  /// 提示词模板表
  #[arg(long, env = "PROMPT_TABLE_NAME", default_value = "prompt-templates")]
  pub prompt_table: String,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 列出全部提示词模板和当前选中的 id
  List,
  /// 新增或覆盖提示词模板
  Put {
    #[arg(long)]
    id: String,
    /// 模板正文
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,
    /// 从文件读取模板正文
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,
    /// 写入后同时设为当前模板
    #[arg(long)]
    select: bool,
  },
  /// 切换当前使用的提示词模板
  Select {
    #[arg(long)]
    id: String,
  },
  /// 输出最近一次分析结果
  Latest,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let tables = TableNames {
    result: args.result_table.clone(),
    util: args.util_table.clone(),
    prompt: args.prompt_table.clone(),
  };
  let store = StateBackend::from_url(&args.state)?;
  let state = StateStore::new(&store, &tables);

  match args.command {
    Command::List => {
      let catalog = PromptResolver::new(&state).catalog()?;
      println!("{}", serde_json::to_string_pretty(&catalog)?);
    }
    Command::Put {
      id,
      text,
      file,
      select,
    } => {
      let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
          .with_context(|| format!("无法读取模板文件: {}", path.display()))?,
        (None, None) => bail!("需要 --text 或 --file"),
      };
      state.put_prompt(&id, &text)?;
      info!("已写入提示词 {}", id);
      if select {
        state.select_prompt(&id)?;
        info!("当前提示词切换为 {}", id);
      }
    }
    Command::Select { id } => {
      if state.prompt_text(&id).found().is_none() {
        info!("提示词 {} 不存在，运行时将使用内置模板", id);
      }
      state.select_prompt(&id)?;
      info!("当前提示词切换为 {}", id);
    }
    Command::Latest => match Record::new(&state).latest() {
      Lookup::Found(item) => println!("{}", serde_json::to_string_pretty(&item)?),
      Lookup::NotFound => info!("尚无分析结果"),
      Lookup::Failed(err) => return Err(err.into()),
    },
  }

  Ok(())
}
