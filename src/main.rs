// 该文件是 Yibiao （仪表） 项目的一部分。
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

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use url::Url;

use yibiao::{
  FromUrl,
  config::{EnsembleConfig, ModelSpec},
  diagnosis::Diagnoser,
  input::InputWrapper,
  knowledge::KnowledgeBase,
  model::{ModelAsset, ModelIdentity, ModelStore, TractLoader},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Mode {
  /// 单字符识别
  Ocr,
  /// 仪表盘警告灯
  Dashboard,
}

impl From<Mode> for ModelIdentity {
  fn from(mode: Mode) -> Self {
    match mode {
      Mode::Ocr => ModelIdentity::Ocr,
      Mode::Dashboard => ModelIdentity::Dashboard,
    }
  }
}

/// Yibiao 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 诊断模式
  #[arg(long, value_enum, default_value = "dashboard")]
  pub mode: Mode,
  /// ONNX 模型路径，例如 onnx:///models/dashboard.onnx?weights=/models/dashboard.onnx.data
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 模型元数据 JSON（输入尺寸、均值方差、类别）
  #[arg(long, value_name = "METADATA")]
  pub metadata: PathBuf,
  /// 知识库 JSON，缺省使用内置知识库
  #[arg(long, value_name = "KB")]
  pub kb: Option<PathBuf>,
  /// 集成决策配置 JSON
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 截止时间（毫秒），超过后不再评估新的裁剪
  #[arg(long, value_name = "MS")]
  pub deadline_ms: Option<u64>,
  /// 模型物化目录
  #[arg(long, value_name = "DIR")]
  pub cache_dir: Option<PathBuf>,
  /// 输入来源，image:///path 或 folder:///dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，json:-、json:///path、image:///path 或 folder:///dir
  #[arg(long, value_name = "OUTPUT", default_value = "json:-")]
  pub output: Url,
  /// 最多处理的图像数量
  #[arg(long, value_name = "N")]
  pub frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let identity = ModelIdentity::from(args.mode);

  info!("诊断模式: {}", identity);
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let spec = ModelSpec::from_path(identity, &args.metadata)?;
  let asset = ModelAsset::from_url(&args.model)?;
  let knowledge = match &args.kb {
    Some(path) => KnowledgeBase::from_path(path)?,
    None => KnowledgeBase::bundled()?,
  };
  let config = match &args.config {
    Some(path) => EnsembleConfig::from_path(path)?,
    None => EnsembleConfig::default(),
  };
  let config = match args.deadline_ms {
    Some(ms) => config.with_deadline(Some(Duration::from_millis(ms))),
    None => config,
  };
  let cache_dir = args.cache_dir.unwrap_or_else(|| std::env::temp_dir().join("yibiao"));

  let store = ModelStore::new(Arc::new(TractLoader), cache_dir).with_model(asset, spec);
  let diagnoser = Diagnoser::new(store, knowledge, config);
  if let Err(e) = diagnoser.store().load_model(identity) {
    warn!("模型预加载失败，诊断结果将为 Error: {}", e);
  }

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  if input.is_single() {
    OneShotTask.run_task(input.into_iter(), diagnoser.with_mode(identity), output)?;
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frames)
      .run_task(input.into_iter(), diagnoser.with_mode(identity), output)?;
  }

  Ok(())
}
