// 该文件是 Yibiao （仪表） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复诊断基准测试
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use yibiao::{
  FromUrl,
  config::{EnsembleConfig, ModelSpec},
  diagnosis::Diagnoser,
  input::InputWrapper,
  knowledge::KnowledgeBase,
  model::{ModelAsset, ModelIdentity, ModelStore, TractLoader},
  output::OutputWrapper,
  task::{DEFAULT_REPEAT_TIMES, RepeatShotTask, Task},
};

/// 仪表盘诊断重复基准参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 模型元数据 JSON
  #[arg(long, value_name = "METADATA")]
  pub metadata: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "json:///dev/null")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = DEFAULT_REPEAT_TIMES)]
  pub times: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let spec = ModelSpec::from_path(ModelIdentity::Dashboard, &args.metadata)?;
  let store = ModelStore::new(Arc::new(TractLoader), std::env::temp_dir().join("yibiao"))
    .with_model(ModelAsset::from_url(&args.model)?, spec);
  let diagnoser = Diagnoser::new(store, KnowledgeBase::bundled()?, EnsembleConfig::default());

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default().with_times(args.times).run_task(
    input.into_iter(),
    diagnoser.with_mode(ModelIdentity::Dashboard),
    output,
  )?;

  Ok(())
}
