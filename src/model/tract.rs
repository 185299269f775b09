// 该文件是 Yibiao （仪表） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理后端
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

use std::sync::Arc;

use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::{
  config::ModelSpec,
  frame::{Tensor, TensorShape},
  model::{InferenceError, MaterializedModel, ModelLoadError, ModelLoader, ModelSession},
};

/// 使用 tract-onnx 打开 ONNX 模型
#[derive(Debug, Default, Clone, Copy)]
pub struct TractLoader;

pub struct TractSession {
  plan: TypedRunnableModel<TypedModel>,
  shape: TensorShape,
}

impl ModelLoader for TractLoader {
  fn open(&self, model: &MaterializedModel, spec: &ModelSpec) -> Result<Arc<dyn ModelSession>, ModelLoadError> {
    let shape = TensorShape::new(
      spec.input_channels(),
      spec.input_height as usize,
      spec.input_width as usize,
    );
    info!("加载模型文件: {}", model.model_path.display());
    if let Some(weights) = &model.weights_path {
      debug!("外部权重文件: {}", weights.display());
    }

    let plan = tract_onnx::onnx()
      .model_for_path(&model.model_path)
      .and_then(|m| m.with_input_fact(0, f32::fact(shape.dims()).into()))
      .and_then(|m| m.into_optimized())
      .and_then(|m| m.into_runnable())
      .map_err(|e| ModelLoadError::Session(format!("{:#}", e)))?;

    debug!("模型输入形状: {:?}", shape.dims());
    Ok(Arc::new(TractSession { plan, shape }))
  }
}

fn runtime(e: impl std::fmt::Display) -> InferenceError {
  InferenceError::Runtime(e.to_string())
}

impl ModelSession for TractSession {
  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  fn run(&self, input: &Tensor) -> Result<Vec<f32>, InferenceError> {
    let tensor = tract_onnx::prelude::Tensor::from_shape(&input.shape().dims(), input.as_slice()).map_err(runtime)?;
    let outputs = self.plan.run(tvec!(tensor.into())).map_err(runtime)?;
    let output = outputs.first().ok_or(InferenceError::EmptyOutput)?;
    let view = output.to_array_view::<f32>().map_err(runtime)?;
    Ok(view.iter().copied().collect())
  }
}
