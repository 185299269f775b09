// 该文件是 Yibiao （仪表） 项目的一部分。
// src/model.rs - 模型与推理
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

use std::{fmt, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::{ModelSpec, Normalization},
  frame::{BoundingBox, RawImage, Tensor, TensorShape},
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型身份：字符 OCR 模型与仪表盘图标模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelIdentity {
  Ocr,
  Dashboard,
}

impl ModelIdentity {
  pub fn as_str(&self) -> &'static str {
    match self {
      ModelIdentity::Ocr => "ocr",
      ModelIdentity::Dashboard => "dashboard",
    }
  }
}

impl fmt::Display for ModelIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型资源物化错误: {0}")]
  Materialize(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型未配置: {0}")]
  NotConfigured(ModelIdentity),
  #[error("模型会话创建失败: {0}")]
  Session(String),
  #[error("模型输入形状与元数据不符: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch { expected: [usize; 4], actual: [usize; 4] },
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch { expected: [usize; 4], actual: [usize; 4] },
  #[error("模型输出为空")]
  EmptyOutput,
  #[error("输出类别数不匹配: 期望 {expected}, 实际 {actual}")]
  ClassCountMismatch { expected: usize, actual: usize },
  #[error("推理运行错误: {0}")]
  Runtime(String),
}

/// 已打开的模型会话。构造后不再修改，可在线程间共享。
pub trait ModelSession: Send + Sync {
  fn input_shape(&self) -> TensorShape;

  /// 执行一次前向推理，返回每个类别的 logits
  fn run(&self, input: &Tensor) -> Result<Vec<f32>, InferenceError>;
}

/// 把物化后的模型文件打开为会话
pub trait ModelLoader: Send + Sync {
  fn open(&self, model: &MaterializedModel, spec: &ModelSpec) -> Result<Arc<dyn ModelSession>, ModelLoadError>;
}

/// 检查输入张量形状后再执行推理
pub fn run_checked(session: &dyn ModelSession, input: &Tensor) -> Result<Vec<f32>, InferenceError> {
  let expected = session.input_shape();
  if input.shape() != expected {
    return Err(InferenceError::ShapeMismatch {
      expected: expected.dims(),
      actual: input.shape().dims(),
    });
  }
  let output = session.run(input)?;
  if output.is_empty() {
    return Err(InferenceError::EmptyOutput);
  }
  Ok(output)
}

/// 数值稳定的 softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|v| v / sum).collect()
}

/// 单次推理的结果：完整概率向量与最高类别
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub probabilities: Vec<f32>,
  pub top_index: usize,
  pub confidence: f32,
}

impl Candidate {
  pub fn from_probabilities(probabilities: Vec<f32>) -> Option<Self> {
    let (top_index, confidence) = probabilities
      .iter()
      .copied()
      .enumerate()
      .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
        Some((_, bp)) if bp >= p => best,
        _ => Some((i, p)),
      })?;
    Some(Self {
      probabilities,
      top_index,
      confidence,
    })
  }

  pub fn from_logits(logits: &[f32]) -> Option<Self> {
    Self::from_probabilities(softmax(logits))
  }
}

/// 绑定了元数据的分类器
#[derive(Clone)]
pub struct Classifier {
  session: Arc<dyn ModelSession>,
  spec: Arc<ModelSpec>,
}

impl Classifier {
  pub fn new(session: Arc<dyn ModelSession>, spec: Arc<ModelSpec>) -> Self {
    Self { session, spec }
  }

  pub fn spec(&self) -> &ModelSpec {
    &self.spec
  }

  fn to_tensor(&self, image: &RawImage) -> Tensor {
    match &self.spec.normalization {
      Normalization::Grayscale => image.to_gray_tensor(),
      Normalization::Rgb { mean, std } => image.to_rgb_tensor(mean, std),
    }
  }

  /// 裁剪（可选）并缩放到模型输入尺寸后推理
  pub fn evaluate(&self, image: &RawImage, crop: Option<BoundingBox>) -> Result<Candidate, InferenceError> {
    let resized = image.crop_resize(crop, self.spec.input_width, self.spec.input_height);
    self.infer(&resized)
  }
}

impl Model for Classifier {
  type Input = RawImage;
  type Output = Candidate;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = if input.width() == self.spec.input_width && input.height() == self.spec.input_height {
      self.to_tensor(input)
    } else {
      self.to_tensor(&input.crop_resize(None, self.spec.input_width, self.spec.input_height))
    };

    let logits = run_checked(self.session.as_ref(), &tensor)?;
    if logits.len() != self.spec.num_classes() {
      return Err(InferenceError::ClassCountMismatch {
        expected: self.spec.num_classes(),
        actual: logits.len(),
      });
    }

    if !logits.iter().all(|v| v.is_finite()) {
      return Err(InferenceError::Runtime("模型输出包含非有限值".to_string()));
    }

    let candidate = Candidate::from_logits(&logits).ok_or(InferenceError::EmptyOutput)?;
    debug!(
      "{} 推理结果: 类别 {} 置信度 {:.3}",
      self.spec.identity, candidate.top_index, candidate.confidence
    );
    Ok(candidate)
  }
}

mod asset;
mod store;
#[cfg(feature = "onnx_tract")]
mod tract;

pub use self::asset::{AssetSource, MaterializedModel, ModelAsset};
pub use self::store::ModelStore;
#[cfg(feature = "onnx_tract")]
pub use self::tract::{TractLoader, TractSession};

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  use super::*;

  /// 按调用顺序返回预设 logits 的会话
  pub struct ScriptedSession {
    pub shape: TensorShape,
    pub script: Mutex<Vec<Result<Vec<f32>, String>>>,
    pub fallback: Vec<f32>,
    pub calls: AtomicUsize,
  }

  impl ScriptedSession {
    pub fn new(shape: TensorShape, script: Vec<Result<Vec<f32>, String>>, fallback: Vec<f32>) -> Self {
      Self {
        shape,
        script: Mutex::new(script),
        fallback,
        calls: AtomicUsize::new(0),
      }
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  impl ModelSession for ScriptedSession {
    fn input_shape(&self) -> TensorShape {
      self.shape
    }

    fn run(&self, _input: &Tensor) -> Result<Vec<f32>, InferenceError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let mut script = self.script.lock().unwrap();
      if script.is_empty() {
        return Ok(self.fallback.clone());
      }
      script.remove(0).map_err(InferenceError::Runtime)
    }
  }

  /// 返回固定会话并统计打开次数的加载器
  pub struct FakeLoader {
    pub session: Arc<dyn ModelSession>,
    pub opens: AtomicUsize,
    pub fail: bool,
  }

  impl FakeLoader {
    pub fn new(session: Arc<dyn ModelSession>) -> Self {
      Self {
        session,
        opens: AtomicUsize::new(0),
        fail: false,
      }
    }

    pub fn failing(session: Arc<dyn ModelSession>) -> Self {
      Self {
        fail: true,
        ..Self::new(session)
      }
    }

    pub fn opens(&self) -> usize {
      self.opens.load(Ordering::SeqCst)
    }
  }

  impl ModelLoader for FakeLoader {
    fn open(&self, _model: &MaterializedModel, _spec: &ModelSpec) -> Result<Arc<dyn ModelSession>, ModelLoadError> {
      self.opens.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(ModelLoadError::Session("模拟的会话创建失败".to_string()));
      }
      Ok(self.session.clone())
    }
  }

  /// 在第 `index` 个类别上给出很大 margin 的 logits
  pub fn peaked_logits(num_classes: usize, index: usize, margin: f32) -> Vec<f32> {
    (0..num_classes).map(|i| if i == index { margin } else { 0.0 }).collect()
  }

  /// 让 softmax 后第 `index` 个类别恰好为 `confidence` 的 logits
  pub fn logits_for_confidence(num_classes: usize, index: usize, confidence: f32) -> Vec<f32> {
    let rest = (1.0 - confidence) / (num_classes - 1) as f32;
    (0..num_classes)
      .map(|i| if i == index { confidence.ln() } else { rest.ln() })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::{testing::*, *};
  use crate::config::ModelSpec;

  fn dashboard_spec() -> Arc<ModelSpec> {
    Arc::new(
      ModelSpec::from_json_str(
        ModelIdentity::Dashboard,
        r#"{"input_size": 8, "classes": ["abs", "check_engine", "seatbelt"]}"#,
      )
      .unwrap(),
    )
  }

  fn gray(width: u32, height: u32) -> RawImage {
    RawImage::from(image::RgbaImage::from_pixel(width, height, image::Rgba([90, 90, 90, 255])))
  }

  #[test]
  fn softmax_sums_to_one() {
    let probs = softmax(&[1.0, 2.0, 3.0, 1000.0]);
    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    assert!(probs[3] > 0.99);
  }

  #[test]
  fn candidate_picks_first_maximum() {
    let c = Candidate::from_probabilities(vec![0.2, 0.4, 0.4]).unwrap();
    assert_eq!(c.top_index, 1);
    assert!(Candidate::from_probabilities(Vec::new()).is_none());
  }

  #[test]
  fn classifier_resizes_and_normalizes() {
    let spec = dashboard_spec();
    let session = Arc::new(ScriptedSession::new(
      TensorShape::new(3, 8, 8),
      vec![],
      logits_for_confidence(3, 1, 0.9),
    ));
    let classifier = Classifier::new(session.clone(), spec);
    let candidate = classifier.evaluate(&gray(100, 50), None).unwrap();
    assert_eq!(candidate.top_index, 1);
    assert!((candidate.confidence - 0.9).abs() < 1e-4);
    assert_eq!(session.calls(), 1);
  }

  #[test]
  fn non_finite_logits_are_runtime_errors() {
    for logits in [vec![f32::NAN; 3], vec![f32::NEG_INFINITY; 3], vec![0.0, f32::INFINITY, 1.0]] {
      let session = Arc::new(ScriptedSession::new(TensorShape::new(3, 8, 8), vec![], logits.clone()));
      let classifier = Classifier::new(session, dashboard_spec());
      assert!(
        matches!(classifier.infer(&gray(8, 8)), Err(InferenceError::Runtime(_))),
        "{:?}",
        logits
      );
    }
  }

  #[test]
  fn shape_and_class_mismatch_are_errors() {
    let session = Arc::new(ScriptedSession::new(TensorShape::new(1, 8, 8), vec![], vec![0.0; 3]));
    let classifier = Classifier::new(session, dashboard_spec());
    assert!(matches!(
      classifier.infer(&gray(8, 8)),
      Err(InferenceError::ShapeMismatch { .. })
    ));

    let session = Arc::new(ScriptedSession::new(TensorShape::new(3, 8, 8), vec![], vec![0.0; 5]));
    let classifier = Classifier::new(session, dashboard_spec());
    assert!(matches!(
      classifier.infer(&gray(8, 8)),
      Err(InferenceError::ClassCountMismatch { expected: 3, actual: 5 })
    ));
  }
}
