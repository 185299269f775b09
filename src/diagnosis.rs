// 该文件是 Yibiao （仪表） 项目的一部分。
// src/diagnosis.rs - 诊断服务入口
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

use std::{convert::Infallible, time::Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::EnsembleConfig,
  ensemble::{EnsemblePolicy, EnsembleReport, Evaluation, Outcome, Prediction},
  frame::{DecodeError, EncodedImage, RawImage, decode},
  knowledge::{DEFAULT_SEVERITY, KnowledgeBase, UNCLEAR_SEVERITY, percent},
  model::{InferenceError, Model, ModelIdentity, ModelLoadError, ModelStore},
};

pub const ERROR_CATEGORY: &str = "Error";
pub const UNCLEAR_ISSUE: &str = "Unclear";
pub const MULTI_LIGHT_ISSUE: &str = "Multiple Warning Lights";

const ERROR_REMEDIATION: &str = "Could not analyze the photo. Retake it in good light and try again.";
const UNCLEAR_HINT: &str = "The warning light could not be identified clearly.";
const RETAKE_HINT: &str = "Retake the photo closer to the icon and avoid glare.";

#[derive(Error, Debug)]
pub enum DiagnosisError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
}

/// 附加信息，供界面与记录输出使用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisDetails {
  pub mode: ModelIdentity,
  pub outcome: Option<&'static str>,
  pub predictions: Vec<Prediction>,
  pub evaluations: Vec<Evaluation>,
  pub short_circuit: bool,
  pub skipped: usize,
  pub deadline_reached: bool,
  pub error: Option<String>,
}

impl DiagnosisDetails {
  pub fn empty(mode: ModelIdentity) -> Self {
    Self {
      mode,
      outcome: None,
      predictions: Vec::new(),
      evaluations: Vec::new(),
      short_circuit: false,
      skipped: 0,
      deadline_reached: false,
      error: None,
    }
  }

  fn from_report(mode: ModelIdentity, report: EnsembleReport) -> Self {
    Self {
      outcome: Some(report.outcome.kind()),
      predictions: report.outcome.predictions().into_iter().cloned().collect(),
      evaluations: report.evaluations,
      short_circuit: report.short_circuit,
      skipped: report.skipped,
      deadline_reached: report.deadline_reached,
      ..Self::empty(mode)
    }
  }
}

/// 一次诊断调用的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisResult {
  pub issue_name: String,
  pub confidence: f32,
  pub recommendations: Vec<String>,
  pub severity: String,
  pub details: DiagnosisDetails,
}

impl DiagnosisResult {
  pub fn error(mode: ModelIdentity, e: &DiagnosisError) -> Self {
    let mut details = DiagnosisDetails::empty(mode);
    details.error = Some(e.to_string());
    Self {
      issue_name: ERROR_CATEGORY.to_string(),
      confidence: 0.0,
      recommendations: vec![ERROR_REMEDIATION.to_string()],
      severity: ERROR_CATEGORY.to_string(),
      details,
    }
  }

  pub fn is_error(&self) -> bool {
    self.severity == ERROR_CATEGORY && self.details.error.is_some()
  }

  /// 详情中的评估区域，附带原始标签与置信度
  pub fn regions(&self) -> impl Iterator<Item = &Evaluation> {
    self.details.evaluations.iter().filter(|e| e.region.is_some())
  }
}

/// 诊断服务，持有模型缓存、知识库与集成策略
pub struct Diagnoser {
  store: ModelStore,
  knowledge: KnowledgeBase,
  policy: EnsemblePolicy,
}

impl Diagnoser {
  pub fn new(store: ModelStore, knowledge: KnowledgeBase, config: EnsembleConfig) -> Self {
    Self {
      store,
      knowledge,
      policy: EnsemblePolicy::new(config),
    }
  }

  pub fn store(&self) -> &ModelStore {
    &self.store
  }

  pub fn knowledge(&self) -> &KnowledgeBase {
    &self.knowledge
  }

  /// 按模式分发，任何错误都转为 "Error" 结果
  pub fn diagnose(&self, mode: ModelIdentity, bytes: &[u8]) -> DiagnosisResult {
    let now = Instant::now();
    let result = match mode {
      ModelIdentity::Ocr => self.try_ocr(bytes),
      ModelIdentity::Dashboard => self.try_dashboard(bytes),
    };
    match result {
      Ok(result) => {
        info!(
          "{} 诊断完成: {} ({}%), 耗时 {:.2?}",
          mode,
          result.issue_name,
          percent(result.confidence),
          now.elapsed()
        );
        result
      }
      Err(e) => {
        error!("{} 诊断失败: {}", mode, e);
        DiagnosisResult::error(mode, &e)
      }
    }
  }

  pub fn diagnose_ocr(&self, bytes: &[u8]) -> DiagnosisResult {
    self.diagnose(ModelIdentity::Ocr, bytes)
  }

  pub fn diagnose_dashboard(&self, bytes: &[u8]) -> DiagnosisResult {
    self.diagnose(ModelIdentity::Dashboard, bytes)
  }

  /// 固定模式，作为任务中的模型使用
  pub fn with_mode(&self, mode: ModelIdentity) -> DiagnosisModel<'_> {
    DiagnosisModel { diagnoser: self, mode }
  }

  fn try_ocr(&self, bytes: &[u8]) -> Result<DiagnosisResult, DiagnosisError> {
    let image = decode(bytes)?;
    let classifier = self.store.load_model(ModelIdentity::Ocr)?;
    let candidate = classifier.evaluate(&image, None)?;
    let label = classifier
      .spec()
      .class_label(candidate.top_index)
      .map(str::to_string)
      .unwrap_or_else(|| candidate.top_index.to_string());

    let prediction = Prediction::new(label, candidate.confidence);
    let mut details = DiagnosisDetails::empty(ModelIdentity::Ocr);
    details.outcome = Some("single");
    details.predictions.push(prediction.clone());
    Ok(self.single(&prediction, &[], details))
  }

  fn try_dashboard(&self, bytes: &[u8]) -> Result<DiagnosisResult, DiagnosisError> {
    let image: RawImage = decode(bytes)?;
    let classifier = self.store.load_model(ModelIdentity::Dashboard)?;
    let report = self.policy.run(&classifier, &image)?;
    let outcome = report.outcome.clone();
    let details = DiagnosisDetails::from_report(ModelIdentity::Dashboard, report);

    Ok(match &outcome {
      Outcome::Single { best, runner_ups } => self.single(best, runner_ups, details),
      Outcome::Multi { lights } => self.multi(lights, details),
      Outcome::Unclear { guesses } => self.unclear(guesses, details),
    })
  }

  fn single(&self, best: &Prediction, runner_ups: &[Prediction], details: DiagnosisDetails) -> DiagnosisResult {
    let summary = self.knowledge.build_summary(&best.raw_label, best.confidence);
    let mut recommendations = summary.lines.clone();
    recommendations.extend(
      runner_ups
        .iter()
        .map(|p| format!("Also possible: {} ({}%)", p.canonical_label, percent(p.confidence))),
    );
    DiagnosisResult {
      issue_name: summary.label.clone(),
      confidence: best.confidence,
      recommendations,
      severity: summary.severity(DEFAULT_SEVERITY),
      details,
    }
  }

  fn multi(&self, lights: &[Prediction], details: DiagnosisDetails) -> DiagnosisResult {
    let summaries: Vec<_> = lights
      .iter()
      .map(|p| self.knowledge.build_summary(&p.raw_label, p.confidence))
      .collect();
    // 取第一个声明了严重程度的条目
    let severity = summaries
      .iter()
      .find_map(|s| s.entry.and_then(|e| e.severity.clone()))
      .unwrap_or_else(|| DEFAULT_SEVERITY.to_string());
    DiagnosisResult {
      issue_name: MULTI_LIGHT_ISSUE.to_string(),
      confidence: lights.first().map(|p| p.confidence).unwrap_or_default(),
      recommendations: summaries.into_iter().flat_map(|s| s.lines).collect(),
      severity,
      details,
    }
  }

  fn unclear(&self, guesses: &[Prediction], details: DiagnosisDetails) -> DiagnosisResult {
    let mut recommendations = vec![UNCLEAR_HINT.to_string()];
    recommendations.extend(guesses.iter().map(|p| {
      let label = self.knowledge.build_summary(&p.raw_label, p.confidence).label;
      format!("Possibly {} ({}%)", label, percent(p.confidence))
    }));
    recommendations.push(RETAKE_HINT.to_string());
    DiagnosisResult {
      issue_name: UNCLEAR_ISSUE.to_string(),
      confidence: guesses.first().map(|p| p.confidence).unwrap_or_default(),
      recommendations,
      severity: UNCLEAR_SEVERITY.to_string(),
      details,
    }
  }
}

pub struct DiagnosisModel<'a> {
  diagnoser: &'a Diagnoser,
  mode: ModelIdentity,
}

impl DiagnosisModel<'_> {
  pub fn mode(&self) -> ModelIdentity {
    self.mode
  }
}

impl Model for DiagnosisModel<'_> {
  type Input = EncodedImage;
  type Output = DiagnosisResult;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("诊断 {} ({} 字节)", input.name, input.bytes.len());
    Ok(self.diagnoser.diagnose(self.mode, &input.bytes))
  }
}
