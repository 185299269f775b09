// 该文件是 Yibiao （仪表） 项目的一部分。
// src/ensemble.rs - 整图与裁剪的集成决策
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

//! 一次诊断调用内的推理编排。
//!
//! 先对整图推理，置信度足够时直接结束；否则依次评估亮斑候选框与
//! 五个固定网格裁剪，按类别取最大置信度后判定单灯、多灯或无法判断。

use std::{collections::HashMap, time::Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  config::{EnsembleConfig, EnsembleThresholds},
  frame::{BoundingBox, RawImage},
  knowledge::canonicalize,
  model::{Candidate, Classifier, InferenceError},
  proposal::RegionProposer,
};

const GRID_CROP_RATIO: f64 = 0.6;
const MAX_MULTI_LIGHTS: usize = 4;
const MAX_GUESSES: usize = 3;

/// 评估来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  WholeImage,
  Region,
  Grid,
}

/// 一次推理的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
  pub stage: Stage,
  pub region: Option<BoundingBox>,
  pub label: String,
  pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
  pub raw_label: String,
  pub canonical_label: String,
  pub confidence: f32,
}

impl Prediction {
  pub fn new(raw_label: impl Into<String>, confidence: f32) -> Self {
    let raw_label = raw_label.into();
    Self {
      canonical_label: canonicalize(&raw_label),
      raw_label,
      confidence,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
  Single { best: Prediction, runner_ups: Vec<Prediction> },
  Multi { lights: Vec<Prediction> },
  Unclear { guesses: Vec<Prediction> },
}

impl Outcome {
  pub fn kind(&self) -> &'static str {
    match self {
      Outcome::Single { .. } => "single",
      Outcome::Multi { .. } => "multi",
      Outcome::Unclear { .. } => "unclear",
    }
  }

  /// 报告中出现的全部预测，按报告顺序
  pub fn predictions(&self) -> Vec<&Prediction> {
    match self {
      Outcome::Single { best, runner_ups } => std::iter::once(best).chain(runner_ups).collect(),
      Outcome::Multi { lights } => lights.iter().collect(),
      Outcome::Unclear { guesses } => guesses.iter().collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleReport {
  pub outcome: Outcome,
  pub evaluations: Vec<Evaluation>,
  pub short_circuit: bool,
  pub skipped: usize,
  pub deadline_reached: bool,
}

/// 五个重叠的正方形裁剪：中心与四个角，边长为短边的 60%
pub fn grid_crops(width: u32, height: u32) -> Vec<BoundingBox> {
  let side = (width.min(height) as f64 * GRID_CROP_RATIO).round().max(1.0) as i64;
  let (w, h) = (width as i64, height as i64);
  [
    ((w - side) / 2, (h - side) / 2),
    (0, 0),
    (w - side, 0),
    (0, h - side),
    (w - side, h - side),
  ]
  .into_iter()
  .map(|(x, y)| BoundingBox::clamped(x, y, side, side, width, height))
  .collect()
}

/// 每个类别只保留最高置信度，丢弃低于 `floor` 的观测，按置信度降序。
/// 与评估顺序无关。
pub fn aggregate(evaluations: &[Evaluation], floor: f32) -> Vec<(String, f32)> {
  let mut table: HashMap<&str, f32> = HashMap::new();
  for evaluation in evaluations.iter().filter(|e| e.confidence >= floor) {
    let entry = table.entry(evaluation.label.as_str()).or_insert(evaluation.confidence);
    *entry = entry.max(evaluation.confidence);
  }
  sorted_labels(table)
}

fn sorted_labels(table: HashMap<&str, f32>) -> Vec<(String, f32)> {
  let mut labels: Vec<(String, f32)> = table.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
  labels.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
  labels
}

/// 按各自最高置信度排列的不同类别
fn distinct_labels(evaluations: &[Evaluation]) -> Vec<(String, f32)> {
  aggregate(evaluations, f32::NEG_INFINITY)
}

/// 置信度最高的单次评估，并列时取先出现的
fn best_evaluation(evaluations: &[Evaluation]) -> Option<&Evaluation> {
  evaluations.iter().fold(None, |best: Option<&Evaluation>, e| match best {
    Some(b) if b.confidence >= e.confidence => best,
    _ => Some(e),
  })
}

/// 多灯优先于无法判断，再退回单灯
pub fn decide(evaluations: &[Evaluation], thresholds: &EnsembleThresholds) -> Option<Outcome> {
  let best = best_evaluation(evaluations)?;

  let qualifying: Vec<Prediction> = aggregate(evaluations, thresholds.aggregate_floor)
    .into_iter()
    .filter(|(_, confidence)| *confidence >= thresholds.multi_light)
    .take(MAX_MULTI_LIGHTS)
    .map(|(label, confidence)| Prediction::new(label, confidence))
    .collect();
  if qualifying.len() >= 2 {
    return Some(Outcome::Multi { lights: qualifying });
  }

  if best.confidence < thresholds.unclear {
    let guesses = distinct_labels(evaluations)
      .into_iter()
      .take(MAX_GUESSES)
      .map(|(label, confidence)| Prediction::new(label, confidence))
      .collect();
    return Some(Outcome::Unclear { guesses });
  }

  let runner_ups = if best.confidence < thresholds.short_circuit {
    distinct_labels(evaluations)
      .into_iter()
      .filter(|(label, _)| *label != best.label)
      .take(MAX_GUESSES)
      .map(|(label, confidence)| Prediction::new(label, confidence))
      .collect()
  } else {
    Vec::new()
  };
  Some(Outcome::Single {
    best: Prediction::new(best.label.clone(), best.confidence),
    runner_ups,
  })
}

/// 集成决策流程
#[derive(Debug, Clone, Default)]
pub struct EnsemblePolicy {
  config: EnsembleConfig,
  proposer: RegionProposer,
}

impl EnsemblePolicy {
  pub fn new(config: EnsembleConfig) -> Self {
    Self {
      config,
      proposer: RegionProposer,
    }
  }

  pub fn config(&self) -> &EnsembleConfig {
    &self.config
  }

  fn record(classifier: &Classifier, stage: Stage, region: Option<BoundingBox>, candidate: &Candidate) -> Evaluation {
    let label = classifier
      .spec()
      .class_label(candidate.top_index)
      .map(str::to_string)
      .unwrap_or_else(|| candidate.top_index.to_string());
    Evaluation {
      stage,
      region,
      label,
      confidence: candidate.confidence,
    }
  }

  /// 整图推理失败时返回错误；单个裁剪失败只记录并跳过
  pub fn run(&self, classifier: &Classifier, image: &RawImage) -> Result<EnsembleReport, InferenceError> {
    let started = Instant::now();
    let thresholds = &self.config.thresholds;

    let whole = classifier.evaluate(image, None)?;
    let mut evaluations = vec![Self::record(classifier, Stage::WholeImage, None, &whole)];
    let short_circuit = whole.confidence >= thresholds.short_circuit;

    let mut skipped = 0;
    let mut deadline_reached = false;
    if short_circuit {
      debug!("整图置信度 {:.3}，跳过裁剪评估", whole.confidence);
    } else {
      let regions = self.proposer.propose(image);
      info!("整图置信度 {:.3} 偏低，评估 {} 个亮区与网格裁剪", whole.confidence, regions.len());

      let crops = regions
        .into_iter()
        .map(|bbox| (Stage::Region, bbox))
        .chain(grid_crops(image.width(), image.height()).into_iter().map(|bbox| (Stage::Grid, bbox)));
      for (stage, bbox) in crops {
        if let Some(deadline) = self.config.deadline
          && started.elapsed() >= deadline
        {
          warn!("已超过截止时间 {:?}，停止裁剪评估", deadline);
          deadline_reached = true;
          break;
        }
        match classifier.evaluate(image, Some(bbox)) {
          Ok(candidate) => evaluations.push(Self::record(classifier, stage, Some(bbox), &candidate)),
          Err(e) => {
            warn!("裁剪 {:?} 推理失败，已跳过: {}", bbox, e);
            skipped += 1;
          }
        }
      }
    }

    let outcome = decide(&evaluations, thresholds).ok_or(InferenceError::EmptyOutput)?;
    info!(
      "集成决策: {}，共 {} 次评估，耗时 {:.2?}",
      outcome.kind(),
      evaluations.len(),
      started.elapsed()
    );
    Ok(EnsembleReport {
      outcome,
      evaluations,
      short_circuit,
      skipped,
      deadline_reached,
    })
  }
}
