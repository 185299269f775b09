// 该文件是 Yibiao （仪表） 项目的一部分。
// src/config.rs - 模型元数据与集成策略配置
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

//! 模型元数据在加载时被校验为强类型配置。
//!
//! 仅对文档中省略的字段使用默认值（均值/方差、输入尺寸、阈值），
//! 结构错误（向量长度不对、方差非正、类别为空等）直接报 [`ConfigError`]。

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{DEFAULT_MEAN, DEFAULT_STD},
  model::ModelIdentity,
};

pub const OCR_DEFAULT_INPUT_SIZE: u32 = 32;
pub const DASHBOARD_DEFAULT_INPUT_SIZE: u32 = 224;

/// 整图置信度达到该值时直接输出，不再评估裁剪
pub const SHORT_CIRCUIT_CONFIDENCE: f32 = 0.35;
/// 至少两个标签达到该值时判定为多灯
pub const MULTI_LIGHT_CONFIDENCE: f32 = 0.30;
/// 聚合时低于该值的观测被丢弃
pub const AGGREGATE_FLOOR: f32 = 0.25;
/// 最佳候选低于该值时判定为无法识别
pub const UNCLEAR_CONFIDENCE: f32 = 0.20;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("配置无效: {field}: {message}")]
  Invalid { field: &'static str, message: String },
}

impl ConfigError {
  pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field,
      message: message.into(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputSizeField {
  Square(u32),
  Pair([u32; 2]),
  Object { width: u32, height: u32 },
}

#[derive(Debug, Deserialize)]
struct RawModelMetadata {
  #[serde(default)]
  input_size: Option<InputSizeField>,
  #[serde(default)]
  mean: Option<Vec<f32>>,
  #[serde(default)]
  std: Option<Vec<f32>>,
  #[serde(default, alias = "labels")]
  classes: Option<Vec<String>>,
}

/// 输入张量的归一化方式
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
  Grayscale,
  Rgb { mean: [f32; 3], std: [f32; 3] },
}

/// 经过校验的模型元数据
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
  pub identity: ModelIdentity,
  pub input_width: u32,
  pub input_height: u32,
  pub normalization: Normalization,
  pub classes: Vec<String>,
}

fn triple(field: &'static str, values: Option<Vec<f32>>, default: [f32; 3]) -> Result<[f32; 3], ConfigError> {
  match values {
    None => Ok(default),
    Some(values) => <[f32; 3]>::try_from(values.as_slice())
      .map_err(|_| ConfigError::invalid(field, format!("需要 3 个元素, 实际 {} 个", values.len()))),
  }
}

impl ModelSpec {
  pub fn from_json_str(identity: ModelIdentity, json: &str) -> Result<Self, ConfigError> {
    let raw: RawModelMetadata = serde_json::from_str(json)?;
    Self::validate(identity, raw)
  }

  pub fn from_path(identity: ModelIdentity, path: &Path) -> Result<Self, ConfigError> {
    debug!("读取模型元数据: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(identity, &json)
  }

  fn validate(identity: ModelIdentity, raw: RawModelMetadata) -> Result<Self, ConfigError> {
    let default_size = match identity {
      ModelIdentity::Ocr => OCR_DEFAULT_INPUT_SIZE,
      ModelIdentity::Dashboard => DASHBOARD_DEFAULT_INPUT_SIZE,
    };
    let (input_width, input_height) = match raw.input_size {
      None => (default_size, default_size),
      Some(InputSizeField::Square(size)) => (size, size),
      Some(InputSizeField::Pair([width, height])) => (width, height),
      Some(InputSizeField::Object { width, height }) => (width, height),
    };
    if input_width == 0 || input_height == 0 {
      return Err(ConfigError::invalid(
        "input_size",
        format!("尺寸必须为正: {}x{}", input_width, input_height),
      ));
    }

    let normalization = match identity {
      ModelIdentity::Ocr => Normalization::Grayscale,
      ModelIdentity::Dashboard => {
        let mean = triple("mean", raw.mean, DEFAULT_MEAN)?;
        let std = triple("std", raw.std, DEFAULT_STD)?;
        if let Some((i, s)) = std.iter().enumerate().find(|(_, s)| **s <= 0.0 || !s.is_finite()) {
          return Err(ConfigError::invalid("std", format!("第 {} 个方差必须为正, 实际为 {}", i, s)));
        }
        Normalization::Rgb { mean, std }
      }
    };

    let classes = raw.classes.unwrap_or_default();
    if classes.is_empty() {
      return Err(ConfigError::invalid("classes", "类别列表为空"));
    }
    if let Some(i) = classes.iter().position(|c| c.trim().is_empty()) {
      return Err(ConfigError::invalid("classes", format!("第 {} 个类别名为空", i)));
    }

    Ok(Self {
      identity,
      input_width,
      input_height,
      normalization,
      classes,
    })
  }

  pub fn num_classes(&self) -> usize {
    self.classes.len()
  }

  pub fn class_label(&self, index: usize) -> Option<&str> {
    self.classes.get(index).map(String::as_str)
  }

  pub fn input_channels(&self) -> usize {
    match self.normalization {
      Normalization::Grayscale => 1,
      Normalization::Rgb { .. } => 3,
    }
  }
}

/// 集成决策阈值，每一项可单独调整
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnsembleThresholds {
  pub short_circuit: f32,
  pub multi_light: f32,
  pub aggregate_floor: f32,
  pub unclear: f32,
}

impl Default for EnsembleThresholds {
  fn default() -> Self {
    Self {
      short_circuit: SHORT_CIRCUIT_CONFIDENCE,
      multi_light: MULTI_LIGHT_CONFIDENCE,
      aggregate_floor: AGGREGATE_FLOOR,
      unclear: UNCLEAR_CONFIDENCE,
    }
  }
}

impl EnsembleThresholds {
  pub fn validate(self) -> Result<Self, ConfigError> {
    for (field, value) in [
      ("short_circuit", self.short_circuit),
      ("multi_light", self.multi_light),
      ("aggregate_floor", self.aggregate_floor),
      ("unclear", self.unclear),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("阈值必须位于 [0, 1], 实际为 {}", value)));
      }
    }
    Ok(self)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawEnsembleConfig {
  thresholds: EnsembleThresholds,
  deadline_ms: Option<u64>,
}

/// 集成流程配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsembleConfig {
  pub thresholds: EnsembleThresholds,
  /// 超过该时间后不再开始新的裁剪评估
  pub deadline: Option<Duration>,
}

impl EnsembleConfig {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let raw: RawEnsembleConfig = serde_json::from_str(json)?;
    Ok(Self {
      thresholds: raw.thresholds.validate()?,
      deadline: raw.deadline_ms.map(Duration::from_millis),
    })
  }

  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    Self::from_json_str(&std::fs::read_to_string(path)?)
  }

  pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
    self.deadline = deadline;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dashboard_defaults_fill_omitted_fields() {
    let spec = ModelSpec::from_json_str(ModelIdentity::Dashboard, r#"{"classes": ["abs", "check_engine"]}"#).unwrap();
    assert_eq!(spec.input_width, DASHBOARD_DEFAULT_INPUT_SIZE);
    assert_eq!(
      spec.normalization,
      Normalization::Rgb {
        mean: DEFAULT_MEAN,
        std: DEFAULT_STD
      }
    );
    assert_eq!(spec.class_label(1), Some("check_engine"));
    assert_eq!(spec.input_channels(), 3);
  }

  #[test]
  fn ocr_uses_grayscale_and_small_input() {
    let spec = ModelSpec::from_json_str(ModelIdentity::Ocr, r#"{"labels": ["0", "1"], "mean": [0.1]}"#).unwrap();
    assert_eq!((spec.input_width, spec.input_height), (32, 32));
    assert_eq!(spec.normalization, Normalization::Grayscale);
  }

  #[test]
  fn input_size_forms() {
    let square = ModelSpec::from_json_str(ModelIdentity::Dashboard, r#"{"input_size": 128, "classes": ["a"]}"#).unwrap();
    assert_eq!((square.input_width, square.input_height), (128, 128));
    let pair = ModelSpec::from_json_str(ModelIdentity::Dashboard, r#"{"input_size": [96, 64], "classes": ["a"]}"#).unwrap();
    assert_eq!((pair.input_width, pair.input_height), (96, 64));
  }

  #[test]
  fn structural_errors_fail_fast() {
    let cases = [
      (r#"{"classes": []}"#, "classes"),
      (r#"{"classes": ["a"], "mean": [0.1, 0.2]}"#, "mean"),
      (r#"{"classes": ["a"], "std": [0.2, 0.0, 0.2]}"#, "std"),
      (r#"{"classes": ["a"], "input_size": 0}"#, "input_size"),
    ];
    for (json, expected) in cases {
      match ModelSpec::from_json_str(ModelIdentity::Dashboard, json) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected, "{}", json),
        other => panic!("{} 期望 Invalid, 实际 {:?}", json, other),
      }
    }
    assert!(matches!(
      ModelSpec::from_json_str(ModelIdentity::Dashboard, r#"{"classes": "abs"}"#),
      Err(ConfigError::Json(_))
    ));
  }

  #[test]
  fn thresholds_are_individually_tunable() {
    let config = EnsembleConfig::from_json_str(r#"{"thresholds": {"unclear": 0.1}, "deadline_ms": 250}"#).unwrap();
    assert_eq!(config.thresholds.unclear, 0.1);
    assert_eq!(config.thresholds.short_circuit, SHORT_CIRCUIT_CONFIDENCE);
    assert_eq!(config.thresholds.multi_light, MULTI_LIGHT_CONFIDENCE);
    assert_eq!(config.thresholds.aggregate_floor, AGGREGATE_FLOOR);
    assert_eq!(config.deadline, Some(Duration::from_millis(250)));

    assert!(EnsembleConfig::from_json_str(r#"{"thresholds": {"multi_light": 1.5}}"#).is_err());
  }
}
