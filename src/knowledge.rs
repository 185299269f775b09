// 该文件是 Yibiao （仪表） 项目的一部分。
// src/knowledge.rs - 知识库
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

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigError;

mod label;
pub use self::label::{canonicalize, resolve_kb_key};

pub const DEFAULT_SEVERITY: &str = "Warning";
pub const UNCLEAR_SEVERITY: &str = "Low";

const BUNDLED_KNOWLEDGE_BASE: &str = include_str!("../data/knowledge_base.json");

/// 知识库条目，运行时只读
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub severity: Option<String>,
  #[serde(default)]
  pub action: Option<String>,
  #[serde(default)]
  pub sensors: Vec<String>,
  #[serde(default, alias = "causes")]
  pub faults: Vec<String>,
  #[serde(default)]
  pub checks: Vec<String>,
}

impl KnowledgeEntry {
  fn has_lists(&self) -> bool {
    !(self.sensors.is_empty() && self.faults.is_empty() && self.checks.is_empty())
  }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
  entries: HashMap<String, KnowledgeEntry>,
}

/// 一个标签的可读摘要
#[derive(Debug, Clone, PartialEq)]
pub struct Summary<'a> {
  pub label: String,
  pub entry: Option<&'a KnowledgeEntry>,
  pub lines: Vec<String>,
}

impl Summary<'_> {
  pub fn severity(&self, default: &str) -> String {
    self
      .entry
      .and_then(|e| e.severity.clone())
      .unwrap_or_else(|| default.to_string())
  }
}

pub fn percent(confidence: f32) -> u32 {
  (confidence * 100.0).round().clamp(0.0, 100.0) as u32
}

impl KnowledgeBase {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let entries: HashMap<String, KnowledgeEntry> = serde_json::from_str(json)?;
    debug!("知识库条目数: {}", entries.len());
    Ok(Self { entries })
  }

  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    info!("读取知识库: {}", path.display());
    Self::from_json_str(&std::fs::read_to_string(path)?)
  }

  /// 随程序打包的默认知识库
  pub fn bundled() -> Result<Self, ConfigError> {
    Self::from_json_str(BUNDLED_KNOWLEDGE_BASE)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 别名键优先，其次是显示标签，最后是原始标签
  pub fn lookup(&self, raw: &str) -> Option<(&str, &KnowledgeEntry)> {
    let canonical = canonicalize(raw);
    resolve_kb_key(raw)
      .into_iter()
      .chain([canonical.as_str(), raw])
      .find_map(|key| self.entries.get_key_value(key))
      .map(|(k, v)| (k.as_str(), v))
  }

  pub fn build_summary(&self, raw: &str, confidence: f32) -> Summary<'_> {
    let entry = self.lookup(raw).map(|(_, entry)| entry);
    let label = entry
      .and_then(|e| e.name.clone())
      .unwrap_or_else(|| canonicalize(raw));

    let mut lines = vec![format!("{} detected ({}% confidence)", label, percent(confidence))];
    if let Some(entry) = entry {
      if !entry.sensors.is_empty() {
        lines.push(format!("Sensors to inspect: {}", entry.sensors.join(", ")));
      }
      if !entry.faults.is_empty() {
        lines.push(format!("Possible faults: {}", entry.faults.join(", ")));
      }
      if !entry.checks.is_empty() {
        lines.push(format!("Recommended checks: {}", entry.checks.join(", ")));
      }
      if !entry.has_lists() {
        if let Some(action) = &entry.action {
          lines.push(action.clone());
        }
      }
    }

    Summary { label, entry, lines }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const DOC: &str = r#"{
    "Check Engine": {
      "name": "Check Engine Light",
      "severity": "High",
      "action": "Have the engine scanned for trouble codes.",
      "sensors": ["O2 sensor", "MAF sensor"],
      "causes": ["Loose fuel cap"],
      "checks": ["Tighten the fuel cap"]
    },
    "Coolant Temp": { "severity": "Critical", "action": "Stop and let the engine cool." },
    "Door Open": {}
  }"#;

  #[test]
  fn lookup_prefers_aliases() {
    let kb = KnowledgeBase::from_json_str(DOC).unwrap();
    assert_eq!(kb.lookup("engine_temperature").map(|(k, _)| k), Some("Coolant Temp"));
    assert_eq!(kb.lookup("check_engine").map(|(k, _)| k), Some("Check Engine"));
    assert_eq!(kb.lookup("door_open").map(|(k, _)| k), Some("Door Open"));
    assert!(kb.lookup("fog_lamb").is_none());
  }

  #[test]
  fn summary_lists_structured_lines() {
    let kb = KnowledgeBase::from_json_str(DOC).unwrap();
    let summary = kb.build_summary("check_engine", 0.9);
    assert_eq!(summary.label, "Check Engine Light");
    assert_eq!(
      summary.lines,
      vec![
        "Check Engine Light detected (90% confidence)",
        "Sensors to inspect: O2 sensor, MAF sensor",
        "Possible faults: Loose fuel cap",
        "Recommended checks: Tighten the fuel cap",
      ]
    );
    assert_eq!(summary.severity(DEFAULT_SEVERITY), "High");
  }

  #[test]
  fn summary_falls_back_to_action_and_header() {
    let kb = KnowledgeBase::from_json_str(DOC).unwrap();
    let summary = kb.build_summary("coolant", 0.5);
    assert_eq!(summary.label, "Coolant Temp");
    assert_eq!(summary.lines[1], "Stop and let the engine cool.");

    let summary = kb.build_summary("fog_lamb", 0.424);
    assert_eq!(summary.lines, vec!["Fog Lamp detected (42% confidence)"]);
    assert_eq!(summary.severity(DEFAULT_SEVERITY), DEFAULT_SEVERITY);
    assert_eq!(summary.severity(UNCLEAR_SEVERITY), UNCLEAR_SEVERITY);
  }

  #[test]
  fn bundled_base_resolves_every_alias_target() {
    let kb = KnowledgeBase::bundled().unwrap();
    for raw in ["coolant", "slip", "check_engine", "abs", "seatbelt", "tpms", "battery", "oil", "airbag", "brake"] {
      assert!(kb.lookup(raw).is_some(), "{}", raw);
    }
  }

  #[test]
  fn invalid_document_is_config_error() {
    assert!(matches!(
      KnowledgeBase::from_json_str(r#"{"ABS": {"sensors": "wheel"}}"#),
      Err(ConfigError::Json(_))
    ));
  }
}
