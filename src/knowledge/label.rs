// 该文件是 Yibiao （仪表） 项目的一部分。
// src/knowledge/label.rs - 类别标签规范化
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

use std::{
  collections::{HashMap, HashSet},
  sync::LazyLock,
};

const ACRONYMS: &[&str] = &["ABS", "AWD", "EBD", "ESP", "EV", "SRS", "PCS"];

// 整句覆盖，键为小写
const OVERRIDES: &[(&str, &str)] = &[
  ("check engine", "Check Engine"),
  ("ebd", "EBD"),
  ("abs", "ABS"),
  ("tpms", "TPMS"),
  ("esp off", "ESP Off"),
  ("srs airbag", "SRS Airbag"),
  ("oil pressure", "Oil Pressure"),
  ("4wd", "4WD"),
  ("dpf", "DPF"),
];

// 同义词 -> 知识库键，别名为小写下划线形式
const ALIASES: &[(&str, &str)] = &[
  ("coolant", "Coolant Temp"),
  ("coolant_temp", "Coolant Temp"),
  ("coolant_temperature", "Coolant Temp"),
  ("engine_temperature", "Coolant Temp"),
  ("engine_temp", "Coolant Temp"),
  ("traction_control", "Traction Control"),
  ("slip", "Traction Control"),
  ("esp", "Traction Control"),
  ("stability_control", "Traction Control"),
  ("electronic_stability", "Traction Control"),
  ("check_engine", "Check Engine"),
  ("engine", "Check Engine"),
  ("mil", "Check Engine"),
  ("battery", "Battery"),
  ("charging", "Battery"),
  ("charging_system", "Battery"),
  ("oil", "Oil Pressure"),
  ("oil_pressure", "Oil Pressure"),
  ("tire_pressure", "Tire Pressure"),
  ("tyre_pressure", "Tire Pressure"),
  ("tpms", "Tire Pressure"),
  ("airbag", "Airbag"),
  ("srs", "Airbag"),
  ("srs_airbag", "Airbag"),
  ("seatbelt", "Seatbelt"),
  ("seat_belt", "Seatbelt"),
  ("brake", "Brake"),
  ("brake_system", "Brake"),
  ("parking_brake", "Brake"),
  ("abs", "ABS"),
];

static ACRONYM_SET: LazyLock<HashSet<&'static str>> = LazyLock::new(|| ACRONYMS.iter().copied().collect());
static OVERRIDE_MAP: LazyLock<HashMap<&'static str, &'static str>> =
  LazyLock::new(|| OVERRIDES.iter().copied().collect());
static ALIAS_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| ALIASES.iter().copied().collect());

fn fix_typos(token: &str) -> String {
  let token = token.replace("headlamb", "headlamp");
  if token == "lamb" { "lamp".to_string() } else { token }
}

fn title_case(token: &str) -> String {
  let upper = token.to_uppercase();
  if ACRONYM_SET.contains(upper.as_str()) {
    return upper;
  }
  let mut chars = token.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

/// 小写、空白折叠后的标签词序列
fn normalized_tokens(raw: &str) -> Vec<String> {
  let spaced = raw.replace('_', " ");
  let trimmed = spaced.trim_end_matches(|c: char| c == '-' || c.is_whitespace());
  trimmed
    .split_whitespace()
    .map(|t| fix_typos(&t.to_lowercase()))
    .collect()
}

/// 原始类别标签 -> 显示标签
pub fn canonicalize(raw: &str) -> String {
  let phrase = normalized_tokens(raw).join(" ");
  if let Some(display) = OVERRIDE_MAP.get(phrase.as_str()) {
    return display.to_string();
  }
  phrase.split(' ').map(title_case).collect::<Vec<_>>().join(" ")
}

/// 通过别名表把同义标签归一到同一个知识库键
pub fn resolve_kb_key(raw: &str) -> Option<&'static str> {
  let key = normalized_tokens(&raw.replace('-', " ")).join("_");
  ALIAS_MAP.get(key.as_str()).copied()
}
