// 该文件是 Yibiao （仪表） 项目的一部分。
// src/output/json_record.rs - JSON 结果输出
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  diagnosis::DiagnosisResult,
  frame::EncodedImage,
  output::{Record, Render},
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把诊断结果写成 JSON。
/// `json:-` 写到标准输出；`json:///path` 写入文件，带 `lines` 参数时每个结果追加一行。
pub struct JsonRecordOutput {
  path: Option<PathBuf>,
  lines: bool,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let decoded = urlencoding::decode(uri.path()).map_err(|e| JsonRecordError::PathError(e.to_string()))?;
    let path = match decoded.as_ref() {
      "" | "-" => None,
      path => Some(PathBuf::from(path)),
    };
    let lines = uri.query_pairs().any(|(k, _)| k == "lines");

    Ok(JsonRecordOutput { path, lines })
  }
}

impl JsonRecordOutput {
  pub fn stdout() -> Self {
    Self {
      path: None,
      lines: false,
    }
  }

  fn serialize(&self, record: &Record) -> Result<String, serde_json::Error> {
    if self.lines {
      serde_json::to_string(record)
    } else {
      serde_json::to_string_pretty(record)
    }
  }

  fn write_file(&self, path: &Path, text: &str) -> Result<(), JsonRecordError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    if self.lines {
      let mut file = OpenOptions::new().create(true).append(true).open(path)?;
      writeln!(file, "{}", text)?;
    } else {
      std::fs::write(path, text)?;
      info!("保存诊断结果到文件: {}", path.display());
    }
    Ok(())
  }
}

impl Render<EncodedImage, DiagnosisResult> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, frame: &EncodedImage, result: &DiagnosisResult) -> Result<(), Self::Error> {
    let text = self.serialize(&Record::new(frame, result))?;
    match &self.path {
      Some(path) => self.write_file(path, &text),
      None => {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text)?;
        debug!("诊断结果已写到标准输出");
        Ok(())
      }
    }
  }
}
