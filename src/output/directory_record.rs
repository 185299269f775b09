// 该文件是 Yibiao （仪表） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  diagnosis::DiagnosisResult,
  frame::EncodedImage,
  output::{Record, Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 图像保存方式
pub enum DrawWrapper {
  /// 画出评估区域
  Draw(Box<Draw>),
  /// 原样保存输入字节
  Record,
}

impl DrawWrapper {
  pub fn with(kind: &str) -> Self {
    match kind {
      "record" => DrawWrapper::Record,
      _ => DrawWrapper::Draw(Box::default()),
    }
  }

  fn save_image(&self, stem: &Path, frame: &EncodedImage, result: &DiagnosisResult) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => match frame.decode() {
        Ok(image) => draw.annotate(image.as_rgba(), result).save(stem.with_extension("png"))?,
        Err(e) => warn!("{} 无法解码，只保存记录: {}", frame.name, e),
      },
      DrawWrapper::Record => {
        let extension = Path::new(&frame.name)
          .extension()
          .and_then(|e| e.to_str())
          .unwrap_or("bin");
        std::fs::write(stem.with_extension(extension), &frame.bytes)?;
      }
    }
    Ok(())
  }
}

/// 按 年/月/日 分目录保存图像与 JSON 记录。
/// 默认跳过 "Error" 结果，`always` 参数时全部保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counters: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = if uri.query_pairs().any(|(k, _)| k == "record") {
      "record"
    } else {
      "draw"
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory =
      urlencoding::decode(uri.path()).map_err(|e| DirectoryRecordOutputError::PathError(e.to_string()))?;
    if directory.is_empty() {
      return Err(DirectoryRecordOutputError::PathError("记录目录为空".to_string()));
    }

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(directory.into_owned()),
      draw: DrawWrapper::with(kind),
      frame_counters: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counters.lock().unwrap_or_else(PoisonError::into_inner);
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  /// 不带扩展名的记录路径
  fn frame_stem(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!("{}-{:04X}", now.format("%H-%M-%S"), self.frame_id())))
  }
}

impl Render<EncodedImage, DiagnosisResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &EncodedImage, result: &DiagnosisResult) -> Result<(), Self::Error> {
    if result.is_error() && !self.always {
      debug!("跳过错误结果: {}", frame.name);
      return Ok(());
    }

    let stem = self.frame_stem(Utc::now())?;
    self.draw.save_image(&stem, frame, result)?;
    std::fs::write(
      stem.with_extension("json"),
      serde_json::to_string_pretty(&Record::new(frame, result))?,
    )?;
    debug!("记录已保存: {}", stem.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgba, RgbaImage};

  use super::*;
  use crate::{
    diagnosis::{DiagnosisDetails, DiagnosisError},
    frame::{DecodeError, RawImage, resize_and_encode},
    model::ModelIdentity,
  };

  fn png() -> EncodedImage {
    let image = RawImage::from(RgbaImage::from_pixel(24, 24, Rgba([1, 2, 3, 255])));
    EncodedImage::new("dash.png", resize_and_encode(&image, 24, 24, None).unwrap())
  }

  fn ok_result() -> DiagnosisResult {
    DiagnosisResult {
      issue_name: "Seatbelt".to_string(),
      confidence: 0.8,
      recommendations: vec![],
      severity: "Medium".to_string(),
      details: DiagnosisDetails::empty(ModelIdentity::Dashboard),
    }
  }

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  #[test]
  fn writes_dated_image_and_record() {
    let dir = tempfile::tempdir().unwrap();
    output(dir.path(), "").render_result(&png(), &ok_result()).unwrap();

    let files = files(dir.path());
    assert_eq!(files.len(), 2);
    let now = Utc::now();
    assert!(files[0].starts_with(dir.path().join(now.year().to_string())));
    assert!(files.iter().any(|f| f.extension().unwrap() == "png"));
    let json = files.iter().find(|f| f.extension().unwrap() == "json").unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["issue_name"], "Seatbelt");
  }

  #[test]
  fn error_results_need_always() {
    let error = DiagnosisResult::error(ModelIdentity::Dashboard, &DiagnosisError::Decode(DecodeError::Empty));
    let frame = EncodedImage::new("broken.jpg", b"junk".to_vec());

    let dir = tempfile::tempdir().unwrap();
    output(dir.path(), "").render_result(&frame, &error).unwrap();
    assert!(files(dir.path()).is_empty());

    output(dir.path(), "?always&record").render_result(&frame, &error).unwrap();
    let files = files(dir.path());
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.extension().unwrap() == "jpg"));
  }

  #[test]
  fn frame_ids_increase() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "");
    assert_eq!(output.frame_id(), 1);
    assert_eq!(output.frame_id(), 2);
  }
}
