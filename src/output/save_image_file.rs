// 该文件是 Yibiao （仪表） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use std::path::PathBuf;

use image::RgbaImage;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  diagnosis::DiagnosisResult,
  frame::EncodedImage,
  output::{Render, draw::Draw},
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let decoded = urlencoding::decode(uri.path()).map_err(|e| SaveImageFileError::PathError(e.to_string()))?;
    if decoded.is_empty() {
      return Err(SaveImageFileError::PathError("保存路径为空".to_string()));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(decoded.into_owned()),
      draw: Draw::default(),
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: RgbaImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;

    warn!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<EncodedImage, DiagnosisResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  /// 无法解码的输入没有可标注的图像，只记录警告
  fn render_result(&self, frame: &EncodedImage, result: &DiagnosisResult) -> Result<(), Self::Error> {
    match frame.decode() {
      Ok(image) => self.save_image(self.draw.annotate(image.as_rgba(), result)),
      Err(e) => {
        warn!("{} 无法解码，不保存标注图像: {}", frame.name, e);
        Ok(())
      }
    }
  }
}
