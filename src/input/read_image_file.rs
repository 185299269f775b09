// 该文件是 Yibiao （仪表） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::EncodedImage,
  input::{source_name, url_path},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 单张图像文件，读取原始压缩字节，解码交给诊断流程
pub struct ImageFileInput {
  image: EncodedImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_path(url).map_err(ImageFileInputError::PathError)?;
    let bytes = std::fs::read(&path)?;
    info!("读取图像文件: {} ({} 字节)", path.display(), bytes.len());

    Ok(ImageFileInput {
      image: EncodedImage::new(source_name(&path), bytes),
    })
  }
}

impl IntoIterator for ImageFileInput {
  type Item = EncodedImage;
  type IntoIter = ImageFileInputIter;

  fn into_iter(self) -> Self::IntoIter {
    ImageFileInputIter {
      image: Some(self.image),
    }
  }
}

pub struct ImageFileInputIter {
  image: Option<EncodedImage>,
}

impl Iterator for ImageFileInputIter {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}
