// 该文件是 Yibiao （仪表） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{FromUrl, frame::EncodedImage};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "read_folder")]
mod read_folder;
#[cfg(feature = "read_folder")]
pub use self::read_folder::{FolderInput, FolderInputError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

pub(crate) fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
    .unwrap_or(false)
}

pub(crate) fn url_path(url: &url::Url) -> Result<PathBuf, String> {
  let decoded = urlencoding::decode(url.path()).map_err(|e| e.to_string())?;
  if decoded.is_empty() {
    return Err("路径为空".to_string());
  }
  Ok(PathBuf::from(decoded.into_owned()))
}

pub(crate) fn source_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "read_folder")]
  #[error("目录输入错误: {0}")]
  FolderInputError(#[from] FolderInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_folder")]
  ReadFolder(FolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "read_folder")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == FolderInput::SCHEME {
        let input = FolderInput::from_url(url)?;
        return Ok(InputWrapper::ReadFolder(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  /// 是否只产出一张图像
  pub fn is_single(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(_) => true,
      #[cfg(feature = "read_folder")]
      InputWrapper::ReadFolder(_) => false,
    }
  }
}

impl IntoIterator for InputWrapper {
  type Item = EncodedImage;
  type IntoIter = InputWrapperIter;

  fn into_iter(self) -> Self::IntoIter {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => InputWrapperIter::ReadImageFile(input.into_iter()),
      #[cfg(feature = "read_folder")]
      InputWrapper::ReadFolder(input) => InputWrapperIter::ReadFolder(input.into_iter()),
    }
  }
}

pub enum InputWrapperIter {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(self::read_image_file::ImageFileInputIter),
  #[cfg(feature = "read_folder")]
  ReadFolder(self::read_folder::FolderInputIter),
}

impl Iterator for InputWrapperIter {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapperIter::ReadImageFile(input) => input.next(),
      #[cfg(feature = "read_folder")]
      InputWrapperIter::ReadFolder(input) => input.next(),
    }
  }
}
