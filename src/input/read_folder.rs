// 该文件是 Yibiao （仪表） 项目的一部分。
// src/input/read_folder.rs - 目录批量图像输入
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

use std::{path::PathBuf, vec};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::EncodedImage,
  input::{is_image_file, source_name, url_path},
};

#[derive(Error, Debug)]
pub enum FolderInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("参数错误: {0}")]
  InvalidQuery(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 目录中的图像文件，按文件名排序，逐个读取
pub struct FolderInput {
  files: Vec<PathBuf>,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = FolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FolderInputError::SchemaMismatch);
    }

    let limit = url
      .query_pairs()
      .find(|(k, _)| k == "limit")
      .map(|(_, v)| {
        v.parse::<usize>()
          .map_err(|e| FolderInputError::InvalidQuery(format!("limit={}: {}", v, e)))
      })
      .transpose()?;

    let directory = url_path(url).map_err(FolderInputError::PathError)?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(&directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image_file(path))
      .collect();
    files.sort();
    if let Some(limit) = limit {
      files.truncate(limit);
    }

    info!("目录 {} 中找到 {} 张图像", directory.display(), files.len());
    Ok(FolderInput { files })
  }
}

impl FolderInput {
  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl IntoIterator for FolderInput {
  type Item = EncodedImage;
  type IntoIter = FolderInputIter;

  fn into_iter(self) -> Self::IntoIter {
    FolderInputIter {
      files: self.files.into_iter(),
    }
  }
}

pub struct FolderInputIter {
  files: vec::IntoIter<PathBuf>,
}

impl Iterator for FolderInputIter {
  type Item = EncodedImage;

  /// 读取失败的文件记录警告后跳过
  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match std::fs::read(&path) {
        Ok(bytes) => return Some(EncodedImage::new(source_name(&path), bytes)),
        Err(e) => warn!("读取 {} 失败，已跳过: {}", path.display(), e),
      }
    }
    None
  }
}
