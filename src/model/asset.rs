// 该文件是 Yibiao （仪表） 项目的一部分。
// src/model/asset.rs - 模型资源与物化
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
  sync::Arc,
};

use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::ModelIdentity};

use super::ModelLoadError;

const MODEL_FILE_NAME: &str = "model.onnx";
const WEIGHTS_SUFFIX: &str = "data";

/// 模型或权重数据的来源
#[derive(Debug, Clone)]
pub enum AssetSource {
  File(PathBuf),
  Bytes(Arc<[u8]>),
}

/// 一个模型资源：模型本体，以及可选的外部权重文件
#[derive(Debug, Clone)]
pub struct ModelAsset {
  pub model: AssetSource,
  pub weights: Option<AssetSource>,
}

/// 运行时可以直接打开的模型文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedModel {
  pub model_path: PathBuf,
  pub weights_path: Option<PathBuf>,
}

impl FromUrlWithScheme for ModelAsset {
  const SCHEME: &'static str = "onnx";
}

fn decode_path(raw: &str) -> Result<PathBuf, ModelLoadError> {
  let decoded = urlencoding::decode(raw).map_err(|e| ModelLoadError::ModelPathError(e.to_string()))?;
  if decoded.is_empty() {
    return Err(ModelLoadError::ModelPathError("模型路径为空".to_string()));
  }
  Ok(PathBuf::from(decoded.into_owned()))
}

impl FromUrl for ModelAsset {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = decode_path(url.path())?;
    let weights = url
      .query_pairs()
      .find(|(k, _)| k == "weights")
      .map(|(_, v)| decode_path(&v))
      .transpose()?;

    Ok(ModelAsset::from_file(model_path).with_weights(weights.map(AssetSource::File)))
  }
}

impl ModelAsset {
  /// 从文件加载；未指定权重时使用同目录下的 `<模型文件名>.data`（如果存在）
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let sibling = sibling_weights(&path);
    Self {
      model: AssetSource::File(path),
      weights: Some(AssetSource::File(sibling)),
    }
  }

  pub fn from_bytes(model: impl Into<Arc<[u8]>>) -> Self {
    Self {
      model: AssetSource::Bytes(model.into()),
      weights: None,
    }
  }

  /// 指定外部权重。ONNX 按模型内记录的 `location` 文件名查找外部数据，
  /// 因此权重文件名必须与之一致；复制到缓存时保留原文件名，
  /// 内存数据写为 `<模型文件名>.data`。
  pub fn with_weights(mut self, weights: Option<AssetSource>) -> Self {
    if weights.is_some() {
      self.weights = weights;
    }
    self
  }

  /// 将模型物化到运行时可打开的位置。
  ///
  /// 同目录下的文件原地使用；内存数据或分散在不同目录的文件复制到
  /// `cache_dir/<identity>/`。缺失的权重文件被容忍。
  pub fn materialize(&self, cache_dir: &Path, identity: ModelIdentity) -> Result<MaterializedModel, ModelLoadError> {
    let weights = match &self.weights {
      Some(AssetSource::File(path)) if !path.exists() => {
        debug!("权重文件不存在, 忽略: {}", path.display());
        None
      }
      other => other.clone(),
    };

    if let AssetSource::File(model_path) = &self.model {
      if !model_path.is_file() {
        return Err(ModelLoadError::Materialize(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          format!("模型文件不存在: {}", model_path.display()),
        )));
      }
      let in_place = match &weights {
        None => Some(None),
        Some(AssetSource::File(w)) if w.parent() == model_path.parent() => Some(Some(w.clone())),
        Some(_) => None,
      };
      if let Some(weights_path) = in_place {
        debug!("模型文件原地使用: {}", model_path.display());
        return Ok(MaterializedModel {
          model_path: model_path.clone(),
          weights_path,
        });
      }
    }

    let directory = cache_dir.join(identity.as_str());
    std::fs::create_dir_all(&directory)?;
    info!("物化模型到: {}", directory.display());

    let model_name = match &self.model {
      AssetSource::File(path) => path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(MODEL_FILE_NAME)),
      AssetSource::Bytes(_) => PathBuf::from(MODEL_FILE_NAME),
    };
    let model_path = directory.join(&model_name);
    write_source(&self.model, &model_path)?;

    let weights_path = match &weights {
      None => None,
      Some(source) => {
        let name = match source {
          AssetSource::File(path) => path.file_name().map(PathBuf::from),
          AssetSource::Bytes(_) => None,
        }
        .unwrap_or_else(|| sibling_weights(&model_name));
        let path = directory.join(name);
        if let Err(e) = write_source(source, &path) {
          warn!("权重物化失败, 忽略: {}", e);
          None
        } else {
          Some(path)
        }
      }
    };

    Ok(MaterializedModel {
      model_path,
      weights_path,
    })
  }
}

fn sibling_weights(model: &Path) -> PathBuf {
  let mut name = model.as_os_str().to_owned();
  name.push(".");
  name.push(WEIGHTS_SUFFIX);
  PathBuf::from(name)
}

fn write_source(source: &AssetSource, target: &Path) -> std::io::Result<()> {
  match source {
    AssetSource::File(path) => {
      if path != target {
        std::fs::copy(path, target)?;
      }
    }
    AssetSource::Bytes(bytes) => std::fs::write(target, bytes)?,
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_url_reads_path_and_weights() {
    let url = Url::parse("onnx:///models/dash%20board.onnx?weights=/blobs/w.bin").unwrap();
    let asset = ModelAsset::from_url(&url).unwrap();
    assert!(matches!(&asset.model, AssetSource::File(p) if p == Path::new("/models/dash board.onnx")));
    assert!(matches!(&asset.weights, Some(AssetSource::File(p)) if p == Path::new("/blobs/w.bin")));

    let url = Url::parse("image:///models/x.onnx").unwrap();
    assert!(ModelAsset::from_url(&url).is_err());
  }

  #[test]
  fn file_next_to_model_is_used_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("ocr.onnx");
    std::fs::write(&model, b"model").unwrap();

    let cache = tempfile::tempdir().unwrap();
    let materialized = ModelAsset::from_file(&model)
      .materialize(cache.path(), ModelIdentity::Ocr)
      .unwrap();
    assert_eq!(materialized.model_path, model);
    assert_eq!(materialized.weights_path, None);

    std::fs::write(sibling_weights(&model), b"weights").unwrap();
    let materialized = ModelAsset::from_file(&model)
      .materialize(cache.path(), ModelIdentity::Ocr)
      .unwrap();
    assert_eq!(materialized.weights_path, Some(dir.path().join("ocr.onnx.data")));
  }

  #[test]
  fn bytes_are_written_to_cache() {
    let cache = tempfile::tempdir().unwrap();
    let asset = ModelAsset::from_bytes(b"model".to_vec())
      .with_weights(Some(AssetSource::Bytes(Arc::from(b"weights".to_vec()))));
    let materialized = asset.materialize(cache.path(), ModelIdentity::Dashboard).unwrap();
    assert_eq!(materialized.model_path, cache.path().join("dashboard").join("model.onnx"));
    assert_eq!(std::fs::read(&materialized.model_path).unwrap(), b"model");
    let weights = materialized.weights_path.unwrap();
    assert_eq!(weights.file_name().unwrap(), "model.onnx.data");
    assert_eq!(std::fs::read(weights).unwrap(), b"weights");
  }

  #[test]
  fn weights_from_other_directory_keep_their_name() {
    let models = tempfile::tempdir().unwrap();
    let blobs = tempfile::tempdir().unwrap();
    let model = models.path().join("dash.onnx");
    let weights = blobs.path().join("w.bin");
    std::fs::write(&model, b"model").unwrap();
    std::fs::write(&weights, b"weights").unwrap();

    let cache = tempfile::tempdir().unwrap();
    let materialized = ModelAsset::from_file(&model)
      .with_weights(Some(AssetSource::File(weights)))
      .materialize(cache.path(), ModelIdentity::Dashboard)
      .unwrap();
    let directory = cache.path().join("dashboard");
    assert_eq!(materialized.model_path, directory.join("dash.onnx"));
    assert_eq!(materialized.weights_path, Some(directory.join("w.bin")));
    assert_eq!(std::fs::read(directory.join("w.bin")).unwrap(), b"weights");
  }

  #[test]
  fn missing_model_file_is_an_error() {
    let cache = tempfile::tempdir().unwrap();
    let result = ModelAsset::from_file("/nonexistent/model.onnx").materialize(cache.path(), ModelIdentity::Ocr);
    assert!(matches!(result, Err(ModelLoadError::Materialize(_))));
  }
}
