// 该文件是 Yibiao （仪表） 项目的一部分。
// src/model/store.rs - 模型会话缓存
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
  path::PathBuf,
  sync::{Arc, Mutex, OnceLock, PoisonError},
  time::Instant,
};

use tracing::{debug, error, info};

use crate::{
  config::ModelSpec,
  frame::TensorShape,
  model::{Classifier, ModelAsset, ModelIdentity, ModelLoadError, ModelLoader, ModelSession},
};

struct ModelEntry {
  asset: ModelAsset,
  spec: Arc<ModelSpec>,
  session: OnceLock<Arc<dyn ModelSession>>,
  // 串行化首次加载
  loading: Mutex<()>,
}

impl ModelEntry {
  fn new(asset: ModelAsset, spec: ModelSpec) -> Self {
    Self {
      asset,
      spec: Arc::new(spec),
      session: OnceLock::new(),
      loading: Mutex::new(()),
    }
  }

  fn classifier(&self, session: &Arc<dyn ModelSession>) -> Classifier {
    Classifier::new(session.clone(), self.spec.clone())
  }
}

/// 两个模型的会话缓存。每个模型至多加载一次，之后的读取不加锁。
/// 加载失败不会被缓存，下一次调用会重试。
pub struct ModelStore {
  loader: Arc<dyn ModelLoader>,
  cache_dir: PathBuf,
  ocr: Option<ModelEntry>,
  dashboard: Option<ModelEntry>,
}

impl ModelStore {
  pub fn new(loader: Arc<dyn ModelLoader>, cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      loader,
      cache_dir: cache_dir.into(),
      ocr: None,
      dashboard: None,
    }
  }

  pub fn with_model(mut self, asset: ModelAsset, spec: ModelSpec) -> Self {
    let slot = match spec.identity {
      ModelIdentity::Ocr => &mut self.ocr,
      ModelIdentity::Dashboard => &mut self.dashboard,
    };
    *slot = Some(ModelEntry::new(asset, spec));
    self
  }

  fn entry(&self, identity: ModelIdentity) -> Result<&ModelEntry, ModelLoadError> {
    match identity {
      ModelIdentity::Ocr => self.ocr.as_ref(),
      ModelIdentity::Dashboard => self.dashboard.as_ref(),
    }
    .ok_or(ModelLoadError::NotConfigured(identity))
  }

  pub fn spec(&self, identity: ModelIdentity) -> Option<&ModelSpec> {
    self.entry(identity).ok().map(|entry| entry.spec.as_ref())
  }

  pub fn is_loaded(&self, identity: ModelIdentity) -> bool {
    self.entry(identity).map(|e| e.session.get().is_some()).unwrap_or(false)
  }

  /// 取得模型会话，首次调用时加载
  pub fn load_model(&self, identity: ModelIdentity) -> Result<Classifier, ModelLoadError> {
    let entry = self.entry(identity)?;
    if let Some(session) = entry.session.get() {
      return Ok(entry.classifier(session));
    }

    let _guard = entry.loading.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(session) = entry.session.get() {
      debug!("{} 模型已由其他调用加载", identity);
      return Ok(entry.classifier(session));
    }

    info!("加载 {} 模型", identity);
    let now = Instant::now();
    let materialized = entry.asset.materialize(&self.cache_dir, identity)?;
    let session = self.loader.open(&materialized, &entry.spec).inspect_err(|e| {
      error!("{} 模型加载失败: {}", identity, e);
    })?;

    let expected = TensorShape::new(
      entry.spec.input_channels(),
      entry.spec.input_height as usize,
      entry.spec.input_width as usize,
    );
    if session.input_shape() != expected {
      error!(
        "{} 模型输入形状为 {:?}, 元数据声明为 {:?}",
        identity,
        session.input_shape().dims(),
        expected.dims()
      );
      return Err(ModelLoadError::ShapeMismatch {
        expected: expected.dims(),
        actual: session.input_shape().dims(),
      });
    }

    let session = entry.session.get_or_init(|| session);
    info!("{} 模型加载完成，耗时: {:.2?}", identity, now.elapsed());
    Ok(entry.classifier(session))
  }
}
