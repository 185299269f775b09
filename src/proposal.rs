// 该文件是 Yibiao （仪表） 项目的一部分。
// src/proposal.rs - 亮斑区域候选
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

//! 整图置信度不足时，图标往往只占画面的一小部分。
//! 这里在缩小后的亮度图上找亮的连通区域，给出裁剪框。

use image::{
  GrayImage, Luma,
  imageops::{self, FilterType},
};
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

use crate::frame::{BoundingBox, RawImage, luminance};

const WORKING_LONG_SIDE: u32 = 320;
const WORKING_MIN_SHORT_SIDE: u32 = 64;

const THRESHOLD_STD_GAIN: f32 = 1.2;
const THRESHOLD_MIN: f32 = 140.0;
const THRESHOLD_MAX: f32 = 235.0;
const RELAXED_THRESHOLD_MIN: f32 = 110.0;
const RELAXED_THRESHOLD_RATIO: f32 = 0.85;

const MIN_AREA_PIXELS: f64 = 30.0;
const MIN_AREA_FRACTION: f64 = 0.0006;
const MAX_AREA_FRACTION: f64 = 0.25;
const MIN_BLOB_SIDE: u32 = 8;

const MAX_PROPOSALS: usize = 6;
const PAD_RATIO: f64 = 0.25;
const MIN_PROPOSAL_SIDE: u32 = 64;

/// 工作尺寸：长边缩小到至多 320，保持宽高比，短边不小于 64。
/// 只缩小不放大，小图按原尺寸处理。
pub fn working_size(width: u32, height: u32) -> (u32, u32) {
  let (long_side, short_side) = (width.max(height).max(1), width.min(height).max(1));
  let long = long_side.min(WORKING_LONG_SIDE);
  let scaled = (short_side as f64 * long as f64 / long_side as f64).round() as u32;
  let short = scaled.clamp(WORKING_MIN_SHORT_SIDE.min(short_side), long);
  if width >= height { (long, short) } else { (short, long) }
}

/// 根据亮度统计量求二值化阈值
pub fn luminance_threshold(luma: &[f32]) -> f32 {
  if luma.is_empty() {
    return THRESHOLD_MAX;
  }
  let n = luma.len() as f64;
  let mean = luma.iter().map(|v| *v as f64).sum::<f64>() / n;
  let variance = luma.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n;
  let maximum = luma.iter().copied().fold(f32::MIN, f32::max);

  let threshold = (mean as f32 + THRESHOLD_STD_GAIN * variance.sqrt() as f32).clamp(THRESHOLD_MIN, THRESHOLD_MAX);
  if maximum < threshold {
    RELAXED_THRESHOLD_MIN.max((maximum * RELAXED_THRESHOLD_RATIO).round())
  } else {
    threshold
  }
}

/// 工作尺寸下的一个连通亮区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
  pub bbox: BoundingBox,
  pub area: u64,
}

#[derive(Debug, Clone, Copy)]
struct BlobStats {
  min_x: u32,
  min_y: u32,
  max_x: u32,
  max_y: u32,
  area: u64,
}

impl BlobStats {
  fn new(x: u32, y: u32) -> Self {
    Self {
      min_x: x,
      min_y: y,
      max_x: x,
      max_y: y,
      area: 0,
    }
  }

  fn add(&mut self, x: u32, y: u32) {
    self.min_x = self.min_x.min(x);
    self.min_y = self.min_y.min(y);
    self.max_x = self.max_x.max(x);
    self.max_y = self.max_y.max(y);
    self.area += 1;
  }

  fn blob(&self) -> Blob {
    Blob {
      bbox: BoundingBox {
        x: self.min_x,
        y: self.min_y,
        width: self.max_x - self.min_x + 1,
        height: self.max_y - self.min_y + 1,
      },
      area: self.area,
    }
  }
}

/// 亮度不低于阈值的像素置为 255
pub fn binarize(width: u32, height: u32, luma: &[f32], threshold: f32) -> GrayImage {
  GrayImage::from_fn(width, height, |x, y| {
    if luma[(y * width + x) as usize] >= threshold {
      Luma([255u8])
    } else {
      Luma([0u8])
    }
  })
}

/// 在二值图上找出 8 连通亮区，按面积过滤、降序排列，至多保留 6 个
pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
  let (width, height) = mask.dimensions();
  let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

  let mut stats: Vec<Option<BlobStats>> = Vec::new();
  for (x, y, label) in labels.enumerate_pixels() {
    let label = label[0] as usize;
    if label == 0 {
      continue;
    }
    if stats.len() <= label {
      stats.resize(label + 1, None);
    }
    stats[label].get_or_insert_with(|| BlobStats::new(x, y)).add(x, y);
  }

  let pixel_count = (width as f64) * (height as f64);
  let min_area = MIN_AREA_PIXELS.max(pixel_count * MIN_AREA_FRACTION);
  let max_area = pixel_count * MAX_AREA_FRACTION;

  let mut blobs: Vec<Blob> = stats
    .into_iter()
    .flatten()
    .map(|s| s.blob())
    .filter(|b| {
      let area = b.area as f64;
      area >= min_area && area <= max_area && b.bbox.width >= MIN_BLOB_SIDE && b.bbox.height >= MIN_BLOB_SIDE
    })
    .collect();
  blobs.sort_by(|a, b| b.area.cmp(&a.area));
  blobs.truncate(MAX_PROPOSALS);
  blobs
}

/// 亮斑检测器，给出可能只含单个图标的裁剪框
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionProposer;

impl RegionProposer {
  pub fn propose(&self, image: &RawImage) -> Vec<BoundingBox> {
    let (width, height) = working_size(image.width(), image.height());
    let small = imageops::resize(image.as_rgba(), width, height, FilterType::Triangle);
    let luma: Vec<f32> = small.pixels().map(luminance).collect();

    let threshold = luminance_threshold(&luma);
    let blobs = find_blobs(&binarize(width, height, &luma, threshold));
    debug!("亮度阈值 {:.1}, 保留 {} 个亮区", threshold, blobs.len());

    let sx = image.width() as f64 / width as f64;
    let sy = image.height() as f64 / height as f64;
    blobs
      .iter()
      .map(|blob| map_back(&blob.bbox, sx, sy, image.width(), image.height()))
      .collect()
  }
}

/// 映射回原图坐标，按较长边的 25% 外扩，至少 64x64，并限制在图像内
fn map_back(bbox: &BoundingBox, sx: f64, sy: f64, image_w: u32, image_h: u32) -> BoundingBox {
  let x0 = (bbox.x as f64 * sx).floor() as i64;
  let y0 = (bbox.y as f64 * sy).floor() as i64;
  let x1 = (bbox.right() as f64 * sx).ceil() as i64;
  let y1 = (bbox.bottom() as f64 * sy).ceil() as i64;
  let (w, h) = (x1 - x0, y1 - y0);

  let pad = (w.max(h) as f64 * PAD_RATIO).round() as i64;
  let (mut x, mut y, mut w, mut h) = (x0 - pad, y0 - pad, w + 2 * pad, h + 2 * pad);

  let min_side = MIN_PROPOSAL_SIDE as i64;
  if w < min_side {
    x -= (min_side - w) / 2;
    w = min_side;
  }
  if h < min_side {
    y -= (min_side - h) / 2;
    h = min_side;
  }
  x = x.clamp(0, (image_w as i64 - w).max(0));
  y = y.clamp(0, (image_h as i64 - h).max(0));

  BoundingBox::clamped(x, y, w, h, image_w, image_h)
}

#[cfg(test)]
mod tests {
  use image::{Rgba, RgbaImage};

  use super::*;

  fn with_squares(width: u32, height: u32, background: u8, squares: &[(u32, u32, u32)]) -> RawImage {
    let mut pixels = RgbaImage::from_pixel(width, height, Rgba([background, background, background, 255]));
    for &(sx, sy, side) in squares {
      for y in sy..sy + side {
        for x in sx..sx + side {
          pixels.put_pixel(x, y, Rgba([255, 255, 255, 255]));
        }
      }
    }
    RawImage::from(pixels)
  }

  #[test]
  fn working_size_keeps_aspect() {
    assert_eq!(working_size(640, 480), (320, 240));
    assert_eq!(working_size(480, 640), (240, 320));
    assert_eq!(working_size(3200, 100), (320, 64));
    assert_eq!(working_size(100, 100), (100, 100));
    assert_eq!(working_size(200, 20), (200, 20));
    assert_eq!(working_size(30, 300), (30, 300));
  }

  #[test]
  fn small_images_are_not_upscaled() {
    // 原图中 3x3 的亮点不应被放大成候选框
    let image = with_squares(60, 40, 10, &[(20, 20, 3)]);
    assert!(RegionProposer.propose(&image).is_empty());
  }

  #[test]
  fn threshold_adapts_to_dim_images() {
    // 最大亮度达不到阈值时放宽
    assert_eq!(luminance_threshold(&[100.0, 100.0, 100.0, 120.0]), 110.0);
    let bright: Vec<f32> = (0..100).map(|i| if i < 5 { 250.0 } else { 20.0 }).collect();
    assert_eq!(luminance_threshold(&bright), 140.0);
    let dim: Vec<f32> = (0..100).map(|i| if i < 5 { 130.0 } else { 20.0 }).collect();
    assert_eq!(luminance_threshold(&dim), 111.0);
  }

  #[test]
  fn single_square_yields_one_containing_box() {
    let square = BoundingBox {
      x: 100,
      y: 120,
      width: 40,
      height: 40,
    };
    let image = with_squares(320, 240, 20, &[(square.x, square.y, square.width)]);
    let boxes = RegionProposer.propose(&image);
    assert_eq!(boxes.len(), 1);
    assert!(boxes[0].contains(&square), "{:?}", boxes[0]);
    assert!(boxes[0].width >= MIN_PROPOSAL_SIDE && boxes[0].height >= MIN_PROPOSAL_SIDE);
    assert!(image.bounds().contains(&boxes[0]));
  }

  #[test]
  fn square_in_large_image_maps_back() {
    let square = BoundingBox {
      x: 900,
      y: 300,
      width: 160,
      height: 160,
    };
    let image = with_squares(1280, 960, 30, &[(square.x, square.y, square.width)]);
    let boxes = RegionProposer.propose(&image);
    assert_eq!(boxes.len(), 1);
    assert!(boxes[0].contains(&square), "{:?}", boxes[0]);
  }

  #[test]
  fn uniform_images_yield_nothing() {
    for level in [0u8, 60, 120, 200, 255] {
      let image = with_squares(200, 150, level, &[]);
      assert!(RegionProposer.propose(&image).is_empty(), "level {}", level);
    }
  }

  #[test]
  fn blobs_sorted_and_limited() {
    let squares: Vec<(u32, u32, u32)> = (0..8).map(|i| (10 + i * 38, 20 + (i % 2) * 150, 12 + i * 2)).collect();
    let image = with_squares(320, 320, 10, &squares);
    let boxes = RegionProposer.propose(&image);
    assert_eq!(boxes.len(), MAX_PROPOSALS);
  }

  #[test]
  fn tiny_and_huge_blobs_are_rejected() {
    // 4x4 太小，220x220 超过 25% 面积
    let image = with_squares(320, 320, 10, &[(20, 20, 4), (90, 90, 220)]);
    assert!(RegionProposer.propose(&image).is_empty());
  }
}
