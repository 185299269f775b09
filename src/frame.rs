// 该文件是 Yibiao （仪表） 项目的一部分。
// src/frame.rs - 图像帧、张量与归一化
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

use std::io::Cursor;

use image::{
  ImageFormat, Rgba, RgbaImage,
  imageops::{self, FilterType},
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const RGB_CHANNELS: usize = 3;
const GRAY_CHANNELS: usize = 1;

/// 亮度权重 (R, G, B)
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

pub const DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DEFAULT_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像数据为空")]
  Empty,
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("图像尺寸无效: {width}x{height}")]
  ZeroSized { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: u32, height: u32 },
}

/// 像素亮度，取值 [0, 255]
#[inline]
pub fn luminance(pixel: &Rgba<u8>) -> f32 {
  LUMA_WEIGHTS[0] * pixel[0] as f32 + LUMA_WEIGHTS[1] * pixel[1] as f32 + LUMA_WEIGHTS[2] * pixel[2] as f32
}

/// 整数矩形区域，始终位于源图像范围之内
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BoundingBox {
  /// 将任意（可能越界的）矩形裁剪到 `image_w` x `image_h` 范围内。
  /// 图像非空时结果至少为 1x1。
  pub fn clamped(x: i64, y: i64, width: i64, height: i64, image_w: u32, image_h: u32) -> Self {
    let (iw, ih) = (image_w as i64, image_h as i64);
    let x0 = x.clamp(0, (iw - 1).max(0));
    let y0 = y.clamp(0, (ih - 1).max(0));
    let x1 = (x + width).clamp(x0 + 1, iw.max(x0 + 1));
    let y1 = (y + height).clamp(y0 + 1, ih.max(y0 + 1));
    Self {
      x: x0 as u32,
      y: y0 as u32,
      width: (x1.min(iw) - x0).max(0) as u32,
      height: (y1.min(ih) - y0).max(0) as u32,
    }
  }

  pub fn full(image_w: u32, image_h: u32) -> Self {
    Self {
      x: 0,
      y: 0,
      width: image_w,
      height: image_h,
    }
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }

  pub fn area(&self) -> u64 {
    self.width as u64 * self.height as u64
  }

  pub fn contains(&self, other: &BoundingBox) -> bool {
    self.x <= other.x && self.y <= other.y && self.right() >= other.right() && self.bottom() >= other.bottom()
  }
}

/// 解码后的 RGBA 图像，解码后不可变
#[derive(Debug, Clone)]
pub struct RawImage {
  pixels: RgbaImage,
}

impl From<RgbaImage> for RawImage {
  fn from(pixels: RgbaImage) -> Self {
    Self { pixels }
  }
}

impl RawImage {
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    RgbaImage::from_raw(width, height, data).map(Self::from)
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn as_rgba(&self) -> &RgbaImage {
    &self.pixels
  }

  pub fn bounds(&self) -> BoundingBox {
    BoundingBox::full(self.width(), self.height())
  }

  /// 先裁剪后缩放。裁剪区域先被限制在图像范围内。
  pub fn crop_resize(&self, crop: Option<BoundingBox>, width: u32, height: u32) -> RawImage {
    let resized = match crop {
      Some(bbox) => {
        let bbox = BoundingBox::clamped(
          bbox.x as i64,
          bbox.y as i64,
          bbox.width as i64,
          bbox.height as i64,
          self.width(),
          self.height(),
        );
        let cropped = imageops::crop_imm(&self.pixels, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
        imageops::resize(&cropped, width, height, FilterType::Triangle)
      }
      None => imageops::resize(&self.pixels, width, height, FilterType::Triangle),
    };
    RawImage::from(resized)
  }

  /// 灰度归一化：亮度 / 255，再映射到 [-1, 1]，输出 1x1xHxW
  pub fn to_gray_tensor(&self) -> Tensor {
    let data: Vec<f32> = self
      .pixels
      .pixels()
      .map(|p| (luminance(p) / 255.0 - 0.5) / 0.5)
      .collect();
    Tensor::new(data, TensorShape::new(GRAY_CHANNELS, self.height() as usize, self.width() as usize))
  }

  /// RGB 标准化，平面（通道优先）布局，输出 1x3xHxW
  pub fn to_rgb_tensor(&self, mean: &[f32; 3], std: &[f32; 3]) -> Tensor {
    let (width, height) = (self.width() as usize, self.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; RGB_CHANNELS * plane];

    for (idx, pixel) in self.pixels.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        let value = pixel[c] as f32 / 255.0;
        data[c * plane + idx] = (value - mean[c]) / std[c];
      }
    }

    Tensor::new(data, TensorShape::new(RGB_CHANNELS, height, width))
  }
}

/// 输入源给出的一张压缩图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
  /// 来源名，通常是文件名
  pub name: String,
  pub bytes: Vec<u8>,
}

impl EncodedImage {
  pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      bytes,
    }
  }

  pub fn decode(&self) -> Result<RawImage, DecodeError> {
    decode(&self.bytes)
  }
}

/// 解码压缩图像字节
pub fn decode(bytes: &[u8]) -> Result<RawImage, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }
  let image = image::load_from_memory(bytes)?;
  let (width, height) = (image.width(), image.height());
  if width == 0 || height == 0 {
    return Err(DecodeError::ZeroSized { width, height });
  }
  debug!("图像解码完成: {}x{}", width, height);
  Ok(RawImage::from(image.to_rgba8()))
}

/// 先裁剪后缩放，并重新编码为 PNG。仅用于 I/O 边界。
pub fn resize_and_encode(
  image: &RawImage,
  width: u32,
  height: u32,
  crop: Option<BoundingBox>,
) -> Result<Vec<u8>, EncodeError> {
  if width == 0 || height == 0 {
    return Err(EncodeError::InvalidTarget { width, height });
  }
  let resized = image.crop_resize(crop, width, height);
  let mut buffer = Cursor::new(Vec::new());
  resized.as_rgba().write_to(&mut buffer, ImageFormat::Png)?;
  Ok(buffer.into_inner())
}

/// NCHW 形状，batch 固定为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub batch: usize,
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub fn new(channels: usize, height: usize, width: usize) -> Self {
    Self {
      batch: 1,
      channels,
      height,
      width,
    }
  }

  pub fn len(&self) -> usize {
    self.batch * self.channels * self.height * self.width
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dims(&self) -> [usize; 4] {
    [self.batch, self.channels, self.height, self.width]
  }
}

#[derive(Debug, Clone)]
pub struct Tensor {
  data: Box<[f32]>,
  shape: TensorShape,
}

impl Tensor {
  pub fn new(data: Vec<f32>, shape: TensorShape) -> Self {
    if data.len() != shape.len() {
      panic!("数据长度不匹配: 期望长度 {}, 实际长度 {}", shape.len(), data.len());
    }
    Self {
      data: data.into_boxed_slice(),
      shape,
    }
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid(width: u32, height: u32, color: [u8; 4]) -> RawImage {
    RawImage::from(RgbaImage::from_pixel(width, height, Rgba(color)))
  }

  #[test]
  fn decode_rejects_garbage() {
    assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    assert!(matches!(decode(b"not an image"), Err(DecodeError::Image(_))));
  }

  #[test]
  fn encode_then_decode_keeps_target_size() {
    let image = solid(40, 20, [10, 20, 30, 255]);
    let bytes = resize_and_encode(&image, 16, 8, None).unwrap();
    let decoded = decode(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 8));
  }

  #[test]
  fn crop_happens_before_resize() {
    let mut pixels = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 255]));
    for y in 0..10 {
      for x in 10..20 {
        pixels.put_pixel(x, y, Rgba([255, 255, 255, 255]));
      }
    }
    let image = RawImage::from(pixels);
    let crop = BoundingBox {
      x: 10,
      y: 0,
      width: 10,
      height: 10,
    };
    let out = image.crop_resize(Some(crop), 4, 4);
    assert!(out.as_rgba().pixels().all(|p| p[0] == 255));
  }

  #[test]
  fn gray_tensor_is_centered() {
    let white = solid(2, 3, [255, 255, 255, 255]).to_gray_tensor();
    assert_eq!(white.shape().dims(), [1, 1, 3, 2]);
    assert!(white.as_slice().iter().all(|v| (v - 1.0).abs() < 1e-4));

    let black = solid(2, 2, [0, 0, 0, 255]).to_gray_tensor();
    assert!(black.as_slice().iter().all(|v| (v + 1.0).abs() < 1e-6));
  }

  #[test]
  fn rgb_tensor_is_planar() {
    let image = solid(2, 2, [255, 0, 0, 255]);
    let tensor = image.to_rgb_tensor(&DEFAULT_MEAN, &DEFAULT_STD);
    assert_eq!(tensor.shape().dims(), [1, 3, 2, 2]);
    let data = tensor.as_slice();
    let red = (1.0 - DEFAULT_MEAN[0]) / DEFAULT_STD[0];
    let green = (0.0 - DEFAULT_MEAN[1]) / DEFAULT_STD[1];
    assert!(data[..4].iter().all(|v| (v - red).abs() < 1e-5));
    assert!(data[4..8].iter().all(|v| (v - green).abs() < 1e-5));
  }

  #[test]
  fn bounding_box_is_clamped() {
    let bbox = BoundingBox::clamped(-10, -5, 50, 50, 30, 20);
    assert_eq!(bbox, BoundingBox::full(30, 20));
    let bbox = BoundingBox::clamped(25, 15, 64, 64, 30, 20);
    assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (25, 15, 5, 5));
  }
}
