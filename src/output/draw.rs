// 该文件是 Yibiao （仪表） 项目的一部分。
// src/output/draw.rs - 诊断区域可视化
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

use image::{Rgba, RgbaImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{diagnosis::DiagnosisResult, frame::BoundingBox};

const BOX_THICKNESS: u32 = 2;
const REPORTED_COLOR: [u8; 4] = [0, 0, 255, 255]; // 蓝色
const EVALUATED_COLOR: [u8; 4] = [160, 160, 160, 255];

pub struct Draw {
  thickness: u32,
  reported_color: Rgba<u8>,
  evaluated_color: Rgba<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      reported_color: Rgba(REPORTED_COLOR),
      evaluated_color: Rgba(EVALUATED_COLOR),
    }
  }
}

impl Draw {
  fn draw_box(&self, image: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>) {
    for t in 0..self.thickness {
      if bbox.width <= 2 * t || bbox.height <= 2 * t {
        break;
      }
      let rect = Rect::at((bbox.x + t) as i32, (bbox.y + t) as i32).of_size(bbox.width - 2 * t, bbox.height - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  /// 画出所有评估过的裁剪框，被报告的标签所在的框用醒目的颜色，最后绘制
  pub fn draw_regions(&self, image: &mut RgbaImage, result: &DiagnosisResult) {
    let reported: Vec<&str> = result
      .details
      .predictions
      .iter()
      .map(|p| p.raw_label.as_str())
      .collect();

    let (hits, misses): (Vec<_>, Vec<_>) = result
      .regions()
      .partition(|e| reported.contains(&e.label.as_str()));
    for (evaluations, color) in [(misses, self.evaluated_color), (hits, self.reported_color)] {
      for bbox in evaluations.iter().filter_map(|e| e.region) {
        self.draw_box(image, &bbox, color);
      }
    }
  }

  pub fn annotate(&self, image: &RgbaImage, result: &DiagnosisResult) -> RgbaImage {
    let mut image = image.clone();
    self.draw_regions(&mut image, result);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    diagnosis::{DiagnosisDetails, DiagnosisResult},
    ensemble::{Evaluation, Prediction, Stage},
    model::ModelIdentity,
  };

  fn result_with(evaluations: Vec<Evaluation>, reported: &str) -> DiagnosisResult {
    let mut details = DiagnosisDetails::empty(ModelIdentity::Dashboard);
    details.predictions = vec![Prediction::new(reported, 0.4)];
    details.evaluations = evaluations;
    DiagnosisResult {
      issue_name: "ABS".to_string(),
      confidence: 0.4,
      recommendations: vec![],
      severity: "High".to_string(),
      details,
    }
  }

  fn region(label: &str, x: u32, y: u32) -> Evaluation {
    Evaluation {
      stage: Stage::Region,
      region: Some(BoundingBox {
        x,
        y,
        width: 20,
        height: 20,
      }),
      label: label.to_string(),
      confidence: 0.4,
    }
  }

  #[test]
  fn reported_regions_are_highlighted() {
    let image = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
    let result = result_with(vec![region("abs", 10, 10), region("seatbelt", 60, 60)], "abs");
    let out = Draw::default().annotate(&image, &result);

    assert_eq!(*out.get_pixel(10, 10), Rgba(REPORTED_COLOR));
    assert_eq!(*out.get_pixel(11, 15), Rgba(REPORTED_COLOR));
    assert_eq!(*out.get_pixel(60, 60), Rgba(EVALUATED_COLOR));
    // 框内部不变
    assert_eq!(*out.get_pixel(20, 20), Rgba([0, 0, 0, 255]));
    assert_eq!(*image.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
  }

  #[test]
  fn whole_image_evaluations_draw_nothing() {
    let image = RgbaImage::from_pixel(30, 30, Rgba([5, 5, 5, 255]));
    let whole = Evaluation {
      stage: Stage::WholeImage,
      region: None,
      label: "abs".to_string(),
      confidence: 0.9,
    };
    let out = Draw::default().annotate(&image, &result_with(vec![whole], "abs"));
    assert_eq!(out, image);
  }
}
