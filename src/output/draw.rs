// 该文件是 Wuding （屋顶） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::{geometry::Polygon, store::Detection};

// 按屋顶类型轮换使用的边框颜色
const PALETTE: [[u8; 3]; 6] = [
  [255, 0, 0],
  [0, 200, 0],
  [0, 0, 255],
  [255, 160, 0],
  [200, 0, 200],
  [0, 200, 200],
];

const LINE_THICKNESS: i32 = 2;

pub struct Draw {
  palette: Vec<[u8; 3]>,
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      palette: PALETTE.to_vec(),
      thickness: LINE_THICKNESS,
    }
  }
}

impl Draw {
  /// 同一屋顶类型在所有图像上使用相同颜色
  pub fn color_of(&self, roof_type: &str) -> Rgb<u8> {
    // FNV-1a
    let hash = roof_type
      .bytes()
      .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
    Rgb(self.palette[(hash % self.palette.len() as u64) as usize])
  }

  fn draw_polygon(&self, image: &mut RgbImage, polygon: &Polygon, color: Rgb<u8>) {
    let points = &polygon.points;
    for t in 0..self.thickness {
      let offset = t as f32;
      for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        draw_line_segment_mut(image, (a.x + offset, a.y), (b.x + offset, b.y), color);
        draw_line_segment_mut(image, (a.x, a.y + offset), (b.x, b.y + offset), color);
      }
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections.iter() {
      self.draw_polygon(image, &detection.polygon, self.color_of(&detection.roof_type));
    }
  }
}
