// 该文件是 Wuding （屋顶） 项目的一部分。
// src/geometry.rs - 旋转平面与检测框几何
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidBoxError {
  #[error("检测框坐标非有限值: {0:?}")]
  NonFinite(BBox),
  #[error("检测框尺寸为负: {0:?}")]
  NegativeSize(BBox),
}

/// 图像尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
  pub width: u32,
  pub height: u32,
}

impl ImageDims {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// 点是否落在 `[0, width) × [0, height)` 之内
  pub fn contains(&self, point: &Point) -> bool {
    point.x >= 0.0
      && point.y >= 0.0
      && point.x < self.width as f32
      && point.y < self.height as f32
  }
}

/// 轴对齐检测框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 检测框的角点形式 (x1, y1, x2, y2)，x2 = x + width
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Corners {
  /// 按像素计数的面积：`(x2 - x1 + 1) * (y2 - y1 + 1)`
  pub fn inclusive_area(&self) -> f32 {
    (self.x2 - self.x1 + 1.0) * (self.y2 - self.y1 + 1.0)
  }

  /// 与另一个框相交部分的像素面积，不相交时为 0
  pub fn inclusive_intersection(&self, other: &Corners) -> f32 {
    let xx1 = self.x1.max(other.x1);
    let yy1 = self.y1.max(other.y1);
    let xx2 = self.x2.min(other.x2);
    let yy2 = self.y2.min(other.y2);
    let w = (xx2 - xx1 + 1.0).max(0.0);
    let h = (yy2 - yy1 + 1.0).max(0.0);
    w * h
  }
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn validate(&self) -> Result<(), InvalidBoxError> {
    if !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite())
    {
      return Err(InvalidBoxError::NonFinite(*self));
    }
    if self.width < 0.0 || self.height < 0.0 {
      return Err(InvalidBoxError::NegativeSize(*self));
    }
    Ok(())
  }

  pub fn corners(&self) -> Corners {
    Corners {
      x1: self.x,
      y1: self.y,
      x2: self.x + self.width,
      y2: self.y + self.height,
    }
  }

  /// 顺时针四个角点：左上、右上、右下、左下
  pub fn to_polygon(&self) -> Polygon {
    let Corners { x1, y1, x2, y2 } = self.corners();
    Polygon {
      points: [
        Point::new(x1, y1),
        Point::new(x2, y1),
        Point::new(x2, y2),
        Point::new(x1, y2),
      ],
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 四个角点组成的（可能经过旋转的）检测区域
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
  pub points: [Point; 4],
}

impl Polygon {
  /// 所有坐标乘以 `factor`，用于从缩小后的图像恢复到原始分辨率
  pub fn scaled(&self, factor: f32) -> Polygon {
    Polygon {
      points: self.points.map(|p| Point::new(p.x * factor, p.y * factor)),
    }
  }
}

/// 包围任意多边形的最小轴对齐检测框
pub fn to_bounding_box(polygon: &Polygon) -> BBox {
  let (mut x_min, mut y_min) = (f32::INFINITY, f32::INFINITY);
  let (mut x_max, mut y_max) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
  for p in polygon.points.iter() {
    x_min = x_min.min(p.x);
    y_min = y_min.min(p.y);
    x_max = x_max.max(p.x);
    y_max = y_max.max(p.y);
  }
  BBox::new(x_min, y_min, x_max - x_min, y_max - y_min)
}

/// 旋转平面：描述旋转后图像中的点如何映射回原图。
///
/// 原图绕中心逆时针旋转 `angle` 度，画布扩展到能容纳整幅旋转图像，
/// 因此旋转图的尺寸 `rotated` 一般大于原图尺寸 `original`。
/// 画布四角在原图之外的区域由 [`rectify`] 负责剔除。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationTransform {
  angle: f64,
  cos: f64,
  sin: f64,
  original: ImageDims,
  rotated: ImageDims,
}

impl RotationTransform {
  pub fn identity(dims: ImageDims) -> Self {
    Self {
      angle: 0.0,
      cos: 1.0,
      sin: 0.0,
      original: dims,
      rotated: dims,
    }
  }

  pub fn angle(&self) -> f64 {
    self.angle
  }

  pub fn is_identity(&self) -> bool {
    self.angle == 0.0
  }

  pub fn original_dims(&self) -> ImageDims {
    self.original
  }

  pub fn rotated_dims(&self) -> ImageDims {
    self.rotated
  }

  fn original_center(&self) -> (f64, f64) {
    (
      self.original.width as f64 / 2.0,
      self.original.height as f64 / 2.0,
    )
  }

  fn rotated_center(&self) -> (f64, f64) {
    (
      self.rotated.width as f64 / 2.0,
      self.rotated.height as f64 / 2.0,
    )
  }

  /// 旋转图坐标 -> 原图坐标
  pub fn to_original(&self, point: &Point) -> Point {
    if self.is_identity() {
      return *point;
    }
    let (cx, cy) = self.original_center();
    let (rcx, rcy) = self.rotated_center();
    let dx = point.x as f64 - rcx;
    let dy = point.y as f64 - rcy;
    Point::new(
      (self.cos * dx - self.sin * dy + cx) as f32,
      (self.sin * dx + self.cos * dy + cy) as f32,
    )
  }

  /// 原图坐标 -> 旋转图坐标
  pub fn to_rotated(&self, point: &Point) -> Point {
    if self.is_identity() {
      return *point;
    }
    let (cx, cy) = self.original_center();
    let (rcx, rcy) = self.rotated_center();
    let dx = point.x as f64 - cx;
    let dy = point.y as f64 - cy;
    Point::new(
      (self.cos * dx + self.sin * dy + rcx) as f32,
      (-self.sin * dx + self.cos * dy + rcy) as f32,
    )
  }

  /// 原图到旋转图的 3x3 行主序齐次矩阵，供像素级旋转使用
  pub fn forward_matrix(&self) -> [f32; 9] {
    let (cx, cy) = self.original_center();
    let (rcx, rcy) = self.rotated_center();
    let tx = rcx - (self.cos * cx + self.sin * cy);
    let ty = rcy - (-self.sin * cx + self.cos * cy);
    [
      self.cos as f32,
      self.sin as f32,
      tx as f32,
      -self.sin as f32,
      self.cos as f32,
      ty as f32,
      0.0,
      0.0,
      1.0,
    ]
  }
}

/// 给定原图尺寸与角度（度），计算旋转平面。角度为 0 时返回恒等变换。
pub fn rotate_plane(dims: ImageDims, angle: f64) -> RotationTransform {
  if angle == 0.0 {
    return RotationTransform::identity(dims);
  }

  let radians = angle.to_radians();
  let (sin, cos) = radians.sin_cos();
  let (w, h) = (dims.width as f64, dims.height as f64);
  // round 而不是 ceil：90 度时 cos 只有 1e-17 量级
  let rotated_w = (w * cos.abs() + h * sin.abs()).round().max(1.0) as u32;
  let rotated_h = (w * sin.abs() + h * cos.abs()).round().max(1.0) as u32;

  RotationTransform {
    angle,
    cos,
    sin,
    original: dims,
    rotated: ImageDims::new(rotated_w, rotated_h),
  }
}

/// 将旋转图中的多边形映射回原图坐标系。
///
/// `remove_off_image` 为真时，只要有一个角点落在原图之外，整个多边形即被丢弃
/// （返回 `None`），不做裁剪。恒等变换直接原样返回。
pub fn rectify(
  polygon: &Polygon,
  transform: &RotationTransform,
  remove_off_image: bool,
) -> Option<Polygon> {
  if transform.is_identity() {
    return Some(*polygon);
  }

  let rectified = Polygon {
    points: polygon.points.map(|p| transform.to_original(&p)),
  };

  let original = transform.original_dims();
  if remove_off_image && !rectified.points.iter().all(|p| original.contains(p)) {
    return None;
  }

  Some(rectified)
}

/// 校验分类器输出的检测框后再做 [`rectify`]
pub fn rectify_box(
  bbox: &BBox,
  transform: &RotationTransform,
  remove_off_image: bool,
) -> Result<Option<Polygon>, InvalidBoxError> {
  bbox.validate()?;
  Ok(rectify(&bbox.to_polygon(), transform, remove_off_image))
}
