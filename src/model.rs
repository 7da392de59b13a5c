// 该文件是 Wuding （屋顶） 项目的一部分。
// src/model.rs - 滑动窗口分类器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::GrayImage;

use crate::geometry::BBox;

/// 多尺度扫描参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
  /// 图像金字塔相邻两层的缩放比例，必须大于 1
  pub scale_factor: f64,
  /// 一个检测至少需要的相邻候选窗口数
  pub min_neighbors: u32,
}

impl Default for ScanParams {
  fn default() -> Self {
    Self {
      scale_factor: 1.1,
      min_neighbors: 3,
    }
  }
}

/// 滑动窗口分类器。
///
/// 给定一幅灰度图，返回图像坐标系中的轴对齐检测框。
/// 分类器本身不感知旋转，旋转与坐标还原由调用方负责。
pub trait Classifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, image: &GrayImage, params: &ScanParams) -> Result<Vec<BBox>, Self::Error>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
  type Error = C::Error;

  fn detect(&self, image: &GrayImage, params: &ScanParams) -> Result<Vec<BBox>, Self::Error> {
    (**self).detect(image, params)
  }
}

#[cfg(feature = "template_model")]
mod template;
#[cfg(feature = "template_model")]
pub use self::template::{TemplateClassifier, TemplateClassifierBuilder, TemplateModelError};
