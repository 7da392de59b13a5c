// 该文件是 Wuding （屋顶） 项目的一部分。
// src/model/template.rs - 模板匹配分类器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;

use image::{GrayImage, ImageReader, imageops::FilterType};
use imageproc::template_matching::{MatchTemplateMethod, match_template};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::BBox,
  grouping::group_rectangles,
  model::{Classifier, ScanParams},
};

const TEMPLATE_DEFAULT_THRESHOLD: f32 = 0.8;
const TEMPLATE_GROUP_EPS: f32 = 0.2;
const TEMPLATE_MAX_LEVELS: usize = 64;

#[derive(Error, Debug)]
pub enum TemplateModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模板图像解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("模板为空: {0}")]
  EmptyModel(String),
  #[error("匹配阈值无效: {0}")]
  InvalidThreshold(String),
}

pub struct TemplateClassifierBuilder {
  model_path: String,
  threshold: f32,
}

impl FromUrlWithScheme for TemplateClassifierBuilder {
  const SCHEME: &'static str = "template";
}

impl FromUrl for TemplateClassifierBuilder {
  type Error = TemplateModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TemplateModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut threshold = TEMPLATE_DEFAULT_THRESHOLD;
    for (k, v) in url.query_pairs() {
      if k == "threshold" {
        threshold = v
          .parse()
          .map_err(|_| TemplateModelError::InvalidThreshold(v.to_string()))?;
      }
    }

    Ok(TemplateClassifierBuilder {
      model_path: url.path().to_string(),
      threshold,
    })
  }
}

impl TemplateClassifierBuilder {
  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn build(self) -> Result<TemplateClassifier, TemplateModelError> {
    if !(-1.0..=1.0).contains(&self.threshold) {
      return Err(TemplateModelError::InvalidThreshold(
        self.threshold.to_string(),
      ));
    }

    info!("加载模板文件: {}", self.model_path);
    let template = ImageReader::open(&self.model_path)?.decode()?.to_luma8();
    if template.width() == 0 || template.height() == 0 {
      return Err(TemplateModelError::EmptyModel(self.model_path));
    }
    debug!(
      "模板尺寸: {}x{}, 匹配阈值: {}",
      template.width(),
      template.height(),
      self.threshold
    );

    Ok(TemplateClassifier::new(template, self.threshold))
  }
}

/// 归一化互相关模板匹配，在图像金字塔上逐层滑动窗口
pub struct TemplateClassifier {
  template: GrayImage,
  threshold: f32,
}

impl TemplateClassifier {
  pub fn new(template: GrayImage, threshold: f32) -> Self {
    Self {
      template,
      threshold,
    }
  }

  fn scan_level(&self, level: &GrayImage, factor: f64, candidates: &mut Vec<BBox>) {
    let scores = match_template(
      level,
      &self.template,
      MatchTemplateMethod::CrossCorrelationNormalized,
    );
    let (tw, th) = self.template.dimensions();
    for (x, y, score) in scores.enumerate_pixels() {
      if score[0] >= self.threshold {
        candidates.push(BBox::new(
          (x as f64 * factor) as f32,
          (y as f64 * factor) as f32,
          (tw as f64 * factor) as f32,
          (th as f64 * factor) as f32,
        ));
      }
    }
  }
}

impl Classifier for TemplateClassifier {
  type Error = Infallible;

  fn detect(&self, image: &GrayImage, params: &ScanParams) -> Result<Vec<BBox>, Self::Error> {
    let (tw, th) = self.template.dimensions();
    let mut candidates = Vec::new();
    let mut factor = 1.0f64;

    for _ in 0..TEMPLATE_MAX_LEVELS {
      let w = (image.width() as f64 / factor).round() as u32;
      let h = (image.height() as f64 / factor).round() as u32;
      if w < tw || h < th {
        break;
      }

      let resized;
      let level = if factor == 1.0 {
        image
      } else {
        resized = image::imageops::resize(image, w, h, FilterType::Triangle);
        &resized
      };
      self.scan_level(level, factor, &mut candidates);

      if params.scale_factor <= 1.0 {
        break;
      }
      factor *= params.scale_factor;
    }

    let grouped = group_rectangles(
      &candidates,
      params.min_neighbors as usize,
      TEMPLATE_GROUP_EPS,
    );
    debug!("候选窗口 {} 个，聚类后 {} 个", candidates.len(), grouped.len());
    Ok(grouped)
  }
}
