// 该文件是 Wuding （屋顶） 项目的一部分。
// src/pipeline.rs - 多角度检测编排
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{AngleSet, ConfigurationError, MergePolicy},
  geometry::{rectify_box, rotate_plane, to_bounding_box},
  grouping::group_rectangles,
  input::{ImageLoadError, PreparedImage, rotate_image},
  model::{Classifier, ScanParams},
  store::{Detection, DetectionStore},
  suppression::suppress_indices,
  task::CancelToken,
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("图像读取失败: {0}")]
  ImageLoad(#[from] ImageLoadError),
  #[error("{roof_type} 检测器 {detector} 在 {angle} 度检测失败: {source}")]
  Classifier {
    roof_type: String,
    detector: usize,
    angle: f64,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// 一个检测器实例：分类器加上是否允许在旋转图像上运行
pub struct DetectorInstance<C> {
  pub name: String,
  pub classifier: C,
  pub rotation_eligible: bool,
}

pub struct RoofTypeDetectors<C> {
  pub roof_type: String,
  /// 为真时该类型只在 0 度扫描
  pub rotation_invariant: bool,
  pub detectors: Vec<DetectorInstance<C>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
  pub angles: AngleSet,
  pub scan: ScanParams,
  pub remove_off_image: bool,
  pub merge: MergePolicy,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      angles: AngleSet::unrotated(),
      scan: ScanParams::default(),
      remove_off_image: true,
      merge: MergePolicy::None,
    }
  }
}

impl PipelineOptions {
  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.angles.is_empty() {
      return Err(ConfigurationError::EmptyAngleSet);
    }
    if !(self.scan.scale_factor.is_finite() && self.scan.scale_factor > 1.0) {
      return Err(ConfigurationError::InvalidScaleFactor(self.scan.scale_factor));
    }
    match self.merge {
      MergePolicy::Suppress { overlap } if !(0.0..=1.0).contains(&overlap) => {
        Err(ConfigurationError::InvalidOverlap(overlap))
      }
      MergePolicy::Group { eps, .. } if !(eps.is_finite() && eps >= 0.0) => {
        Err(ConfigurationError::InvalidGroupEps(eps))
      }
      _ => Ok(()),
    }
  }
}

/// 单幅图像的处理结果统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageOutcome {
  /// 写入汇总的检测数
  pub detections: usize,
  /// 实际调用分类器的次数
  pub scans: usize,
  pub invalid_boxes: usize,
  pub discarded_off_image: usize,
  /// 所有 (检测器, 角度) 组合的检测耗时之和
  pub elapsed: Duration,
  pub cancelled: bool,
}

/// 按 屋顶类型 → 检测器 → 角度 的顺序驱动检测，并把结果还原到原图坐标系
pub struct Orchestrator<C> {
  roof_types: Vec<RoofTypeDetectors<C>>,
  options: PipelineOptions,
}

/// 待写入汇总的一批检测
struct Batch {
  roof_type: String,
  angle: f64,
  detections: Vec<Detection>,
}

impl<C: Classifier> Orchestrator<C> {
  pub fn new(
    roof_types: Vec<RoofTypeDetectors<C>>,
    options: PipelineOptions,
  ) -> Result<Self, ConfigurationError> {
    if roof_types.is_empty() {
      return Err(ConfigurationError::NoRoofTypes);
    }
    if let Some(empty) = roof_types.iter().find(|r| r.detectors.is_empty()) {
      return Err(ConfigurationError::NoDetectors(empty.roof_type.clone()));
    }
    options.validate()?;
    Ok(Self {
      roof_types,
      options,
    })
  }

  pub fn options(&self) -> &PipelineOptions {
    &self.options
  }

  pub fn roof_types(&self) -> impl Iterator<Item = &str> {
    self.roof_types.iter().map(|r| r.roof_type.as_str())
  }

  /// 非零角度只对允许旋转的检测器、且非旋转不变的屋顶类型扫描
  pub fn should_scan(
    roof_type: &RoofTypeDetectors<C>,
    detector: &DetectorInstance<C>,
    angle: f64,
  ) -> bool {
    angle <= 0.0 || (detector.rotation_eligible && !roof_type.rotation_invariant)
  }

  /// 处理一幅图像，成功（或被取消）时把结果写入 `store`。
  ///
  /// 分类器失败时该图像的结果全部丢弃，不会写入一半。
  pub fn detect_image(
    &self,
    image_id: &str,
    image: &PreparedImage,
    store: &DetectionStore,
    cancel: &CancelToken,
  ) -> Result<ImageOutcome, DetectError> {
    info!("开始检测图像 {}", image_id);
    let mut outcome = ImageOutcome::default();
    let mut staged = Vec::new();

    for roof_type in self.roof_types.iter() {
      let batches = self.scan_roof_type(roof_type, image_id, image, cancel, &mut outcome)?;
      match self.options.merge {
        MergePolicy::None => staged.extend(batches),
        policy => staged.extend(self.merge(roof_type, image_id, batches, policy)),
      }
      if outcome.cancelled {
        warn!("图像 {} 的检测被取消", image_id);
        break;
      }
    }

    for batch in staged {
      outcome.detections += batch.detections.len();
      store.add(&batch.roof_type, image_id, batch.angle, batch.detections);
    }

    info!(
      "图像 {} 检测完成: {} 个检测，{} 次扫描，耗时 {:.2?}",
      image_id, outcome.detections, outcome.scans, outcome.elapsed
    );
    Ok(outcome)
  }

  fn scan_roof_type(
    &self,
    roof_type: &RoofTypeDetectors<C>,
    image_id: &str,
    image: &PreparedImage,
    cancel: &CancelToken,
    outcome: &mut ImageOutcome,
  ) -> Result<Vec<Batch>, DetectError> {
    let mut batches = Vec::new();
    for (index, detector) in roof_type.detectors.iter().enumerate() {
      for angle in self.options.angles.iter() {
        if !Self::should_scan(roof_type, detector, angle) {
          debug!(
            "跳过 {} 检测器 {} 的 {} 度扫描",
            roof_type.roof_type, index, angle
          );
          continue;
        }
        if cancel.is_cancelled() {
          outcome.cancelled = true;
          return Ok(batches);
        }

        let now = Instant::now();
        let detections = self.scan(roof_type, index, detector, angle, image_id, image, outcome)?;
        let elapsed = now.elapsed();
        outcome.elapsed += elapsed;
        outcome.scans += 1;
        info!(
          "{} 检测器 {} 角度 {}: 保留 {} 个，耗时 {:.2?}",
          roof_type.roof_type,
          index,
          angle,
          detections.len(),
          elapsed
        );

        batches.push(Batch {
          roof_type: roof_type.roof_type.clone(),
          angle,
          detections,
        });
      }
    }
    Ok(batches)
  }

  #[allow(clippy::too_many_arguments)]
  fn scan(
    &self,
    roof_type: &RoofTypeDetectors<C>,
    index: usize,
    detector: &DetectorInstance<C>,
    angle: f64,
    image_id: &str,
    image: &PreparedImage,
    outcome: &mut ImageOutcome,
  ) -> Result<Vec<Detection>, DetectError> {
    let transform = rotate_plane(image.dims(), angle);
    let rotated;
    let scanned = if transform.is_identity() {
      &image.gray
    } else {
      rotated = rotate_image(&image.gray, &transform);
      &rotated
    };

    let raw = detector
      .classifier
      .detect(scanned, &self.options.scan)
      .map_err(|e| DetectError::Classifier {
        roof_type: roof_type.roof_type.clone(),
        detector: index,
        angle,
        source: Box::new(e),
      })?;
    debug!("{} 检测器 {} 角度 {}: 原始 {} 个", roof_type.roof_type, index, angle, raw.len());

    let mut detections = Vec::with_capacity(raw.len());
    for bbox in raw.iter() {
      let polygon = match rectify_box(bbox, &transform, self.options.remove_off_image) {
        Ok(Some(polygon)) => polygon,
        Ok(None) => {
          debug!("丢弃落在原图之外的检测: {:?}", bbox);
          outcome.discarded_off_image += 1;
          continue;
        }
        Err(e) => {
          warn!("图像 {} 中的检测框无效，已丢弃: {}", image_id, e);
          outcome.invalid_boxes += 1;
          continue;
        }
      };
      let polygon = if image.restore_factor != 1.0 {
        polygon.scaled(image.restore_factor)
      } else {
        polygon
      };
      detections.push(Detection {
        roof_type: roof_type.roof_type.clone(),
        image_id: image_id.to_string(),
        angle,
        detector: Some(index),
        polygon,
      });
    }
    Ok(detections)
  }

  fn merge(
    &self,
    roof_type: &RoofTypeDetectors<C>,
    image_id: &str,
    batches: Vec<Batch>,
    policy: MergePolicy,
  ) -> Vec<Batch> {
    let collected: Vec<Detection> = batches.into_iter().flat_map(|b| b.detections).collect();
    let before = collected.len();
    let boxes: Vec<_> = collected.iter().map(|d| to_bounding_box(&d.polygon)).collect();

    let merged: Vec<Detection> = match policy {
      MergePolicy::None => collected,
      MergePolicy::Suppress { overlap } => match suppress_indices(&boxes, overlap) {
        Ok(picked) => picked.into_iter().map(|i| collected[i].clone()).collect(),
        Err(e) => {
          warn!("图像 {} 的合并失败，保留全部检测: {}", image_id, e);
          collected
        }
      },
      MergePolicy::Group { threshold, eps } => group_rectangles(&boxes, threshold, eps)
        .into_iter()
        .map(|bbox| Detection {
          roof_type: roof_type.roof_type.clone(),
          image_id: image_id.to_string(),
          angle: 0.0,
          detector: None,
          polygon: bbox.to_polygon(),
        })
        .collect(),
    };

    info!(
      "{} 在图像 {} 上合并: {} -> {}",
      roof_type.roof_type,
      image_id,
      before,
      merged.len()
    );

    // 每个检测按自身角度写入，顺序保持合并输出的顺序
    merged
      .into_iter()
      .map(|d| Batch {
        roof_type: roof_type.roof_type.clone(),
        angle: d.angle,
        detections: vec![d],
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BBox;
  use image::GrayImage;
  use std::convert::Infallible;

  struct Fixed(Vec<BBox>);

  impl Classifier for Fixed {
    type Error = Infallible;

    fn detect(&self, _image: &GrayImage, _params: &ScanParams) -> Result<Vec<BBox>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  fn prepared(width: u32, height: u32, downsized: bool) -> PreparedImage {
    PreparedImage::from_gray(GrayImage::new(width, height), downsized)
  }

  fn single(boxes: Vec<BBox>, options: PipelineOptions) -> Orchestrator<Fixed> {
    Orchestrator::new(
      vec![RoofTypeDetectors {
        roof_type: "metal".to_string(),
        rotation_invariant: false,
        detectors: vec![DetectorInstance {
          name: "fixed".to_string(),
          classifier: Fixed(boxes),
          rotation_eligible: true,
        }],
      }],
      options,
    )
    .unwrap()
  }

  #[test]
  fn downsized_detections_are_restored_to_full_resolution() {
    let orchestrator = single(vec![BBox::new(5.0, 6.0, 10.0, 4.0)], PipelineOptions::default());
    let store = DetectionStore::new();
    let outcome = orchestrator
      .detect_image("a.jpg", &prepared(100, 80, true), &store, &CancelToken::new())
      .unwrap();
    assert_eq!(outcome.detections, 1);
    let stored = store.get("metal", "a.jpg");
    assert_eq!(to_bounding_box(&stored[0].polygon), BBox::new(10.0, 12.0, 20.0, 8.0));
  }

  #[test]
  fn invalid_boxes_are_dropped_and_counted() {
    let orchestrator = single(
      vec![BBox::new(f32::NAN, 0.0, 1.0, 1.0), BBox::new(1.0, 1.0, 2.0, 2.0)],
      PipelineOptions::default(),
    );
    let store = DetectionStore::new();
    let outcome = orchestrator
      .detect_image("a.jpg", &prepared(20, 20, false), &store, &CancelToken::new())
      .unwrap();
    assert_eq!(outcome.invalid_boxes, 1);
    assert_eq!(store.get("metal", "a.jpg").len(), 1);
  }

  #[test]
  fn empty_roof_type_is_a_configuration_error() {
    let result = Orchestrator::<Fixed>::new(
      vec![RoofTypeDetectors {
        roof_type: "thatch".to_string(),
        rotation_invariant: true,
        detectors: Vec::new(),
      }],
      PipelineOptions::default(),
    );
    assert!(matches!(result, Err(ConfigurationError::NoDetectors(_))));
  }

  #[test]
  fn suppression_keeps_original_tags() {
    let options = PipelineOptions {
      merge: MergePolicy::Suppress { overlap: 0.5 },
      ..PipelineOptions::default()
    };
    let orchestrator = single(
      vec![
        BBox::new(0.0, 0.0, 10.0, 10.0),
        BBox::new(1.0, 1.0, 10.0, 10.0),
        BBox::new(50.0, 50.0, 10.0, 10.0),
      ],
      options,
    );
    let store = DetectionStore::new();
    orchestrator
      .detect_image("a.jpg", &prepared(100, 100, false), &store, &CancelToken::new())
      .unwrap();
    let stored = store.get("metal", "a.jpg");
    let boxes: Vec<BBox> = stored.iter().map(|d| to_bounding_box(&d.polygon)).collect();
    assert_eq!(
      boxes,
      vec![BBox::new(50.0, 50.0, 10.0, 10.0), BBox::new(1.0, 1.0, 10.0, 10.0)]
    );
    assert!(stored.iter().all(|d| d.detector == Some(0) && d.angle == 0.0));
  }
}
