// 该文件是 Wuding （屋顶） 项目的一部分。
// src/config.rs - 检测配置
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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  model::{Classifier, ScanParams},
  pipeline::{DetectorInstance, Orchestrator, PipelineOptions, RoofTypeDetectors},
};

/// 开启旋转且未显式给出角度时的步长（度）
pub const DEFAULT_ANGLE_STEP: f64 = 15.0;
/// 矩形屋顶旋转半圈后与自身重合
pub const DEFAULT_ANGLE_SPAN: f64 = 180.0;

#[derive(Error, Debug)]
pub enum ConfigurationError {
  #[error("无法读取配置文件 {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("没有配置任何屋顶类型")]
  NoRoofTypes,
  #[error("屋顶类型重复: {0}")]
  DuplicateRoofType(String),
  #[error("屋顶类型 {0} 没有检测器")]
  NoDetectors(String),
  #[error("重叠阈值必须在 [0, 1] 之间: {0}")]
  InvalidOverlap(f32),
  #[error("聚类容差必须为非负有限值: {0}")]
  InvalidGroupEps(f32),
  #[error("金字塔缩放比例必须大于 1: {0}")]
  InvalidScaleFactor(f64),
  #[error("角度集合为空")]
  EmptyAngleSet,
  #[error("角度必须为非负有限值: {0}")]
  InvalidAngle(f64),
  #[error("工作线程数必须大于 0")]
  InvalidWorkers,
  #[error("无法加载模型 {model}: {source}")]
  ModelLoad {
    model: String,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// 有序的扫描角度集合（度），不开启旋转时退化为 `{0}`
#[derive(Debug, Clone, PartialEq)]
pub struct AngleSet(Vec<f64>);

impl AngleSet {
  pub fn new(angles: Vec<f64>) -> Result<Self, ConfigurationError> {
    if angles.is_empty() {
      return Err(ConfigurationError::EmptyAngleSet);
    }
    let mut unique: Vec<f64> = Vec::with_capacity(angles.len());
    for angle in angles {
      if !angle.is_finite() || angle < 0.0 {
        return Err(ConfigurationError::InvalidAngle(angle));
      }
      if !unique.contains(&angle) {
        unique.push(angle);
      }
    }
    Ok(Self(unique))
  }

  pub fn unrotated() -> Self {
    Self(vec![0.0])
  }

  /// `0, step, 2*step, ...`，不含 `span`
  pub fn full(step: f64, span: f64) -> Self {
    let count = (span / step).ceil() as usize;
    Self((0..count).map(|i| i as f64 * step).collect())
  }

  pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
    self.0.iter().copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// 多角度、多检测器结果的合并策略，每次运行只选其一
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MergePolicy {
  /// 按角度原样保存
  #[default]
  None,
  /// 还原坐标后做贪心非极大值合并
  Suppress { overlap: f32 },
  /// 对还原后检测的外接框做计数聚类
  Group {
    #[serde(default = "default_group_threshold")]
    threshold: usize,
    #[serde(default = "default_group_eps")]
    eps: f32,
  },
}

fn default_group_threshold() -> usize {
  1
}

fn default_group_eps() -> f32 {
  0.2
}

fn default_true() -> bool {
  true
}

fn default_scale_factor() -> f64 {
  1.08
}

fn default_min_neighbors() -> u32 {
  3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
  /// 模型地址，例如 `template:///models/metal_rect.png?threshold=0.7`
  pub model: Url,
  /// 是否允许在旋转后的图像上运行
  #[serde(default = "default_true")]
  pub rotation_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoofTypeConfig {
  pub name: String,
  /// 为真时只在 0 度扫描
  #[serde(default)]
  pub rotation_invariant: bool,
  pub detectors: Vec<DetectorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
  pub roof_types: Vec<RoofTypeConfig>,
  #[serde(default = "default_true")]
  pub rotate: bool,
  /// 显式角度列表，优先于 `rotate`
  #[serde(default)]
  pub angles: Option<Vec<f64>>,
  #[serde(default = "default_scale_factor")]
  pub scale_factor: f64,
  #[serde(default = "default_min_neighbors")]
  pub min_neighbors: u32,
  #[serde(default)]
  pub downsized: bool,
  #[serde(default = "default_true")]
  pub remove_off_image: bool,
  #[serde(default)]
  pub merge: MergePolicy,
  #[serde(default)]
  pub workers: Option<usize>,
}

impl RunConfig {
  pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
    Ok(serde_json::from_str(text)?)
  }

  pub fn angle_set(&self) -> Result<AngleSet, ConfigurationError> {
    match &self.angles {
      Some(angles) => AngleSet::new(angles.clone()),
      None if self.rotate => Ok(AngleSet::full(DEFAULT_ANGLE_STEP, DEFAULT_ANGLE_SPAN)),
      None => Ok(AngleSet::unrotated()),
    }
  }

  pub fn scan_params(&self) -> ScanParams {
    ScanParams {
      scale_factor: self.scale_factor,
      min_neighbors: self.min_neighbors,
    }
  }

  pub fn pipeline_options(&self) -> Result<PipelineOptions, ConfigurationError> {
    let options = PipelineOptions {
      angles: self.angle_set()?,
      scan: self.scan_params(),
      remove_off_image: self.remove_off_image,
      merge: self.merge,
    };
    options.validate()?;
    Ok(options)
  }

  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.roof_types.is_empty() {
      return Err(ConfigurationError::NoRoofTypes);
    }
    for (i, roof_type) in self.roof_types.iter().enumerate() {
      if roof_type.detectors.is_empty() {
        return Err(ConfigurationError::NoDetectors(roof_type.name.clone()));
      }
      if self.roof_types[..i].iter().any(|r| r.name == roof_type.name) {
        return Err(ConfigurationError::DuplicateRoofType(roof_type.name.clone()));
      }
    }
    if self.workers == Some(0) {
      return Err(ConfigurationError::InvalidWorkers);
    }
    self.pipeline_options().map(|_| ())
  }

  /// 用 `load` 加载每个检测器的模型并构建编排器。
  ///
  /// 任何一个模型加载失败都会中止，此时尚未处理任何图像。
  pub fn build_orchestrator<C, E, F>(&self, mut load: F) -> Result<Orchestrator<C>, ConfigurationError>
  where
    C: Classifier,
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(&Url) -> Result<C, E>,
  {
    self.validate()?;

    let mut roof_types = Vec::with_capacity(self.roof_types.len());
    for roof_type in self.roof_types.iter() {
      let mut detectors = Vec::with_capacity(roof_type.detectors.len());
      for detector in roof_type.detectors.iter() {
        info!("加载 {} 检测器: {}", roof_type.name, detector.model);
        let classifier = load(&detector.model).map_err(|e| ConfigurationError::ModelLoad {
          model: detector.model.to_string(),
          source: Box::new(e),
        })?;
        detectors.push(DetectorInstance {
          name: detector.model.to_string(),
          classifier,
          rotation_eligible: detector.rotation_eligible,
        });
      }
      roof_types.push(RoofTypeDetectors {
        roof_type: roof_type.name.clone(),
        rotation_invariant: roof_type.rotation_invariant,
        detectors,
      });
    }

    Orchestrator::new(roof_types, self.pipeline_options()?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "roof_types": [
      {
        "name": "metal",
        "detectors": [
          { "model": "template:///models/metal_square.png", "rotation_eligible": false },
          { "model": "template:///models/metal_rect.png?threshold=0.7" }
        ]
      },
      {
        "name": "thatch",
        "rotation_invariant": true,
        "detectors": [{ "model": "template:///models/thatch.png" }]
      }
    ],
    "merge": { "policy": "suppress", "overlap": 0.3 }
  }"#;

  #[test]
  fn parses_with_defaults() {
    let config = RunConfig::from_json(SAMPLE).unwrap();
    config.validate().unwrap();
    assert_eq!(config.roof_types.len(), 2);
    assert!(!config.roof_types[0].detectors[0].rotation_eligible);
    assert!(config.roof_types[0].detectors[1].rotation_eligible);
    assert!(config.roof_types[1].rotation_invariant);
    assert_eq!(config.merge, MergePolicy::Suppress { overlap: 0.3 });
    assert_eq!(config.scale_factor, 1.08);
    assert_eq!(config.min_neighbors, 3);
    assert!(config.remove_off_image);
    assert!(!config.downsized);

    let angles: Vec<f64> = config.angle_set().unwrap().iter().collect();
    assert_eq!(angles.len(), 12);
    assert_eq!(angles[0], 0.0);
    assert_eq!(angles[11], 165.0);
  }

  #[test]
  fn group_policy_fills_defaults() {
    let policy: MergePolicy = serde_json::from_str(r#"{ "policy": "group" }"#).unwrap();
    assert_eq!(
      policy,
      MergePolicy::Group {
        threshold: 1,
        eps: 0.2
      }
    );
    let policy: MergePolicy = serde_json::from_str(r#"{ "policy": "none" }"#).unwrap();
    assert_eq!(policy, MergePolicy::None);
  }

  #[test]
  fn rotation_off_means_single_zero_angle() {
    let mut config = RunConfig::from_json(SAMPLE).unwrap();
    config.rotate = false;
    assert_eq!(config.angle_set().unwrap(), AngleSet::unrotated());

    config.angles = Some(vec![0.0, 30.0, 30.0, 60.0]);
    let angles: Vec<f64> = config.angle_set().unwrap().iter().collect();
    assert_eq!(angles, vec![0.0, 30.0, 60.0]);
  }

  #[test]
  fn invalid_settings_are_rejected() {
    let base = RunConfig::from_json(SAMPLE).unwrap();

    let mut config = base.clone();
    config.merge = MergePolicy::Suppress { overlap: 1.5 };
    assert!(matches!(config.validate(), Err(ConfigurationError::InvalidOverlap(_))));

    let mut config = base.clone();
    config.scale_factor = 1.0;
    assert!(matches!(config.validate(), Err(ConfigurationError::InvalidScaleFactor(_))));

    let mut config = base.clone();
    config.angles = Some(Vec::new());
    assert!(matches!(config.validate(), Err(ConfigurationError::EmptyAngleSet)));

    let mut config = base.clone();
    config.angles = Some(vec![-15.0]);
    assert!(matches!(config.validate(), Err(ConfigurationError::InvalidAngle(_))));

    let mut config = base.clone();
    config.roof_types[1].detectors.clear();
    assert!(matches!(config.validate(), Err(ConfigurationError::NoDetectors(name)) if name == "thatch"));

    let mut config = base.clone();
    config.roof_types[1].name = "metal".to_string();
    assert!(matches!(config.validate(), Err(ConfigurationError::DuplicateRoofType(_))));

    let mut config = base;
    config.roof_types.clear();
    assert!(matches!(config.validate(), Err(ConfigurationError::NoRoofTypes)));
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let result = RunConfig::from_json(r#"{ "roof_types": [], "overlapThresh": 0.3 }"#);
    assert!(matches!(result, Err(ConfigurationError::Parse(_))));
  }

  #[test]
  fn missing_config_file_is_a_read_error() {
    let result = RunConfig::from_path(Path::new("/definitely/not/here.json"));
    assert!(matches!(result, Err(ConfigurationError::Read { .. })));
  }
}
