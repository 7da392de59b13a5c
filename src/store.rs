// 该文件是 Wuding （屋顶） 项目的一部分。
// src/store.rs - 检测结果汇总
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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::geometry::Polygon;

/// 还原到原图坐标系后的一个检测结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub roof_type: String,
  pub image_id: String,
  /// 检测时图像旋转的角度（度）
  pub angle: f64,
  /// 产生该检测的检测器下标；聚类得到的检测没有单一来源
  pub detector: Option<usize>,
  pub polygon: Polygon,
}

#[derive(Debug, Default)]
struct Entry {
  detections: Vec<Detection>,
  angles: Vec<f64>,
}

type Key = (String, String);

/// 按 (屋顶类型, 图像) 累积检测结果，可在多个工作线程间共享
#[derive(Debug, Default)]
pub struct DetectionStore {
  entries: Mutex<HashMap<Key, Entry>>,
}

impl DetectionStore {
  pub fn new() -> Self {
    Self::default()
  }

  // 某个写入线程 panic 不应让其余图像的结果丢失
  fn lock(&self) -> MutexGuard<'_, HashMap<Key, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 追加某个角度下的检测结果，同一键内保持插入顺序
  pub fn add(&self, roof_type: &str, image_id: &str, angle: f64, detections: Vec<Detection>) {
    let mut entries = self.lock();
    let entry = entries
      .entry((roof_type.to_string(), image_id.to_string()))
      .or_default();
    if !entry.angles.contains(&angle) {
      entry.angles.push(angle);
    }
    entry.detections.extend(detections);
  }

  pub fn get(&self, roof_type: &str, image_id: &str) -> Vec<Detection> {
    self
      .lock()
      .get(&(roof_type.to_string(), image_id.to_string()))
      .map(|entry| entry.detections.clone())
      .unwrap_or_default()
  }

  /// 某个角度下的检测结果
  pub fn get_at(&self, roof_type: &str, image_id: &str, angle: f64) -> Vec<Detection> {
    self
      .get(roof_type, image_id)
      .into_iter()
      .filter(|d| d.angle == angle)
      .collect()
  }

  /// 写入过结果的角度，按首次写入顺序
  pub fn angles(&self, roof_type: &str, image_id: &str) -> Vec<f64> {
    self
      .lock()
      .get(&(roof_type.to_string(), image_id.to_string()))
      .map(|entry| entry.angles.clone())
      .unwrap_or_default()
  }

  /// 某幅图像在所有屋顶类型下的检测结果
  pub fn get_image(&self, image_id: &str) -> Vec<Detection> {
    let entries = self.lock();
    let mut keys: Vec<&Key> = entries.keys().filter(|(_, image)| image == image_id).collect();
    keys.sort();
    keys
      .into_iter()
      .flat_map(|key| entries[key].detections.iter().cloned())
      .collect()
  }

  pub fn image_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.lock().keys().map(|(_, image)| image.clone()).collect();
    ids.sort();
    ids.dedup();
    ids
  }

  pub fn count_by_roof_type(&self) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for ((roof_type, _), entry) in self.lock().iter() {
      *counts.entry(roof_type.clone()).or_insert(0) += entry.detections.len();
    }
    counts
  }

  pub fn len(&self) -> usize {
    self.lock().values().map(|entry| entry.detections.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
