// 该文件是 Wuding （屋顶） 项目的一部分。
// src/grouping.rs - 轴对齐检测框聚类
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

use tracing::debug;

use crate::geometry::BBox;

/// 聚类后的检测框，`weight` 为类内成员数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedBox {
  pub bbox: BBox,
  pub weight: usize,
}

/// 四条边的偏差都不超过 `eps * (较小宽 + 较小高) / 2` 时视为相似
fn similar(a: &BBox, b: &BBox, eps: f32) -> bool {
  let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) * 0.5;
  (a.x - b.x).abs() <= delta
    && (a.y - b.y).abs() <= delta
    && (a.x + a.width - b.x - b.width).abs() <= delta
    && (a.y + a.height - b.y - b.height).abs() <= delta
}

struct DisjointSet {
  parent: Vec<usize>,
}

impl DisjointSet {
  fn new(n: usize) -> Self {
    Self {
      parent: (0..n).collect(),
    }
  }

  fn find(&mut self, mut i: usize) -> usize {
    while self.parent[i] != i {
      self.parent[i] = self.parent[self.parent[i]];
      i = self.parent[i];
    }
    i
  }

  fn union(&mut self, a: usize, b: usize) {
    let (ra, rb) = (self.find(a), self.find(b));
    if ra != rb {
      self.parent[ra] = rb;
    }
  }
}

/// 按相似关系的传递闭包划分等价类，类号按首次出现顺序编号
fn partition(rects: &[BBox], eps: f32) -> (Vec<usize>, usize) {
  let mut set = DisjointSet::new(rects.len());
  for i in 0..rects.len() {
    for j in 0..i {
      if similar(&rects[i], &rects[j], eps) {
        set.union(i, j);
      }
    }
  }

  let mut class_of_root = vec![usize::MAX; rects.len()];
  let mut labels = Vec::with_capacity(rects.len());
  let mut classes = 0;
  for i in 0..rects.len() {
    let root = set.find(i);
    if class_of_root[root] == usize::MAX {
      class_of_root[root] = classes;
      classes += 1;
    }
    labels.push(class_of_root[root]);
  }
  (labels, classes)
}

/// 与 [`group_rectangles`] 相同，同时返回每个聚类的成员数
pub fn group_rectangles_weighted(rects: &[BBox], group_threshold: usize, eps: f32) -> Vec<WeightedBox> {
  if group_threshold == 0 || rects.is_empty() {
    return rects
      .iter()
      .map(|&bbox| WeightedBox { bbox, weight: 1 })
      .collect();
  }

  let (labels, classes) = partition(rects, eps);

  let mut sums = vec![[0.0f32; 4]; classes];
  let mut weights = vec![0usize; classes];
  for (rect, &label) in rects.iter().zip(labels.iter()) {
    let sum = &mut sums[label];
    sum[0] += rect.x;
    sum[1] += rect.y;
    sum[2] += rect.width;
    sum[3] += rect.height;
    weights[label] += 1;
  }

  let averaged: Vec<BBox> = sums
    .iter()
    .zip(weights.iter())
    .map(|(sum, &n)| {
      let s = 1.0 / n as f32;
      BBox::new(
        (sum[0] * s).round(),
        (sum[1] * s).round(),
        (sum[2] * s).round(),
        (sum[3] * s).round(),
      )
    })
    .collect();

  let mut grouped = Vec::new();
  for (i, r1) in averaged.iter().enumerate() {
    let n1 = weights[i];
    if n1 <= group_threshold {
      continue;
    }

    // 较小的聚类落在成员更多的聚类内部时被吸收
    let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
      let n2 = weights[j];
      if j == i || n2 <= group_threshold {
        return false;
      }
      let dx = (r2.width * eps).round();
      let dy = (r2.height * eps).round();
      r1.x >= r2.x - dx
        && r1.y >= r2.y - dy
        && r1.x + r1.width <= r2.x + r2.width + dx
        && r1.y + r1.height <= r2.y + r2.height + dy
        && (n2 > n1.max(3) || n1 < 3)
    });

    if !swallowed {
      grouped.push(WeightedBox {
        bbox: *r1,
        weight: n1,
      });
    }
  }

  debug!(
    "聚类前 {} 个检测框，{} 个等价类，保留 {} 个",
    rects.len(),
    classes,
    grouped.len()
  );
  grouped
}

/// 把近似重合的矩形合并为一个平均矩形。
///
/// 成员数不超过 `group_threshold` 的聚类被丢弃；`group_threshold` 为 0 时原样返回。
pub fn group_rectangles(rects: &[BBox], group_threshold: usize, eps: f32) -> Vec<BBox> {
  group_rectangles_weighted(rects, group_threshold, eps)
    .into_iter()
    .map(|w| w.bbox)
    .collect()
}
