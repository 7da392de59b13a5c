// 该文件是 Wuding （屋顶） 项目的一部分。
// src/suppression.rs - 贪心非极大值合并
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

//! Malisiewicz 贪心合并。
//!
//! 与常见的 IoU 版本不同，这里的重叠率是 `交集 / area(j)`，
//! `j` 是被比较的框自身，面积按像素计数（宽高各加 1）。
//! 候选按底边 `y2` 升序排列，每轮取最后一个，即延伸到图像最下方的框优先保留。

use std::cmp::Ordering;

use tracing::debug;

use crate::geometry::{BBox, Corners, InvalidBoxError};

/// 返回被保留框在输入中的下标，按挑选顺序排列
pub fn suppress_indices(boxes: &[BBox], overlap_threshold: f32) -> Result<Vec<usize>, InvalidBoxError> {
  if boxes.is_empty() {
    return Ok(Vec::new());
  }

  for bbox in boxes {
    bbox.validate()?;
  }

  let corners: Vec<Corners> = boxes.iter().map(BBox::corners).collect();
  let areas: Vec<f32> = corners.iter().map(Corners::inclusive_area).collect();

  let mut idxs: Vec<usize> = (0..boxes.len()).collect();
  // y2 相同时再比较 x2、y1、x1，使挑选顺序只取决于框本身，结果可以重复合并而不变
  idxs.sort_by(|&a, &b| sort_key_cmp(&corners[a], &corners[b]));

  let mut pick = Vec::new();
  while let Some(i) = idxs.pop() {
    pick.push(i);
    let picked = &corners[i];
    idxs.retain(|&j| {
      let overlap = picked.inclusive_intersection(&corners[j]) / areas[j];
      overlap <= overlap_threshold
    });
  }

  debug!("合并前 {} 个检测框，合并后 {} 个", boxes.len(), pick.len());
  Ok(pick)
}

/// 合并互相重叠的检测框，返回按挑选顺序排列的保留框
pub fn suppress(boxes: &[BBox], overlap_threshold: f32) -> Result<Vec<BBox>, InvalidBoxError> {
  Ok(
    suppress_indices(boxes, overlap_threshold)?
      .into_iter()
      .map(|i| boxes[i])
      .collect(),
  )
}

fn sort_key_cmp(a: &Corners, b: &Corners) -> Ordering {
  a.y2
    .total_cmp(&b.y2)
    .then(a.x2.total_cmp(&b.x2))
    .then(a.y1.total_cmp(&b.y1))
    .then(a.x1.total_cmp(&b.x1))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn boxes(raw: &[(f32, f32, f32, f32)]) -> Vec<BBox> {
    raw
      .iter()
      .map(|&(x, y, w, h)| BBox::new(x, y, w, h))
      .collect()
  }

  #[test]
  fn empty_input_gives_empty_output() {
    for t in [0.0, 0.3, 0.5, 1.0] {
      assert!(suppress(&[], t).unwrap().is_empty());
    }
  }

  #[test]
  fn contained_box_is_merged_into_lower_one() {
    let input = boxes(&[(0.0, 0.0, 10.0, 10.0), (1.0, 1.0, 10.0, 10.0), (50.0, 50.0, 10.0, 10.0)]);
    let output = suppress(&input, 0.5).unwrap();
    assert_eq!(
      output,
      boxes(&[(50.0, 50.0, 10.0, 10.0), (1.0, 1.0, 10.0, 10.0)])
    );
    assert_eq!(suppress_indices(&input, 0.5).unwrap(), vec![2, 1]);
  }

  #[test]
  fn overlap_is_relative_to_the_compared_box() {
    // 小框完全落在大框内：相对小框自身面积的重叠率为 1
    let big = (0.0, 0.0, 100.0, 100.0);
    let small = (10.0, 10.0, 10.0, 10.0);
    let output = suppress(&boxes(&[small, big]), 0.5).unwrap();
    assert_eq!(output, boxes(&[big]));

    // 大框的 y2 更小时先挑中小框，大框相对自身面积重叠很小，因此保留
    let big = (0.0, 0.0, 100.0, 50.0);
    let small = (10.0, 45.0, 10.0, 10.0);
    let output = suppress(&boxes(&[big, small]), 0.5).unwrap();
    assert_eq!(output, boxes(&[small, big]));
  }

  #[test]
  fn threshold_is_strictly_greater_than() {
    // 交集 100，area(j) = 121，重叠率约 0.826
    let input = boxes(&[(0.0, 0.0, 10.0, 10.0), (1.0, 1.0, 10.0, 10.0)]);
    assert_eq!(suppress(&input, 100.0 / 121.0).unwrap().len(), 2);
    assert_eq!(suppress(&input, 0.82).unwrap().len(), 1);
  }

  #[test]
  fn suppression_is_idempotent() {
    let input = boxes(&[
      (0.0, 0.0, 10.0, 10.0),
      (1.0, 1.0, 10.0, 10.0),
      (5.0, 0.0, 10.0, 11.0),
      (50.0, 50.0, 10.0, 10.0),
      (52.0, 48.0, 4.0, 12.0),
      (30.0, 0.0, 20.0, 11.0),
    ]);
    for t in [0.0, 0.1, 0.3, 0.5, 0.8, 1.0] {
      let once = suppress(&input, t).unwrap();
      let twice = suppress(&once, t).unwrap();
      assert_eq!(once, twice, "threshold {t}");
    }
  }

  #[test]
  fn larger_threshold_keeps_at_least_as_many() {
    let input = boxes(&[(0.0, 0.0, 10.0, 10.0), (1.0, 1.0, 10.0, 10.0), (50.0, 50.0, 10.0, 10.0)]);
    let counts: Vec<usize> = [0.0, 0.25, 0.5, 0.75, 0.9, 1.0]
      .iter()
      .map(|&t| suppress(&input, t).unwrap().len())
      .collect();
    assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
    assert_eq!(counts.first(), Some(&2));
    assert_eq!(counts.last(), Some(&3));
  }

  #[test]
  fn threshold_sweep_over_separate_clusters_is_monotonic() {
    // 三组互不相交的框，组内重叠率分别约为 0.826、0.545、0.273
    let input = boxes(&[
      (0.0, 0.0, 10.0, 10.0),
      (1.0, 1.0, 10.0, 10.0),
      (100.0, 100.0, 10.0, 10.0),
      (105.0, 100.0, 10.0, 10.0),
      (200.0, 200.0, 10.0, 10.0),
      (208.0, 200.0, 10.0, 10.0),
    ]);
    let thresholds = [0.0, 0.1, 0.3, 0.5, 0.6, 0.8, 0.9, 1.0];
    let counts: Vec<usize> = thresholds
      .iter()
      .map(|&t| suppress(&input, t).unwrap().len())
      .collect();
    assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
    assert_eq!(counts, vec![3, 3, 4, 4, 5, 5, 6, 6]);
  }

  #[test]
  fn equal_bottom_edges_are_ordered_by_right_edge() {
    let left = (0.0, 0.0, 10.0, 10.0);
    let right = (20.0, 0.0, 10.0, 10.0);
    assert_eq!(suppress(&boxes(&[left, right]), 0.5).unwrap(), boxes(&[right, left]));
    assert_eq!(suppress(&boxes(&[right, left]), 0.5).unwrap(), boxes(&[right, left]));

    // 互相重叠时，右边缘更靠右的框先被挑中并吞掉另一个，与输入顺序无关
    let shifted = (2.0, 0.0, 10.0, 10.0);
    assert_eq!(suppress(&boxes(&[left, shifted]), 0.5).unwrap(), boxes(&[shifted]));
    assert_eq!(suppress(&boxes(&[shifted, left]), 0.5).unwrap(), boxes(&[shifted]));
    assert_eq!(suppress_indices(&boxes(&[left, shifted]), 0.5).unwrap(), vec![1]);
    assert_eq!(suppress_indices(&boxes(&[shifted, left]), 0.5).unwrap(), vec![0]);
  }

  #[test]
  fn identical_boxes_collapse_below_full_threshold() {
    let input = boxes(&[(3.0, 3.0, 5.0, 5.0); 3]);
    assert_eq!(suppress(&input, 0.99).unwrap().len(), 1);
    assert_eq!(suppress(&input, 1.0).unwrap().len(), 3);
  }

  #[test]
  fn malformed_boxes_are_reported() {
    let input = boxes(&[(0.0, 0.0, 10.0, 10.0), (0.0, f32::NAN, 1.0, 1.0)]);
    assert!(matches!(
      suppress(&input, 0.5),
      Err(InvalidBoxError::NonFinite(_))
    ));
    let input = boxes(&[(0.0, 0.0, -10.0, 10.0)]);
    assert!(matches!(
      suppress(&input, 0.5),
      Err(InvalidBoxError::NegativeSize(_))
    ));
  }
}
