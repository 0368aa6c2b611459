// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/postprocess.rs - 检测后处理：阈值、坐标变换与非极大值抑制
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

use crate::tensor::{CodecError, Tensor};

/// 行向量 `[cx, cy, w, h]` 右乘该矩阵得到 `[x1, y1, x2, y2]`
pub const CENTERS_TO_CORNERS: [[f32; 4]; 4] = [
  [1.0, 0.0, 1.0, 0.0],
  [0.0, 1.0, 0.0, 1.0],
  [-0.5, 0.0, 0.5, 0.0],
  [0.0, -0.5, 0.0, 0.5],
];

const BOX_COORDS: usize = 4;

/// 融合后处理的三路输出
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTensors {
  /// `[N, 4]` 中心格式坐标
  pub coords: Tensor<f32>,
  /// `[N]` 类别索引
  pub class_ids: Tensor<u32>,
  /// `[N]` 分数
  pub scores: Tensor<f32>,
}

/// 原始检测输出的排布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawLayout {
  /// `[1, 4+C, N]`，YOLOv8 导出的默认排布
  #[default]
  FeaturesFirst,
  /// `[1, N, 4+C]`
  AnchorsFirst,
}

/// 与检测网络组合的后处理图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionGraph {
  pub score_threshold: f32,
  pub iou_threshold: f32,
  pub max_output_boxes: usize,
  pub layout: RawLayout,
}

impl Default for DetectionGraph {
  fn default() -> Self {
    Self {
      score_threshold: 0.5,
      iou_threshold: 0.5,
      max_output_boxes: 64,
      layout: RawLayout::FeaturesFirst,
    }
  }
}

struct Candidate {
  center: [f32; 4],
  corners: [f32; 4],
  class_id: u32,
  score: f32,
}

impl DetectionGraph {
  /// 按 `layout` 处理原始输出 `[1, 4+C, N]` 或 `[1, N, 4+C]`
  pub fn run(&self, raw: &Tensor<f32>) -> Result<DetectionTensors, CodecError> {
    let data = raw.host_data()?;
    let (features, anchors) = match (raw.shape(), self.layout) {
      ([1, f, n], RawLayout::FeaturesFirst) if *f > BOX_COORDS => (*f, *n),
      ([1, n, f], RawLayout::AnchorsFirst) if *f > BOX_COORDS => (*f, *n),
      (other, layout) => {
        return Err(CodecError::OutputShape {
          expected: match layout {
            RawLayout::FeaturesFirst => "[1, 4+C, N]",
            RawLayout::AnchorsFirst => "[1, N, 4+C]",
          },
          actual: other.to_vec(),
        });
      }
    };

    let at = |anchor: usize, feature: usize| match self.layout {
      RawLayout::FeaturesFirst => data[feature * anchors + anchor],
      RawLayout::AnchorsFirst => data[anchor * features + feature],
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
      let mut score = f32::MIN;
      let mut class_id = 0u32;
      for c in BOX_COORDS..features {
        let s = at(anchor, c);
        if s > score {
          score = s;
          class_id = (c - BOX_COORDS) as u32;
        }
      }

      if score <= self.score_threshold {
        continue;
      }

      let center = [at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3)];
      candidates.push(Candidate {
        center,
        corners: centers_to_corners(&center),
        class_id,
        score,
      });
    }

    let corners = candidates.iter().map(|c| c.corners).collect::<Vec<_>>();
    let scores = candidates.iter().map(|c| c.score).collect::<Vec<_>>();
    let keep = nms(&corners, &scores, self.iou_threshold, self.max_output_boxes);
    debug!(
      "检测后处理: {} 个锚点, {} 个候选, 保留 {} 个",
      anchors,
      candidates.len(),
      keep.len()
    );

    let n = keep.len();
    let mut coords = Vec::with_capacity(n * BOX_COORDS);
    let mut class_ids = Vec::with_capacity(n);
    let mut kept_scores = Vec::with_capacity(n);
    for &i in &keep {
      let c = &candidates[i];
      coords.extend_from_slice(&c.center);
      class_ids.push(c.class_id);
      kept_scores.push(c.score);
    }

    Ok(DetectionTensors {
      coords: Tensor::from_shape_vec(&[n, BOX_COORDS], coords)?,
      class_ids: Tensor::from_shape_vec(&[n], class_ids)?,
      scores: Tensor::from_shape_vec(&[n], kept_scores)?,
    })
  }
}

fn centers_to_corners(center: &[f32; 4]) -> [f32; 4] {
  let mut out = [0f32; 4];
  for (k, slot) in out.iter_mut().enumerate() {
    *slot = (0..4).map(|r| center[r] * CENTERS_TO_CORNERS[r][k]).sum();
  }
  out
}

/// 角点格式 `[x1, y1, x2, y2]` 的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
  let union = area(a) + area(b) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 类别无关的贪心非极大值抑制，返回按分数降序保留的索引
pub fn nms(corners: &[[f32; 4]], scores: &[f32], iou_threshold: f32, max_output: usize) -> Vec<usize> {
  let mut order = (0..corners.len()).collect::<Vec<_>>();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut keep: Vec<usize> = Vec::new();
  for i in order {
    if keep.len() >= max_output {
      break;
    }
    if keep
      .iter()
      .all(|&k| iou(&corners[k], &corners[i]) <= iou_threshold)
    {
      keep.push(i);
    }
  }
  keep
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 按 `[1, 4+C, N]` 排布构造原始输出
  fn raw(anchors: &[([f32; 4], Vec<f32>)]) -> Tensor<f32> {
    let n = anchors.len();
    let classes = anchors[0].1.len();
    let features = 4 + classes;
    let mut data = vec![0f32; features * n];
    for (a, (center, scores)) in anchors.iter().enumerate() {
      for k in 0..4 {
        data[k * n + a] = center[k];
      }
      for (c, s) in scores.iter().enumerate() {
        data[(4 + c) * n + a] = *s;
      }
    }
    Tensor::from_shape_vec(&[1, features, n], data).unwrap()
  }

  #[test]
  fn centers_become_corners() {
    assert_eq!(
      centers_to_corners(&[100.0, 50.0, 20.0, 10.0]),
      [90.0, 45.0, 110.0, 55.0]
    );
  }

  #[test]
  fn overlapping_boxes_are_suppressed() {
    let graph = DetectionGraph::default();
    let out = graph
      .run(&raw(&[
        ([100.0, 100.0, 50.0, 50.0], vec![0.9, 0.1]),
        ([102.0, 101.0, 50.0, 50.0], vec![0.2, 0.8]),
        ([400.0, 400.0, 40.0, 40.0], vec![0.6, 0.0]),
      ]))
      .unwrap();
    assert_eq!(out.scores.host_data().unwrap(), &[0.9, 0.6]);
    assert_eq!(out.class_ids.host_data().unwrap(), &[0, 0]);
    assert_eq!(
      out.coords.host_data().unwrap(),
      &[100.0, 100.0, 50.0, 50.0, 400.0, 400.0, 40.0, 40.0]
    );
  }

  #[test]
  fn score_threshold_is_strict() {
    let graph = DetectionGraph::default();
    let out = graph
      .run(&raw(&[
        ([10.0, 10.0, 4.0, 4.0], vec![0.5, 0.3]),
        ([50.0, 50.0, 4.0, 4.0], vec![0.2, 0.51]),
      ]))
      .unwrap();
    assert_eq!(out.scores.shape(), &[1]);
    assert_eq!(out.class_ids.host_data().unwrap(), &[1]);
  }

  #[test]
  fn output_is_capped() {
    let graph = DetectionGraph {
      max_output_boxes: 2,
      ..Default::default()
    };
    let anchors = (0..5)
      .map(|i| ([i as f32 * 100.0, 0.0, 10.0, 10.0], vec![0.9f32]))
      .collect::<Vec<_>>();
    let out = graph.run(&raw(&anchors)).unwrap();
    assert_eq!(out.coords.shape(), &[2, 4]);
  }

  #[test]
  fn few_anchors_keep_features_first() {
    // [1, 84, 50]，锚点数少于特征数
    let mut scores = vec![0f32; 80];
    scores[5] = 0.9;
    let mut anchors = vec![([0.0, 0.0, 1.0, 1.0], vec![0f32; 80]); 50];
    anchors[0] = ([320.0, 320.0, 64.0, 32.0], scores);
    let out = DetectionGraph::default().run(&raw(&anchors)).unwrap();
    assert_eq!(out.class_ids.host_data().unwrap(), &[5]);
    assert_eq!(
      out.coords.host_data().unwrap(),
      &[320.0, 320.0, 64.0, 32.0]
    );
  }

  #[test]
  fn anchors_first_layout() {
    let graph = DetectionGraph {
      layout: RawLayout::AnchorsFirst,
      ..Default::default()
    };
    // [1, N=6, 4+C=5]
    let mut data = vec![0f32; 6 * 5];
    data[3 * 5..4 * 5].copy_from_slice(&[8.0, 9.0, 2.0, 2.0, 0.7]);
    let t = Tensor::from_shape_vec(&[1, 6, 5], data).unwrap();
    let out = graph.run(&t).unwrap();
    assert_eq!(out.coords.host_data().unwrap(), &[8.0, 9.0, 2.0, 2.0]);
  }

  #[test]
  fn iou_of_disjoint_and_identical() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn rejects_bad_shape() {
    let t = Tensor::from_shape_vec(&[2, 3], vec![0f32; 6]).unwrap();
    assert!(matches!(
      DetectionGraph::default().run(&t),
      Err(CodecError::OutputShape { .. })
    ));
    // 特征维只有坐标没有类别
    let t = Tensor::from_shape_vec(&[1, 4, 10], vec![0f32; 40]).unwrap();
    assert!(matches!(
      DetectionGraph::default().run(&t),
      Err(CodecError::OutputShape { .. })
    ));
  }
}
