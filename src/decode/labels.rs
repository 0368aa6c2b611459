// 该文件是 Tianmu （天目） 项目的一部分。
// src/decode/labels.rs - 类别标签
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

use std::path::Path;

use crate::decode::DecodeError;

pub const UNKNOWN_LABEL: &str = "unknown";

const COCO_LABELS: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 按行号索引的标签列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelList {
  labels: Vec<String>,
}

impl LabelList {
  /// 解析以换行分隔的标签文本，去除行尾 `\r`，忽略末尾空行
  pub fn parse(text: &str) -> Self {
    let mut labels = text
      .split('\n')
      .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
      .collect::<Vec<_>>();
    if labels.last().is_some_and(|l| l.is_empty()) {
      labels.pop();
    }
    Self { labels }
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
    Ok(Self::parse(&std::fs::read_to_string(path)?))
  }

  pub fn coco() -> Self {
    Self {
      labels: COCO_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

impl Default for LabelList {
  fn default() -> Self {
    Self::coco()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_strips_carriage_returns() {
    let labels = LabelList::parse("person\r\nbicycle\r\ncar\r\n");
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.get(1), Some("bicycle"));
    assert_eq!(labels.get(3), None);
  }

  #[test]
  fn interior_empty_lines_keep_indices() {
    let labels = LabelList::parse("a\n\nc");
    assert_eq!(labels.get(1), Some(""));
    assert_eq!(labels.get(2), Some("c"));
  }

  #[test]
  fn coco_has_eighty_classes() {
    let labels = LabelList::coco();
    assert_eq!(labels.len(), 80);
    assert_eq!(labels.get(0), Some("person"));
    assert_eq!(labels.get(79), Some("toothbrush"));
  }
}
