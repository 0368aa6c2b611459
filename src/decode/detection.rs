// 该文件是 Tianmu （天目） 项目的一部分。
// src/decode/detection.rs - 检测框解码到显示空间
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

use serde::Serialize;
use tracing::warn;

use crate::{
  decode::{DecodeError, LabelList, UNKNOWN_LABEL},
  tensor::ModelBox,
};

const DEFAULT_MAX_BOXES: usize = 200;

/// 显示区域尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySize {
  pub width: f32,
  pub height: f32,
}

impl DisplaySize {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

/// 显示空间中的检测框，原点位于显示区域中心，y 轴向下
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundingBox {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
  pub class_id: usize,
  pub label: String,
  pub score: f32,
}

/// 跨周期复用的检测框池：上一周期的框被隐藏而不释放
#[derive(Debug, Default)]
pub struct BoxPool {
  slots: Vec<BoundingBox>,
  active: usize,
}

impl BoxPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前可见的框
  pub fn active(&self) -> &[BoundingBox] {
    &self.slots[..self.active]
  }

  pub fn hide_all(&mut self) {
    self.active = 0;
  }

  /// 已分配的槽位数
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  fn next_slot(&mut self) -> &mut BoundingBox {
    if self.active == self.slots.len() {
      self.slots.push(BoundingBox::default());
    }
    let slot = &mut self.slots[self.active];
    self.active += 1;
    slot
  }
}

/// 超出标签范围的类别索引的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelPolicy {
  /// 使用 `"unknown"` 并记录警告
  #[default]
  Unknown,
  /// 返回错误
  Strict,
}

#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  labels: LabelList,
  model_width: f32,
  model_height: f32,
  display: DisplaySize,
  max_boxes: usize,
  policy: LabelPolicy,
}

impl DetectionDecoder {
  pub fn new(labels: LabelList, model_size: (usize, usize), display: DisplaySize) -> Self {
    Self {
      labels,
      model_width: model_size.0 as f32,
      model_height: model_size.1 as f32,
      display,
      max_boxes: DEFAULT_MAX_BOXES,
      policy: LabelPolicy::default(),
    }
  }

  pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  pub fn with_policy(mut self, policy: LabelPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn display(&self) -> DisplaySize {
    self.display
  }

  pub fn set_display(&mut self, display: DisplaySize) {
    self.display = display;
  }

  /// 模型切换后更新模型输入尺寸 (宽, 高)
  pub fn set_model_size(&mut self, width: usize, height: usize) {
    self.model_width = width as f32;
    self.model_height = height as f32;
  }

  /// 模型像素坐标映射到显示空间 `(center_x, center_y, width, height)`
  pub fn to_display(&self, b: &ModelBox) -> (f32, f32, f32, f32) {
    let scale_x = self.display.width / self.model_width;
    let scale_y = self.display.height / self.model_height;
    (
      b.cx * scale_x - self.display.width / 2.0,
      b.cy * scale_y - self.display.height / 2.0,
      b.w * scale_x,
      b.h * scale_y,
    )
  }

  fn label(&self, class_id: usize) -> Result<&str, DecodeError> {
    match self.labels.get(class_id) {
      Some(label) => Ok(label),
      None => match self.policy {
        LabelPolicy::Unknown => {
          warn!("类别索引 {} 超出标签范围 ({} 个)", class_id, self.labels.len());
          Ok(UNKNOWN_LABEL)
        }
        LabelPolicy::Strict => Err(DecodeError::ClassIndexOutOfRange {
          index: class_id,
          len: self.labels.len(),
        }),
      },
    }
  }

  /// 隐藏上一周期的框，按顺序填充至多 `max_boxes` 个框，返回可见数量。
  ///
  /// 标签全部解析成功后才改动 `pool`，出错时上一周期的框保持可见。
  pub fn decode_into(&self, boxes: &[ModelBox], pool: &mut BoxPool) -> Result<usize, DecodeError> {
    let boxes = &boxes[..boxes.len().min(self.max_boxes)];
    let labels = boxes
      .iter()
      .map(|b| self.label(b.class_id))
      .collect::<Result<Vec<_>, _>>()?;

    pool.hide_all();
    for (b, label) in boxes.iter().zip(labels) {
      let (center_x, center_y, width, height) = self.to_display(b);

      let slot = pool.next_slot();
      slot.center_x = center_x;
      slot.center_y = center_y;
      slot.width = width;
      slot.height = height;
      slot.class_id = b.class_id;
      slot.score = b.score;
      slot.label.clear();
      slot.label.push_str(label);
    }

    Ok(pool.active().len())
  }
}
