// 该文件是 Tianmu （天目） 项目的一部分。
// src/decode.rs - 模型输出解码
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

use thiserror::Error;

mod detection;
mod labels;
mod segmentation;

pub use self::detection::{BoundingBox, BoxPool, DetectionDecoder, DisplaySize, LabelPolicy};
pub use self::labels::{LabelList, UNKNOWN_LABEL};
pub use self::segmentation::{ClassMap, Palette, SegmentationDecoder, SemanticClass};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("类别索引 {index} 超出标签范围 (共 {len} 个)")]
  ClassIndexOutOfRange { index: usize, len: usize },
  #[error("调色板至少需要一个空类别")]
  EmptyPalette,
  #[error("调色板解析错误: {0}")]
  PaletteJson(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}
