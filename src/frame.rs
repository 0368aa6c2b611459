// 该文件是 Tianmu （天目） 项目的一部分。
// src/frame.rs - 原始帧与 RGBA 帧定义
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

use image::{Rgba, RgbaImage};
use thiserror::Error;

const RGBA_CHANNELS: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  ZeroDimension { width: u32, height: u32 },
}

/// 传感器帧的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgba8,
  Rgb8,
  Bgr8,
  Gray8,
}

impl PixelFormat {
  pub fn bytes_per_pixel(self) -> usize {
    match self {
      PixelFormat::Rgba8 => 4,
      PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
      PixelFormat::Gray8 => 1,
    }
  }
}

/// 一次采集得到的原始帧。
///
/// 帧在流水线中按值移动：由输入源创建，被 `FrameTransform` 消费一次后释放。
#[derive(Debug)]
pub struct Frame {
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Box<[u8]>,
  index: u64,
  timestamp_ms: u64,
}

impl Frame {
  pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::ZeroDimension { width, height });
    }

    let expected = width as usize * height as usize * format.bytes_per_pixel();
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      format,
      data: data.into_boxed_slice(),
      index: 0,
      timestamp_ms: 0,
    })
  }

  pub fn with_index(mut self, index: u64, timestamp_ms: u64) -> Self {
    self.index = index;
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// 消费帧并转换为 RGBA 图像
  pub fn into_rgba_image(self) -> RgbaImage {
    let (width, height) = (self.width, self.height);
    let data = match self.format {
      PixelFormat::Rgba8 => self.data.into_vec(),
      PixelFormat::Rgb8 => self
        .data
        .chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
        .collect(),
      PixelFormat::Bgr8 => self
        .data
        .chunks_exact(3)
        .flat_map(|p| [p[2], p[1], p[0], u8::MAX])
        .collect(),
      PixelFormat::Gray8 => self
        .data
        .iter()
        .flat_map(|&v| [v, v, v, u8::MAX])
        .collect(),
    };

    // 长度在构造时已校验
    RgbaImage::from_raw(width, height, data)
      .unwrap_or_else(|| RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, u8::MAX])))
  }
}

impl From<RgbaImage> for Frame {
  fn from(image: RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      format: PixelFormat::Rgba8,
      data: image.into_raw().into_boxed_slice(),
      index: 0,
      timestamp_ms: 0,
    }
  }
}

/// 模型输入尺寸的 RGBA 缓冲区，由 `FrameTransform` 产生
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
  image: RgbaImage,
}

impl RgbaFrame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGBA_CHANNELS
  }

  pub fn as_rgba(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn image(&self) -> &RgbaImage {
    &self.image
  }

  pub fn into_image(self) -> RgbaImage {
    self.image
  }
}

impl From<RgbaImage> for RgbaFrame {
  fn from(image: RgbaImage) -> Self {
    Self { image }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_short_buffer() {
    let err = Frame::new(4, 2, PixelFormat::Rgb8, vec![0; 10]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 24,
        actual: 10
      }
    );
  }

  #[test]
  fn rejects_empty_frame() {
    assert!(matches!(
      Frame::new(0, 2, PixelFormat::Gray8, vec![]),
      Err(FrameError::ZeroDimension { .. })
    ));
  }

  #[test]
  fn bgr_is_swizzled_to_rgba() {
    let frame = Frame::new(1, 1, PixelFormat::Bgr8, vec![10, 20, 30]).unwrap();
    let image = frame.into_rgba_image();
    assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10, 255]);
  }

  #[test]
  fn gray_is_expanded() {
    let frame = Frame::new(2, 1, PixelFormat::Gray8, vec![7, 9]).unwrap();
    let image = frame.into_rgba_image();
    assert_eq!(image.get_pixel(1, 0).0, [9, 9, 9, 255]);
  }
}
