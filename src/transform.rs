// 该文件是 Tianmu （天目） 项目的一部分。
// src/transform.rs - 帧变换：裁剪、缩放、镜像与旋转
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

use std::str::FromStr;

use image::{
  RgbaImage,
  imageops::{self, FilterType},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{Frame, RgbaFrame},
  model::ModelShape,
};

const RGBA_CHANNELS: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
  #[error("裁剪窗口 {width}x{height} 超出源帧尺寸 {source_width}x{source_height}")]
  CutoutExceedsSource {
    source_width: u32,
    source_height: u32,
    width: u32,
    height: u32,
  },
  #[error("未知的变换模式: {0}")]
  UnknownMode(String),
  #[error("未知的旋转方向: {0}")]
  UnknownRotation(String),
}

/// 源帧到模型输入尺寸的转换方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
  /// 从中心裁剪出目标尺寸窗口，不重采样
  Cutout,
  /// 将整帧重采样到目标尺寸
  Scaled,
}

impl FromStr for TransformMode {
  type Err = TransformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cutout" => Ok(TransformMode::Cutout),
      "scaled" => Ok(TransformMode::Scaled),
      other => Err(TransformError::UnknownMode(other.to_string())),
    }
  }
}

/// 四分之一圈旋转方向，以纹理坐标（左下角原点）为准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rotation {
  Clockwise,
  CounterClockwise,
}

impl FromStr for Rotation {
  type Err = TransformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cw" | "clockwise" => Ok(Rotation::Clockwise),
      "ccw" | "counter-clockwise" => Ok(Rotation::CounterClockwise),
      other => Err(TransformError::UnknownRotation(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformConfig {
  pub mode: TransformMode,
  pub mirror: bool,
  pub rotation: Option<Rotation>,
  pub filter: FilterType,
}

impl TransformConfig {
  /// 摄像头：中心裁剪、水平镜像，并顺时针旋转转置的传感器画面
  pub fn camera() -> Self {
    Self {
      mode: TransformMode::Cutout,
      mirror: true,
      rotation: Some(Rotation::Clockwise),
      filter: FilterType::Triangle,
    }
  }

  /// 视频或图片：整帧缩放，不镜像
  pub fn video() -> Self {
    Self {
      mode: TransformMode::Scaled,
      mirror: false,
      rotation: None,
      filter: FilterType::Triangle,
    }
  }

  pub fn with_mode(mut self, mode: TransformMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_mirror(mut self, mirror: bool) -> Self {
    self.mirror = mirror;
    self
  }

  pub fn with_rotation(mut self, rotation: Option<Rotation>) -> Self {
    self.rotation = rotation;
    self
  }
}

impl Default for TransformConfig {
  fn default() -> Self {
    Self::camera()
  }
}

/// 将任意尺寸的源帧转换为模型输入尺寸的 RGBA 缓冲区
#[derive(Debug, Clone)]
pub struct FrameTransform {
  config: TransformConfig,
  width: u32,
  height: u32,
}

impl FrameTransform {
  pub fn new(config: TransformConfig, shape: &ModelShape) -> Self {
    Self {
      config,
      width: shape.width as u32,
      height: shape.height as u32,
    }
  }

  pub fn config(&self) -> &TransformConfig {
    &self.config
  }

  pub fn mode(&self) -> TransformMode {
    self.config.mode
  }

  /// 在两次推理之间切换转换方式
  pub fn set_mode(&mut self, mode: TransformMode) {
    if self.config.mode != mode {
      debug!("切换帧变换模式: {:?} -> {:?}", self.config.mode, mode);
      self.config.mode = mode;
    }
  }

  /// 模型切换后按新的输入形状调整目标尺寸
  pub fn retarget(&mut self, shape: &ModelShape) {
    self.width = shape.width as u32;
    self.height = shape.height as u32;
    debug!("帧变换目标尺寸: {}x{}", self.width, self.height);
  }

  /// 输出尺寸 (宽, 高)
  pub fn target(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  /// 旋转前的转换尺寸；启用旋转时宽高互换，保证旋转后恰为目标尺寸
  fn conversion_dims(&self) -> (u32, u32) {
    match self.config.rotation {
      Some(_) => (self.height, self.width),
      None => (self.width, self.height),
    }
  }

  /// 检查源尺寸是否可用于当前模式
  pub fn validate_source(&self, width: u32, height: u32) -> Result<(), TransformError> {
    let (cw, ch) = self.conversion_dims();
    if self.config.mode == TransformMode::Cutout && (width < cw || height < ch) {
      return Err(TransformError::CutoutExceedsSource {
        source_width: width,
        source_height: height,
        width: cw,
        height: ch,
      });
    }
    Ok(())
  }

  pub fn apply(&self, frame: Frame) -> Result<RgbaFrame, TransformError> {
    self.validate_source(frame.width(), frame.height())?;

    let (cw, ch) = self.conversion_dims();
    let image = frame.into_rgba_image();
    let mut converted = match self.config.mode {
      TransformMode::Cutout => cutout(&image, cw, ch)?,
      TransformMode::Scaled => scaled(&image, cw, ch, self.config.filter),
    };

    if self.config.mirror {
      mirror_horizontal(&mut converted);
    }

    if let Some(rotation) = self.config.rotation {
      converted = rotate_quarter(&converted, rotation);
    }

    Ok(RgbaFrame::from(converted))
  }
}

/// 中心裁剪，每个轴的起点为 (源尺寸 - 目标尺寸) / 2
pub fn cutout(image: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, TransformError> {
  let (sw, sh) = image.dimensions();
  if sw < width || sh < height {
    return Err(TransformError::CutoutExceedsSource {
      source_width: sw,
      source_height: sh,
      width,
      height,
    });
  }

  let x = (sw - width) / 2;
  let y = (sh - height) / 2;
  Ok(imageops::crop_imm(image, x, y, width, height).to_image())
}

pub fn scaled(image: &RgbaImage, width: u32, height: u32, filter: FilterType) -> RgbaImage {
  if image.dimensions() == (width, height) {
    return image.clone();
  }
  imageops::resize(image, width, height, filter)
}

pub fn mirror_horizontal(image: &mut RgbaImage) {
  imageops::flip_horizontal_in_place(image);
}

/// 对 h×w 的图像做转置加翻转：
/// `rotated[(i+1)*h - j - 1] = original[cw ? len-1-(j*w+i) : j*w+i]`，
/// 结果宽为 h，高为 w。
pub fn rotate_quarter(image: &RgbaImage, rotation: Rotation) -> RgbaImage {
  let (w, h) = (image.width() as usize, image.height() as usize);
  let len = w * h;
  let src = image.as_raw();
  let mut dst = vec![0u8; src.len()];

  for j in 0..h {
    for i in 0..w {
      let from = source_index(rotation, len, j * w + i);
      let to = (i + 1) * h - j - 1;
      copy_pixel(src, from, &mut dst, to);
    }
  }

  RgbaImage::from_raw(h as u32, w as u32, dst).unwrap_or_else(|| RgbaImage::new(h as u32, w as u32))
}

/// `rotate_quarter` 的逆变换，输入为旋转后的图像
pub fn unrotate_quarter(rotated: &RgbaImage, rotation: Rotation) -> RgbaImage {
  // 旋转后宽为原图高度，高为原图宽度
  let (h, w) = (rotated.width() as usize, rotated.height() as usize);
  let len = w * h;
  let src = rotated.as_raw();
  let mut dst = vec![0u8; src.len()];

  for j in 0..h {
    for i in 0..w {
      let to = source_index(rotation, len, j * w + i);
      let from = (i + 1) * h - j - 1;
      copy_pixel(src, from, &mut dst, to);
    }
  }

  RgbaImage::from_raw(w as u32, h as u32, dst).unwrap_or_else(|| RgbaImage::new(w as u32, h as u32))
}

fn source_index(rotation: Rotation, len: usize, linear: usize) -> usize {
  match rotation {
    Rotation::Clockwise => len - 1 - linear,
    Rotation::CounterClockwise => linear,
  }
}

fn copy_pixel(src: &[u8], from: usize, dst: &mut [u8], to: usize) {
  let from = from * RGBA_CHANNELS;
  let to = to * RGBA_CHANNELS;
  dst[to..to + RGBA_CHANNELS].copy_from_slice(&src[from..from + RGBA_CHANNELS]);
}
