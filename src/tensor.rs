// 该文件是 Tianmu （天目） 项目的一部分。
// src/tensor.rs - 张量与张量编解码
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

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  frame::RgbaFrame,
  model::{DetectionTensors, ModelShape, TensorLayout},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
  #[default]
  Cpu,
  Gpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "CPU"),
      Device::Gpu => write!(f, "GPU"),
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量位于 {0} 上, 需先同步到主机")]
  DeviceResident(Device),
}

/// 独占所有权的张量，缓冲区长度恒等于形状各维乘积
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
  shape: Box<[usize]>,
  data: Box<[T]>,
  device: Device,
}

impl<T> Tensor<T> {
  pub fn from_shape_vec(shape: &[usize], data: Vec<T>) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
      return Err(TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into(),
      data: data.into_boxed_slice(),
      device: Device::Cpu,
    })
  }

  /// 标记张量驻留的设备
  pub fn on_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn byte_len(&self) -> usize {
    self.data.len() * std::mem::size_of::<T>()
  }

  /// 读取主机侧数据，设备张量需先经 `synchronize` 下载
  pub fn host_data(&self) -> Result<&[T], TensorError> {
    match self.device {
      Device::Cpu => Ok(&self.data),
      device => Err(TensorError::DeviceResident(device)),
    }
  }

  pub fn into_host_vec(self) -> Result<Vec<T>, TensorError> {
    match self.device {
      Device::Cpu => Ok(self.data.into_vec()),
      device => Err(TensorError::DeviceResident(device)),
    }
  }

  /// 下载完成后由后端调用
  pub(crate) fn into_host(mut self) -> Self {
    self.device = Device::Cpu;
    self
  }
}

/// 纹理行序：`BottomLeft` 时第 0 行对应图像底部
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
  #[default]
  TopLeft,
  BottomLeft,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
  #[error("帧尺寸 {actual:?} 与模型输入尺寸 {expected:?} 不一致")]
  DimensionMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(usize),
  #[error("输出张量形状错误: 期望 {expected}, 实际 {actual:?}")]
  OutputShape {
    expected: &'static str,
    actual: Vec<usize>,
  },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 分割输出的主机侧分数，按 `row * width * classes + col * classes + class` 索引
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
  height: usize,
  width: usize,
  classes: usize,
  scores: Box<[f32]>,
}

impl ClassScores {
  pub fn from_hwc(
    height: usize,
    width: usize,
    classes: usize,
    scores: Vec<f32>,
  ) -> Result<Self, TensorError> {
    let expected = height * width * classes;
    if scores.len() != expected {
      return Err(TensorError::ShapeMismatch {
        shape: vec![height, width, classes],
        expected,
        actual: scores.len(),
      });
    }

    Ok(Self {
      height,
      width,
      classes,
      scores: scores.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn classes(&self) -> usize {
    self.classes
  }

  /// 某像素全部类别的分数
  pub fn pixel(&self, row: usize, col: usize) -> &[f32] {
    let start = row * self.width * self.classes + col * self.classes;
    &self.scores[start..start + self.classes]
  }
}

/// 模型输入像素空间中的检测框（中心格式）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelBox {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
  pub class_id: usize,
  pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorCodec {
  shape: ModelShape,
  origin: Origin,
}

impl TensorCodec {
  pub fn new(shape: ModelShape, origin: Origin) -> Self {
    Self { shape, origin }
  }

  pub fn shape(&self) -> &ModelShape {
    &self.shape
  }

  pub fn origin(&self) -> Origin {
    self.origin
  }

  /// RGBA 缓冲区编码为 [0, 1] 范围的浮点张量，形状取自模型签名
  pub fn encode(&self, frame: &RgbaFrame) -> Result<Tensor<f32>, CodecError> {
    let ModelShape {
      height: h,
      width: w,
      channels: c,
      layout,
    } = self.shape;

    let actual = (frame.width() as usize, frame.height() as usize);
    if actual != (w, h) {
      return Err(CodecError::DimensionMismatch {
        expected: (w, h),
        actual,
      });
    }
    if c == 0 || c > frame.channels() {
      return Err(CodecError::UnsupportedChannels(c));
    }

    let src = frame.as_rgba();
    let stride = frame.channels();
    let mut data = vec![0f32; h * w * c];

    for y in 0..h {
      let row = match self.origin {
        Origin::TopLeft => y,
        Origin::BottomLeft => h - 1 - y,
      };
      for x in 0..w {
        let px = (row * w + x) * stride;
        for k in 0..c {
          let value = src[px + k] as f32 / 255.0;
          let index = match layout {
            TensorLayout::Nhwc => (y * w + x) * c + k,
            TensorLayout::Nchw => k * h * w + y * w + x,
          };
          data[index] = value;
        }
      }
    }

    Ok(Tensor::from_shape_vec(&self.shape.input_dims(), data)?)
  }

  /// 分割输出 `[1, h, w, classes]`（NCHW 模型为 `[1, classes, h, w]`）解码为主机侧分数
  pub fn decode_class_scores(&self, tensor: &Tensor<f32>) -> Result<ClassScores, CodecError> {
    let data = tensor.host_data()?;
    let dims = match tensor.shape() {
      [1, a, b, c] => (*a, *b, *c),
      other => {
        return Err(CodecError::OutputShape {
          expected: "[1, h, w, classes]",
          actual: other.to_vec(),
        });
      }
    };

    let scores = match self.shape.layout {
      TensorLayout::Nhwc => {
        let (h, w, classes) = dims;
        ClassScores::from_hwc(h, w, classes, data.to_vec())?
      }
      TensorLayout::Nchw => {
        let (classes, h, w) = dims;
        let plane = h * w;
        let mut hwc = vec![0f32; data.len()];
        for k in 0..classes {
          for p in 0..plane {
            hwc[p * classes + k] = data[k * plane + p];
          }
        }
        ClassScores::from_hwc(h, w, classes, hwc)?
      }
    };

    Ok(scores)
  }

  /// 融合后处理输出：`[N, 4]` 中心坐标、`[N]` 类别、`[N]` 分数
  pub fn decode_boxes(&self, tensors: &DetectionTensors) -> Result<Vec<ModelBox>, CodecError> {
    let coords = tensors.coords.host_data()?;
    let ids = tensors.class_ids.host_data()?;
    let scores = tensors.scores.host_data()?;

    let n = match tensors.coords.shape() {
      [n, 4] => *n,
      other => {
        return Err(CodecError::OutputShape {
          expected: "[N, 4]",
          actual: other.to_vec(),
        });
      }
    };
    if ids.len() != n || scores.len() != n {
      return Err(CodecError::OutputShape {
        expected: "[N]",
        actual: vec![ids.len(), scores.len()],
      });
    }

    Ok(
      coords
        .chunks_exact(4)
        .zip(ids.iter().zip(scores))
        .map(|(c, (&class_id, &score))| ModelBox {
          cx: c[0],
          cy: c[1],
          w: c[2],
          h: c[3],
          class_id: class_id as usize,
          score,
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgba, RgbaImage};

  fn frame(width: u32, height: u32) -> RgbaFrame {
    RgbaFrame::from(RgbaImage::from_fn(width, height, |x, y| {
      Rgba([(x * 10) as u8, (y * 10) as u8, 255, 51])
    }))
  }

  #[test]
  fn tensor_rejects_wrong_length() {
    assert_eq!(
      Tensor::from_shape_vec(&[1, 2, 3], vec![0u8; 5]).unwrap_err(),
      TensorError::ShapeMismatch {
        shape: vec![1, 2, 3],
        expected: 6,
        actual: 5
      }
    );
    let t = Tensor::from_shape_vec(&[2, 2], vec![0f32; 4]).unwrap();
    assert_eq!(t.byte_len(), 16);
  }

  #[test]
  fn gpu_tensor_is_not_host_readable() {
    let t = Tensor::from_shape_vec(&[1], vec![1f32]).unwrap().on_device(Device::Gpu);
    assert_eq!(t.host_data().unwrap_err(), TensorError::DeviceResident(Device::Gpu));
    assert_eq!(t.into_host().host_data().unwrap(), &[1.0]);
  }

  #[test]
  fn encode_nhwc_top_left() {
    let codec = TensorCodec::new(ModelShape::nhwc(2, 3, 3), Origin::TopLeft);
    let t = codec.encode(&frame(3, 2)).unwrap();
    assert_eq!(t.shape(), &[1, 2, 3, 3]);
    let data = t.host_data().unwrap();
    // (y=1, x=2) 的 R 分量
    assert!((data[(1 * 3 + 2) * 3] - 20.0 / 255.0).abs() < 1e-6);
    assert!((data[2] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn encode_bottom_left_flips_rows() {
    let codec = TensorCodec::new(ModelShape::nhwc(2, 3, 3), Origin::BottomLeft);
    let data = codec.encode(&frame(3, 2)).unwrap().into_host_vec().unwrap();
    // 张量第 0 行来自图像最后一行 (G = 10)
    assert!((data[1] - 10.0 / 255.0).abs() < 1e-6);
  }

  #[test]
  fn encode_nchw_with_alpha() {
    let codec = TensorCodec::new(ModelShape::nchw(2, 2, 4), Origin::TopLeft);
    let data = codec.encode(&frame(2, 2)).unwrap().into_host_vec().unwrap();
    assert_eq!(data.len(), 16);
    assert!((data[3 * 4] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn encode_rejects_wrong_frame_size() {
    let codec = TensorCodec::new(ModelShape::nhwc(4, 4, 3), Origin::TopLeft);
    assert_eq!(
      codec.encode(&frame(3, 4)).unwrap_err(),
      CodecError::DimensionMismatch {
        expected: (4, 4),
        actual: (3, 4)
      }
    );
  }

  #[test]
  fn decode_nchw_scores_transposes() {
    let codec = TensorCodec::new(ModelShape::nchw(1, 2, 3), Origin::TopLeft);
    // 两个类别，每个 1x2
    let t = Tensor::from_shape_vec(&[1, 2, 1, 2], vec![0.1, 0.2, 0.9, 0.8]).unwrap();
    let scores = codec.decode_class_scores(&t).unwrap();
    assert_eq!(scores.classes(), 2);
    assert_eq!(scores.pixel(0, 1), &[0.2, 0.8]);
  }

  #[test]
  fn decode_refuses_device_tensor() {
    let codec = TensorCodec::new(ModelShape::nhwc(1, 1, 3), Origin::TopLeft);
    let t = Tensor::from_shape_vec(&[1, 1, 1, 2], vec![0.0, 1.0])
      .unwrap()
      .on_device(Device::Gpu);
    assert!(matches!(
      codec.decode_class_scores(&t),
      Err(CodecError::Tensor(TensorError::DeviceResident(_)))
    ));
  }

  #[test]
  fn decode_boxes_zips_outputs() {
    let codec = TensorCodec::new(ModelShape::nchw(640, 640, 3), Origin::TopLeft);
    let tensors = DetectionTensors {
      coords: Tensor::from_shape_vec(&[1, 4], vec![320.0, 300.0, 40.0, 60.0]).unwrap(),
      class_ids: Tensor::from_shape_vec(&[1], vec![2u32]).unwrap(),
      scores: Tensor::from_shape_vec(&[1], vec![0.75]).unwrap(),
    };
    let boxes = codec.decode_boxes(&tensors).unwrap();
    assert_eq!(
      boxes,
      vec![ModelBox {
        cx: 320.0,
        cy: 300.0,
        w: 40.0,
        h: 60.0,
        class_id: 2,
        score: 0.75
      }]
    );
  }
}
