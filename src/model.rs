// 该文件是 Tianmu （天目） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, path::PathBuf};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::DecodeError,
  tensor::{CodecError, Device, TensorError},
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型签名中声明的一个维度
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
  Fixed(usize),
  Symbolic(String),
}

impl Dim {
  pub fn value(&self) -> Option<usize> {
    match self {
      Dim::Fixed(v) => Some(*v),
      Dim::Symbolic(_) => None,
    }
  }
}

impl fmt::Display for Dim {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dim::Fixed(v) => write!(f, "{}", v),
      Dim::Symbolic(name) => write!(f, "{}", name),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nhwc,
  Nchw,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShapeError {
  #[error("模型输入必须是 4 维张量, 实际为 {0} 维")]
  WrongRank(usize),
  #[error("模型输入第 {axis} 维为符号维度 '{name}', 仅支持具体尺寸")]
  Symbolic { axis: usize, name: String },
  #[error("模型输入第 {axis} 维为 0")]
  ZeroExtent { axis: usize },
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(usize),
}

/// 模型输入形状，由模型签名推导，加载后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
  pub height: usize,
  pub width: usize,
  pub channels: usize,
  pub layout: TensorLayout,
}

const MAX_CHANNELS: usize = 4;
const RGB_CHANNELS: usize = 3;

impl ModelShape {
  pub fn nhwc(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
      layout: TensorLayout::Nhwc,
    }
  }

  pub fn nchw(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
      layout: TensorLayout::Nchw,
    }
  }

  /// 从 `[batch, ...]` 四维签名推导输入形状。
  ///
  /// 批次维可以是符号维度（按 1 处理），其余三维必须是非零的具体值。
  /// 只有第 1 维不超过 4 时视为 NCHW，只有最后一维不超过 4 时视为 NHWC。
  /// 两者都不超过 4 时，仅第 1 维为 3 视为 NCHW，其余按 NHWC 处理。
  pub fn from_signature(dims: &[Dim]) -> Result<Self, ShapeError> {
    if dims.len() != 4 {
      return Err(ShapeError::WrongRank(dims.len()));
    }

    let mut extents = [0usize; 3];
    for (axis, dim) in dims.iter().enumerate().skip(1) {
      extents[axis - 1] = match dim {
        Dim::Fixed(0) => return Err(ShapeError::ZeroExtent { axis }),
        Dim::Fixed(v) => *v,
        Dim::Symbolic(name) => {
          return Err(ShapeError::Symbolic {
            axis,
            name: name.clone(),
          });
        }
      };
    }

    let [d1, d2, d3] = extents;
    let shape = match (d1 <= MAX_CHANNELS, d3 <= MAX_CHANNELS) {
      (true, false) => Self::nchw(d2, d3, d1),
      (true, true) if d1 == RGB_CHANNELS && d3 != RGB_CHANNELS => Self::nchw(d2, d3, d1),
      (_, true) => Self::nhwc(d1, d2, d3),
      (false, false) => return Err(ShapeError::UnsupportedChannels(d3)),
    };
    debug!("输入签名 {:?} 解析为 {:?}", extents, shape.layout);
    Ok(shape)
  }

  /// 批次为 1 时的输入张量形状
  pub fn input_dims(&self) -> [usize; 4] {
    match self.layout {
      TensorLayout::Nhwc => [1, self.height, self.width, self.channels],
      TensorLayout::Nchw => [1, self.channels, self.height, self.width],
    }
  }
}

impl fmt::Display for ModelShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}x{}x{} ({:?})",
      self.height, self.width, self.channels, self.layout
    )
  }
}

/// 模型描述：模型文件位置与执行设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
  pub name: String,
  pub path: PathBuf,
  pub device: Device,
}

impl ModelDescriptor {
  pub fn new(path: impl Into<PathBuf>, device: Device) -> Self {
    let path = path.into();
    let name = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Self { name, path, device }
  }
}

#[derive(Error, Debug)]
pub enum DescriptorError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("未知的执行设备: {0}")]
  UnknownDevice(String),
}

impl FromUrlWithScheme for ModelDescriptor {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for ModelDescriptor {
  type Error = DescriptorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DescriptorError::SchemeMismatch(Self::SCHEME));
    }

    let mut device = Device::Cpu;
    for (k, v) in url.query_pairs() {
      if k == "device" {
        device = match v.as_ref() {
          "cpu" => Device::Cpu,
          "gpu" | "cuda" => Device::Gpu,
          other => return Err(DescriptorError::UnknownDevice(other.to_string())),
        };
      }
    }

    Ok(ModelDescriptor::new(crate::decode_url_path(url), device))
  }
}

/// `load()` 返回的不可变模型快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSnapshot {
  pub name: String,
  pub shape: ModelShape,
  pub device: Device,
  pub generation: u64,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("不支持的模型输入形状: {0}")]
  UnsupportedShape(#[from] ShapeError),
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShapeMismatch {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("张量编解码错误: {0}")]
  Codec(#[from] CodecError),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型缺少第 {0} 个输出")]
  MissingOutput(usize),
}

mod backend;
mod detection;
mod engine;
#[cfg(feature = "onnx_runtime")]
mod ort_backend;
mod postprocess;
mod segmentation;

pub use self::backend::{Backend, BackendLoader};
pub use self::detection::{DetectionInference, DetectionModel};
pub use self::engine::InferenceEngine;
#[cfg(feature = "onnx_runtime")]
pub use self::ort_backend::{OrtBackend, OrtBackendError, OrtLoader};
pub use self::postprocess::{
  CENTERS_TO_CORNERS, DetectionGraph, DetectionTensors, RawLayout, iou, nms,
};
pub use self::segmentation::{SegmentationInference, SegmentationModel};

#[cfg(test)]
mod tests {
  use super::*;

  fn fixed(dims: &[usize]) -> Vec<Dim> {
    dims.iter().map(|&d| Dim::Fixed(d)).collect()
  }

  #[test]
  fn nhwc_signature() {
    let shape = ModelShape::from_signature(&fixed(&[1, 256, 256, 3])).unwrap();
    assert_eq!(shape, ModelShape::nhwc(256, 256, 3));
  }

  #[test]
  fn nchw_signature() {
    let shape = ModelShape::from_signature(&fixed(&[1, 3, 640, 480])).unwrap();
    assert_eq!(shape, ModelShape::nchw(640, 480, 3));
    assert_eq!(shape.input_dims(), [1, 3, 640, 480]);
  }

  #[test]
  fn narrow_nchw_is_not_read_as_nhwc() {
    let shape = ModelShape::from_signature(&fixed(&[1, 3, 224, 4])).unwrap();
    assert_eq!(shape, ModelShape::nchw(224, 4, 3));
    // 两端都可能是通道维时按 NHWC
    let shape = ModelShape::from_signature(&fixed(&[1, 4, 4, 3])).unwrap();
    assert_eq!(shape, ModelShape::nhwc(4, 4, 3));
  }

  #[test]
  fn symbolic_batch_is_accepted() {
    let mut dims = fixed(&[0, 128, 96, 3]);
    dims[0] = Dim::Symbolic("batch".into());
    assert_eq!(
      ModelShape::from_signature(&dims).unwrap(),
      ModelShape::nhwc(128, 96, 3)
    );
  }

  #[test]
  fn symbolic_spatial_is_rejected() {
    let dims = vec![
      Dim::Fixed(1),
      Dim::Symbolic("height".into()),
      Dim::Fixed(256),
      Dim::Fixed(3),
    ];
    assert_eq!(
      ModelShape::from_signature(&dims),
      Err(ShapeError::Symbolic {
        axis: 1,
        name: "height".into()
      })
    );
  }

  #[test]
  fn wrong_rank_is_rejected() {
    assert_eq!(
      ModelShape::from_signature(&fixed(&[1, 3, 224])),
      Err(ShapeError::WrongRank(3))
    );
  }

  #[test]
  fn descriptor_from_url() {
    let url = Url::parse("onnx:///models/unet%20mini.onnx?device=gpu").unwrap();
    let desc = ModelDescriptor::from_url(&url).unwrap();
    assert_eq!(desc.path, PathBuf::from("/models/unet mini.onnx"));
    assert_eq!(desc.name, "unet mini");
    assert_eq!(desc.device, Device::Gpu);
  }

  #[test]
  fn descriptor_rejects_other_scheme() {
    let url = Url::parse("image:///a.png").unwrap();
    assert!(matches!(
      ModelDescriptor::from_url(&url),
      Err(DescriptorError::SchemeMismatch(_))
    ));
  }
}
