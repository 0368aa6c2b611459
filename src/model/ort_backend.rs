// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/ort_backend.rs - ONNX Runtime 推理后端
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

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
  session::{Session, builder::GraphOptimizationLevel},
  value::{DynValue, Tensor as OrtTensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  model::{Backend, BackendLoader, Dim, ModelDescriptor},
  tensor::{Device, Tensor, TensorError},
};

#[derive(Error, Debug)]
pub enum OrtBackendError {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("模型没有输入")]
  NoInput,
  #[error("模型输入 {0} 不是张量")]
  NotATensor(String),
  #[error("模型缺少输出 {0}")]
  MissingOutput(String),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

impl From<ort::Error> for OrtBackendError {
  fn from(err: ort::Error) -> Self {
    OrtBackendError::Runtime(err.to_string())
  }
}

#[derive(Debug, Clone, Default)]
pub struct OrtLoader {
  intra_threads: Option<usize>,
}

impl OrtLoader {
  pub fn with_intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }
}

impl BackendLoader for OrtLoader {
  type Backend = OrtBackend;

  fn load(&mut self, descriptor: &ModelDescriptor) -> Result<OrtBackend, OrtBackendError> {
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }

    let builder = match descriptor.device {
      Device::Gpu => builder.with_execution_providers([
        CUDAExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ])?,
      Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()])?,
    };

    let session = builder.commit_from_file(&descriptor.path)?;
    info!("ONNX Runtime 会话创建完成: {}", descriptor.name);

    let input = session.inputs.first().ok_or(OrtBackendError::NoInput)?;
    let signature = match &input.input_type {
      ValueType::Tensor { shape, .. } => shape
        .iter()
        .enumerate()
        .map(|(axis, &d)| {
          if d >= 0 {
            Dim::Fixed(d as usize)
          } else {
            Dim::Symbolic(format!("dim{}", axis))
          }
        })
        .collect::<Vec<_>>(),
      _ => return Err(OrtBackendError::NotATensor(input.name.clone())),
    };
    let input_name = input.name.clone();
    let output_names = session
      .outputs
      .iter()
      .map(|o| o.name.clone())
      .collect::<Vec<_>>();
    debug!("模型输入: {}, 模型输出: {:?}", input_name, output_names);

    Ok(OrtBackend {
      name: descriptor.name.clone(),
      session,
      input_name,
      output_names,
      signature,
      device: descriptor.device,
    })
  }
}

pub struct OrtBackend {
  name: String,
  session: Session,
  input_name: String,
  output_names: Vec<String>,
  signature: Vec<Dim>,
  device: Device,
}

impl Drop for OrtBackend {
  fn drop(&mut self) {
    debug!("释放 ONNX Runtime 会话: {}", self.name);
  }
}

/// 浮点输出直接复制，整型输出（如类别索引）转换为浮点
fn extract(value: &DynValue) -> Result<(Vec<usize>, Vec<f32>), OrtBackendError> {
  let to_dims = |shape: &[i64]| shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
  if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
    return Ok((to_dims(shape), data.to_vec()));
  }
  let (shape, data) = value.try_extract_tensor::<i64>()?;
  Ok((to_dims(shape), data.iter().map(|&v| v as f32).collect()))
}

impl Backend for OrtBackend {
  type Error = OrtBackendError;

  fn input_signature(&self) -> Vec<Dim> {
    self.signature.clone()
  }

  fn device(&self) -> Device {
    self.device
  }

  fn forward(&mut self, input: &Tensor<f32>) -> Result<Vec<Tensor<f32>>, Self::Error> {
    let value = OrtTensor::from_array((
      input.shape().to_vec(),
      input.host_data()?.to_vec().into_boxed_slice(),
    ))?;
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => value])?;

    let mut tensors = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let value = outputs
        .get(name.as_str())
        .ok_or_else(|| OrtBackendError::MissingOutput(name.clone()))?;
      let (dims, data) = extract(value)?;
      tensors.push(Tensor::from_shape_vec(&dims, data)?.on_device(self.device));
    }
    Ok(tensors)
  }

  /// 输出在提取时已复制到主机内存，这里只更新驻留标记
  fn download(&mut self, tensor: Tensor<f32>) -> Result<Tensor<f32>, Self::Error> {
    Ok(tensor.into_host())
  }
}
