// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/backend.rs - 推理后端抽象
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

use crate::{
  model::{Dim, ModelDescriptor},
  tensor::{Device, Tensor},
};

/// 已加载模型的执行后端。后端在 `Drop` 时释放其持有的设备资源。
pub trait Backend {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型声明的第一个输入的维度
  fn input_signature(&self) -> Vec<Dim>;

  fn device(&self) -> Device;

  /// 同步执行一次完整的前向推理，输出按索引排列
  fn forward(&mut self, input: &Tensor<f32>) -> Result<Vec<Tensor<f32>>, Self::Error>;

  /// 阻塞地将设备张量下载到主机
  fn download(&mut self, tensor: Tensor<f32>) -> Result<Tensor<f32>, Self::Error>;
}

/// 根据模型描述构造后端
pub trait BackendLoader {
  type Backend: Backend;

  fn load(
    &mut self,
    descriptor: &ModelDescriptor,
  ) -> Result<Self::Backend, <Self::Backend as Backend>::Error>;
}
