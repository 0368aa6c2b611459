// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/engine.rs - 推理引擎
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

use tracing::{debug, error, info, warn};

use crate::{
  model::{
    Backend, BackendLoader, EngineError, ModelDescriptor, ModelShape, ModelSnapshot,
  },
  tensor::{Device, Tensor},
};

struct Loaded<B> {
  backend: B,
  descriptor: ModelDescriptor,
  snapshot: ModelSnapshot,
}

/// 持有至多一个已加载的模型及其执行后端
pub struct InferenceEngine<L: BackendLoader> {
  loader: L,
  current: Option<Loaded<L::Backend>>,
  generation: u64,
}

fn backend_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> EngineError {
  EngineError::Backend(Box::new(e))
}

impl<L: BackendLoader> InferenceEngine<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      current: None,
      generation: 0,
    }
  }

  /// 加载模型。旧的后端在构造新后端之前释放，任一时刻最多存在一个后端。
  ///
  /// 新模型加载失败时重新加载旧模型并返回错误，旧快照与代数保持不变。
  pub fn load(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, EngineError> {
    let previous = self.current.take().map(|previous| {
      info!(
        "释放模型 {} (第 {} 代)",
        previous.snapshot.name, previous.snapshot.generation
      );
      (previous.descriptor, previous.snapshot)
    });

    let (backend, shape) = match self.open(descriptor) {
      Ok(opened) => opened,
      Err(e) => {
        if let Some((descriptor, snapshot)) = previous {
          self.restore(descriptor, snapshot);
        }
        return Err(e);
      }
    };

    self.generation += 1;
    let snapshot = ModelSnapshot {
      name: descriptor.name.clone(),
      shape,
      device: backend.device(),
      generation: self.generation,
    };
    info!(
      "模型加载完成: {} 输入形状 {} 设备 {}",
      snapshot.name, snapshot.shape, snapshot.device
    );

    self.current = Some(Loaded {
      backend,
      descriptor: descriptor.clone(),
      snapshot: snapshot.clone(),
    });
    Ok(snapshot)
  }

  fn open(&mut self, descriptor: &ModelDescriptor) -> Result<(L::Backend, ModelShape), EngineError> {
    info!("加载模型文件: {}", descriptor.path.display());
    let backend = self.loader.load(descriptor).map_err(|e| {
      error!("模型加载失败: {}", e);
      backend_error(e)
    })?;

    let signature = backend.input_signature();
    debug!(
      "模型输入签名: [{}]",
      signature
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
    );

    let shape = ModelShape::from_signature(&signature).map_err(|e| {
      error!("模型输入形状不受支持: {}", e);
      EngineError::UnsupportedShape(e)
    })?;
    Ok((backend, shape))
  }

  fn restore(&mut self, descriptor: ModelDescriptor, snapshot: ModelSnapshot) {
    warn!("恢复上一个模型: {}", snapshot.name);
    match self.open(&descriptor) {
      Ok((backend, shape)) => {
        self.current = Some(Loaded {
          backend,
          descriptor,
          snapshot: ModelSnapshot { shape, ..snapshot },
        });
      }
      Err(e) => error!("上一个模型也无法加载, 引擎为空: {}", e),
    }
  }

  pub fn snapshot(&self) -> Option<&ModelSnapshot> {
    self.current.as_ref().map(|loaded| &loaded.snapshot)
  }

  pub fn is_loaded(&self) -> bool {
    self.current.is_some()
  }

  pub fn unload(&mut self) {
    if let Some(previous) = self.current.take() {
      info!("卸载模型 {}", previous.snapshot.name);
    }
  }

  /// 同步执行一次完整的前向推理
  pub fn execute(&mut self, input: &Tensor<f32>) -> Result<Vec<Tensor<f32>>, EngineError> {
    let loaded = self.current.as_mut().ok_or(EngineError::NotLoaded)?;

    let expected = loaded.snapshot.shape.input_dims();
    if input.shape() != expected {
      return Err(EngineError::InputShapeMismatch {
        expected: expected.to_vec(),
        actual: input.shape().to_vec(),
      });
    }

    loaded.backend.forward(input).map_err(backend_error)
  }

  /// 设备到主机的阻塞下载，主机张量原样返回
  pub fn synchronize(&mut self, tensor: Tensor<f32>) -> Result<Tensor<f32>, EngineError> {
    if tensor.device() == Device::Cpu {
      return Ok(tensor);
    }

    let loaded = self.current.as_mut().ok_or(EngineError::NotLoaded)?;
    loaded.backend.download(tensor).map_err(backend_error)
  }
}
