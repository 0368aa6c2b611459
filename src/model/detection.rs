// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/detection.rs - 目标检测模型
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

use std::time::Instant;

use tracing::debug;

use crate::{
  frame::RgbaFrame,
  model::{
    BackendLoader, DetectionGraph, InferenceEngine, Model, ModelDescriptor, ModelError,
    ModelSnapshot,
  },
  tensor::{ModelBox, Origin, TensorCodec},
  timing::CycleTimings,
};

#[derive(Debug, Clone)]
pub struct DetectionInference {
  /// 模型输入像素空间中的检测框，按分数降序
  pub boxes: Vec<ModelBox>,
  pub timings: CycleTimings,
}

/// 检测网络与融合后处理图的组合
pub struct DetectionModel<L: BackendLoader> {
  engine: InferenceEngine<L>,
  codec: TensorCodec,
  graph: DetectionGraph,
  snapshot: ModelSnapshot,
}

impl<L: BackendLoader> DetectionModel<L> {
  pub fn new(
    loader: L,
    descriptor: &ModelDescriptor,
    graph: DetectionGraph,
  ) -> Result<Self, ModelError> {
    let mut engine = InferenceEngine::new(loader);
    let snapshot = engine.load(descriptor)?;
    Ok(Self {
      engine,
      codec: TensorCodec::new(snapshot.shape, Origin::TopLeft),
      graph,
      snapshot,
    })
  }

  pub fn snapshot(&self) -> &ModelSnapshot {
    &self.snapshot
  }

  pub fn engine(&self) -> &InferenceEngine<L> {
    &self.engine
  }

  pub fn graph(&self) -> &DetectionGraph {
    &self.graph
  }

  pub fn swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, ModelError> {
    let snapshot = self.engine.load(descriptor)?;
    self.codec = TensorCodec::new(snapshot.shape, Origin::TopLeft);
    self.snapshot = snapshot.clone();
    Ok(snapshot)
  }
}

impl<L: BackendLoader> Model for DetectionModel<L> {
  type Input = RgbaFrame;
  type Output = DetectionInference;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let start = Instant::now();
    let tensor = self.codec.encode(input)?;
    let outputs = self.engine.execute(&tensor)?;
    let inference = start.elapsed();

    let start = Instant::now();
    let raw = outputs.into_iter().next().ok_or(ModelError::MissingOutput(0))?;
    let raw = self.engine.synchronize(raw)?;
    let download = start.elapsed();

    let start = Instant::now();
    let fused = self.graph.run(&raw)?;
    let boxes = self.codec.decode_boxes(&fused)?;
    let draw = start.elapsed();

    let timings = CycleTimings {
      inference,
      download,
      draw,
    };
    debug!("检测推理完成: {} 个目标, {}", boxes.len(), timings);

    Ok(DetectionInference { boxes, timings })
  }
}
