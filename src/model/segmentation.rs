// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/segmentation.rs - 语义分割模型
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

use image::RgbaImage;
use tracing::debug;

use crate::{
  decode::{ClassMap, Palette, SegmentationDecoder},
  frame::RgbaFrame,
  model::{BackendLoader, InferenceEngine, Model, ModelDescriptor, ModelError, ModelSnapshot},
  tensor::{Origin, TensorCodec},
  timing::CycleTimings,
};

#[derive(Debug, Clone)]
pub struct SegmentationInference {
  pub class_map: ClassMap,
  /// 与输入帧对齐的着色结果
  pub overlay: RgbaImage,
  pub timings: CycleTimings,
}

pub struct SegmentationModel<L: BackendLoader> {
  engine: InferenceEngine<L>,
  codec: TensorCodec,
  decoder: SegmentationDecoder,
  snapshot: ModelSnapshot,
}

impl<L: BackendLoader> SegmentationModel<L> {
  pub fn new(
    loader: L,
    descriptor: &ModelDescriptor,
    decoder: SegmentationDecoder,
  ) -> Result<Self, ModelError> {
    let mut engine = InferenceEngine::new(loader);
    let snapshot = engine.load(descriptor)?;
    Ok(Self {
      engine,
      // 纹理行序编码，配合解码时的垂直翻转保持与帧对齐
      codec: TensorCodec::new(snapshot.shape, Origin::BottomLeft),
      decoder,
      snapshot,
    })
  }

  pub fn snapshot(&self) -> &ModelSnapshot {
    &self.snapshot
  }

  pub fn engine(&self) -> &InferenceEngine<L> {
    &self.engine
  }

  /// 替换模型，返回新的快照
  pub fn swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, ModelError> {
    let snapshot = self.engine.load(descriptor)?;
    self.codec = TensorCodec::new(snapshot.shape, Origin::BottomLeft);
    self.snapshot = snapshot.clone();
    Ok(snapshot)
  }

  pub fn set_palette(&mut self, palette: Palette) {
    self.decoder.set_palette(palette);
  }

  pub fn decoder(&self) -> &SegmentationDecoder {
    &self.decoder
  }
}

impl<L: BackendLoader> Model for SegmentationModel<L> {
  type Input = RgbaFrame;
  type Output = SegmentationInference;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let start = Instant::now();
    let tensor = self.codec.encode(input)?;
    let outputs = self.engine.execute(&tensor)?;
    let inference = start.elapsed();

    let start = Instant::now();
    let output = outputs.into_iter().next().ok_or(ModelError::MissingOutput(0))?;
    let output = self.engine.synchronize(output)?;
    let download = start.elapsed();

    let start = Instant::now();
    let scores = self.codec.decode_class_scores(&output)?;
    let (class_map, overlay) = self.decoder.decode(&scores);
    let draw = start.elapsed();

    let timings = CycleTimings {
      inference,
      download,
      draw,
    };
    debug!("分割推理完成: {}", timings);

    Ok(SegmentationInference {
      class_map,
      overlay,
      timings,
    })
  }
}
