// 该文件是 Tianmu （天目） 项目的一部分。
// src/pipeline.rs - 帧到推理到叠加层的流水线
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

//! # 推理流水线
//!
//! 每次 `tick` 至多执行一个推理周期：
//! 轮询输入源、帧变换、编码、推理、下载、解码。
//!
//! 周期由单飞门控保护，门控被占用或未到推理间隔时本次 `tick` 直接跳过，
//! 不会排队。运行期的控制（模式切换、模型替换、调色板、显示尺寸）
//! 通过 [`ControlMessage`] 通道传入，在下一次 `tick` 开始时生效。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, Sender, channel},
  },
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  decode::{BoxPool, BoundingBox, DecodeError, DetectionDecoder, DisplaySize, Palette},
  frame::RgbaFrame,
  input::{FramePoll, FrameSource, InputError},
  model::{
    BackendLoader, DetectionModel, Model, ModelDescriptor, ModelError, ModelSnapshot,
    SegmentationInference, SegmentationModel,
  },
  tensor::ModelBox,
  timing::CycleTimings,
  transform::{FrameTransform, TransformConfig, TransformError, TransformMode},
};

/// 分割任务的默认推理间隔
pub const SEGMENTATION_INTERVAL: Duration = Duration::from_millis(190);

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("帧变换错误: {0}")]
  Transform(#[from] TransformError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
}

/// 单飞门控：同一时刻至多一个推理周期
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
  busy: Arc<AtomicBool>,
}

impl SingleFlight {
  pub fn new() -> Self {
    Self::default()
  }

  /// 门控空闲时占用并返回守卫，守卫释放时门控随之释放
  pub fn try_acquire(&self) -> Option<FlightGuard> {
    self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| FlightGuard {
        busy: Arc::clone(&self.busy),
      })
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }
}

#[derive(Debug)]
pub struct FlightGuard {
  busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
  fn drop(&mut self) {
    self.busy.store(false, Ordering::Release);
  }
}

/// 最小推理间隔
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
  interval: Duration,
  last: Option<Instant>,
}

impl Cadence {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      last: None,
    }
  }

  /// 每次 tick 都推理
  pub fn every_tick() -> Self {
    Self::new(Duration::ZERO)
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn ready(&self, now: Instant) -> bool {
    match self.last {
      Some(last) => now.saturating_duration_since(last) >= self.interval,
      None => true,
    }
  }

  pub fn mark(&mut self, now: Instant) {
    self.last = Some(now);
  }
}

/// 运行期控制消息
#[derive(Debug, Clone)]
pub enum ControlMessage {
  SetMode(TransformMode),
  SwapModel(ModelDescriptor),
  SetPalette(Palette),
  SetDisplay(DisplaySize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// 上一周期仍在进行
  Busy,
  /// 未到推理间隔
  Cadence,
  /// 输入源暂无帧
  NoFrame,
}

#[derive(Debug)]
pub enum Tick {
  /// 完成一个推理周期，附带本周期使用的模型输入帧
  Completed {
    frame: RgbaFrame,
    timings: CycleTimings,
  },
  Skipped(SkipReason),
  /// 输入源已结束
  Closed,
}

/// 流水线中的推理阶段，保存最近一次的结果
pub trait InferenceStage {
  type Output;

  fn snapshot(&self) -> &ModelSnapshot;

  /// 执行一次推理并更新最近结果
  fn run(&mut self, frame: &RgbaFrame) -> Result<CycleTimings, PipelineError>;

  fn latest(&self) -> Option<&Self::Output>;

  fn swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, PipelineError>;

  fn set_palette(&mut self, _palette: Palette) {
    warn!("当前任务不使用调色板, 忽略");
  }

  fn set_display(&mut self, _display: DisplaySize) {
    warn!("当前任务不使用显示尺寸, 忽略");
  }
}

pub struct SegmentationStage<L: BackendLoader> {
  model: SegmentationModel<L>,
  latest: Option<SegmentationInference>,
}

impl<L: BackendLoader> SegmentationStage<L> {
  pub fn new(model: SegmentationModel<L>) -> Self {
    Self {
      model,
      latest: None,
    }
  }

  pub fn model(&self) -> &SegmentationModel<L> {
    &self.model
  }
}

impl<L: BackendLoader> InferenceStage for SegmentationStage<L> {
  type Output = SegmentationInference;

  fn snapshot(&self) -> &ModelSnapshot {
    self.model.snapshot()
  }

  fn run(&mut self, frame: &RgbaFrame) -> Result<CycleTimings, PipelineError> {
    let result = self.model.infer(frame)?;
    let timings = result.timings;
    self.latest = Some(result);
    Ok(timings)
  }

  fn latest(&self) -> Option<&Self::Output> {
    self.latest.as_ref()
  }

  fn swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, PipelineError> {
    let snapshot = self.model.swap(descriptor)?;
    self.latest = None;
    Ok(snapshot)
  }

  fn set_palette(&mut self, palette: Palette) {
    info!("更新调色板: {} 个类别", palette.num_classes());
    self.model.set_palette(palette);
  }
}

/// 检测叠加层：显示空间中的检测框及本周期计时
#[derive(Debug, Default)]
pub struct DetectionOverlay {
  pool: BoxPool,
  display: Option<DisplaySize>,
  timings: CycleTimings,
}

impl DetectionOverlay {
  pub fn boxes(&self) -> &[BoundingBox] {
    self.pool.active()
  }

  pub fn display(&self) -> Option<DisplaySize> {
    self.display
  }

  pub fn timings(&self) -> CycleTimings {
    self.timings
  }

  /// 隐藏上一周期的框并写入本周期的框，返回可见数量
  pub fn decode(&mut self, decoder: &DetectionDecoder, boxes: &[ModelBox]) -> Result<usize, DecodeError> {
    let visible = decoder.decode_into(boxes, &mut self.pool)?;
    self.display = Some(decoder.display());
    Ok(visible)
  }
}

pub struct DetectionStage<L: BackendLoader> {
  model: DetectionModel<L>,
  decoder: DetectionDecoder,
  overlay: DetectionOverlay,
}

impl<L: BackendLoader> DetectionStage<L> {
  pub fn new(model: DetectionModel<L>, mut decoder: DetectionDecoder) -> Self {
    let shape = model.snapshot().shape;
    decoder.set_model_size(shape.width, shape.height);
    Self {
      model,
      decoder,
      overlay: DetectionOverlay::default(),
    }
  }

  pub fn model(&self) -> &DetectionModel<L> {
    &self.model
  }

  pub fn decoder(&self) -> &DetectionDecoder {
    &self.decoder
  }
}

impl<L: BackendLoader> InferenceStage for DetectionStage<L> {
  type Output = DetectionOverlay;

  fn snapshot(&self) -> &ModelSnapshot {
    self.model.snapshot()
  }

  fn run(&mut self, frame: &RgbaFrame) -> Result<CycleTimings, PipelineError> {
    let result = self.model.infer(frame)?;

    let start = Instant::now();
    let visible = self.overlay.decode(&self.decoder, &result.boxes)?;
    let mut timings = result.timings;
    timings.draw += start.elapsed();

    debug!("检测到 {} 个目标, 显示 {} 个", result.boxes.len(), visible);
    self.overlay.timings = timings;
    Ok(timings)
  }

  fn latest(&self) -> Option<&Self::Output> {
    self.overlay.display.map(|_| &self.overlay)
  }

  fn swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, PipelineError> {
    let snapshot = self.model.swap(descriptor)?;
    self.decoder.set_model_size(snapshot.shape.width, snapshot.shape.height);
    self.overlay.pool.hide_all();
    Ok(snapshot)
  }

  fn set_display(&mut self, size: DisplaySize) {
    info!("更新显示尺寸: {}x{}", size.width, size.height);
    self.decoder.set_display(size);
  }
}

pub struct Pipeline<S, St> {
  source: S,
  stage: St,
  transform: FrameTransform,
  flight: SingleFlight,
  cadence: Cadence,
  control_tx: Sender<ControlMessage>,
  control_rx: Receiver<ControlMessage>,
  pending_swap: Option<ModelDescriptor>,
  cycles: u64,
}

impl<S: FrameSource, St: InferenceStage> Pipeline<S, St> {
  pub fn new(
    source: S,
    stage: St,
    config: TransformConfig,
    cadence: Cadence,
  ) -> Result<Self, PipelineError> {
    let transform = FrameTransform::new(config, &stage.snapshot().shape);
    if let Some((width, height)) = source.dimensions() {
      transform.validate_source(width, height)?;
    }

    let (control_tx, control_rx) = channel();
    Ok(Self {
      source,
      stage,
      transform,
      flight: SingleFlight::new(),
      cadence,
      control_tx,
      control_rx,
      pending_swap: None,
      cycles: 0,
    })
  }

  /// 控制消息发送端，可跨线程使用
  pub fn control_channel(&self) -> Sender<ControlMessage> {
    self.control_tx.clone()
  }

  pub fn flight(&self) -> SingleFlight {
    self.flight.clone()
  }

  pub fn stage(&self) -> &St {
    &self.stage
  }

  pub fn transform(&self) -> &FrameTransform {
    &self.transform
  }

  pub fn latest(&self) -> Option<&St::Output> {
    self.stage.latest()
  }

  pub fn cycles(&self) -> u64 {
    self.cycles
  }

  pub fn has_pending_swap(&self) -> bool {
    self.pending_swap.is_some()
  }

  /// 替换模型。门控被占用时延后到下一次空闲的 `tick`，此时返回 `None`。
  pub fn swap_model(
    &mut self,
    descriptor: ModelDescriptor,
  ) -> Result<Option<ModelSnapshot>, PipelineError> {
    match self.flight.try_acquire() {
      Some(_guard) => self.apply_swap(&descriptor).map(Some),
      None => {
        info!("推理进行中, 模型 {} 的切换延后执行", descriptor.name);
        self.pending_swap = Some(descriptor);
        Ok(None)
      }
    }
  }

  fn apply_swap(&mut self, descriptor: &ModelDescriptor) -> Result<ModelSnapshot, PipelineError> {
    let snapshot = self.stage.swap(descriptor)?;
    self.transform.retarget(&snapshot.shape);
    if let Some((width, height)) = self.source.dimensions()
      && let Err(e) = self.transform.validate_source(width, height)
    {
      warn!("新模型与输入源尺寸不兼容: {}", e);
    }
    info!("模型已切换: {} (第 {} 代)", snapshot.name, snapshot.generation);
    Ok(snapshot)
  }

  fn drain_control(&mut self) {
    while let Ok(message) = self.control_rx.try_recv() {
      debug!("收到控制消息: {:?}", message);
      match message {
        ControlMessage::SetMode(mode) => self.transform.set_mode(mode),
        ControlMessage::SwapModel(descriptor) => self.pending_swap = Some(descriptor),
        ControlMessage::SetPalette(palette) => self.stage.set_palette(palette),
        ControlMessage::SetDisplay(display) => self.stage.set_display(display),
      }
    }
  }

  /// 执行至多一个推理周期
  pub fn tick(&mut self, now: Instant) -> Result<Tick, PipelineError> {
    let Some(_guard) = self.flight.try_acquire() else {
      debug!("上一周期仍在进行, 跳过");
      return Ok(Tick::Skipped(SkipReason::Busy));
    };

    self.drain_control();
    if let Some(descriptor) = self.pending_swap.take()
      && let Err(e) = self.apply_swap(&descriptor)
    {
      error!(
        "模型 {} 切换失败, 继续使用 {}: {}",
        descriptor.name,
        self.stage.snapshot().name,
        e
      );
    }

    if !self.cadence.ready(now) {
      return Ok(Tick::Skipped(SkipReason::Cadence));
    }

    let frame = match self.source.poll_frame()? {
      FramePoll::Ready(frame) => frame,
      FramePoll::Pending => return Ok(Tick::Skipped(SkipReason::NoFrame)),
      FramePoll::Closed => return Ok(Tick::Closed),
    };
    self.cadence.mark(now);

    let index = frame.index();
    let rgba = self.transform.apply(frame)?;
    let timings = self.stage.run(&rgba)?;
    self.cycles += 1;
    debug!("第 {} 帧推理完成: {}", index, timings);

    Ok(Tick::Completed {
      frame: rgba,
      timings,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guard_releases_on_drop() {
    let flight = SingleFlight::new();
    let guard = flight.try_acquire();
    assert!(guard.is_some());
    assert!(flight.is_busy());
    assert!(flight.try_acquire().is_none());
    drop(guard);
    assert!(!flight.is_busy());
    assert!(flight.try_acquire().is_some());
  }

  #[test]
  fn cadence_waits_for_interval() {
    let start = Instant::now();
    let mut cadence = Cadence::new(SEGMENTATION_INTERVAL);
    assert!(cadence.ready(start));
    cadence.mark(start);
    assert!(!cadence.ready(start + Duration::from_millis(100)));
    assert!(cadence.ready(start + Duration::from_millis(190)));
  }

  #[test]
  fn every_tick_is_always_ready() {
    let now = Instant::now();
    let mut cadence = Cadence::every_tick();
    cadence.mark(now);
    assert!(cadence.ready(now));
  }
}
