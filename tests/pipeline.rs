// 该文件是 Tianmu （天目） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use tianmu::{
  decode::{DetectionDecoder, DisplaySize, LabelList, SegmentationDecoder},
  frame::{Frame, PixelFormat},
  input::{ChannelSource, FrameSender},
  model::{
    Backend, BackendLoader, DetectionGraph, DetectionModel, Dim, EngineError, ModelDescriptor,
    ModelError, SegmentationModel,
  },
  pipeline::{
    Cadence, ControlMessage, DetectionStage, InferenceStage, Pipeline, SkipReason,
    SegmentationStage, Tick,
  },
  tensor::{Device, Tensor},
  transform::{TransformConfig, TransformMode},
};

#[derive(Debug, thiserror::Error)]
#[error("mock backend: {0}")]
struct MockError(String);

#[derive(Clone)]
enum MockOutput {
  /// 类别 1 在每个像素上得分最高
  Segmentation { classes: usize },
  /// 固定的原始检测输出
  Detection { shape: Vec<usize>, data: Vec<f32> },
}

#[derive(Clone)]
struct MockLoader {
  signatures: HashMap<PathBuf, Vec<Dim>>,
  output: MockOutput,
  live: Arc<AtomicUsize>,
  loads: Arc<AtomicUsize>,
}

impl MockLoader {
  fn new(output: MockOutput) -> Self {
    Self {
      signatures: HashMap::new(),
      output,
      live: Arc::new(AtomicUsize::new(0)),
      loads: Arc::new(AtomicUsize::new(0)),
    }
  }

  fn with_model(mut self, path: &str, signature: Vec<Dim>) -> Self {
    self.signatures.insert(PathBuf::from(path), signature);
    self
  }
}

struct MockBackend {
  signature: Vec<Dim>,
  output: MockOutput,
  live: Arc<AtomicUsize>,
}

impl Drop for MockBackend {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

impl BackendLoader for MockLoader {
  type Backend = MockBackend;

  fn load(&mut self, descriptor: &ModelDescriptor) -> Result<MockBackend, MockError> {
    let signature = self
      .signatures
      .get(&descriptor.path)
      .cloned()
      .ok_or_else(|| MockError(format!("unknown model {}", descriptor.path.display())))?;
    // 上一个后端必须已经释放
    assert_eq!(self.live.load(Ordering::SeqCst), 0);
    self.live.fetch_add(1, Ordering::SeqCst);
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(MockBackend {
      signature,
      output: self.output.clone(),
      live: Arc::clone(&self.live),
    })
  }
}

impl Backend for MockBackend {
  type Error = MockError;

  fn input_signature(&self) -> Vec<Dim> {
    self.signature.clone()
  }

  fn device(&self) -> Device {
    Device::Cpu
  }

  fn forward(&mut self, input: &Tensor<f32>) -> Result<Vec<Tensor<f32>>, MockError> {
    let tensor = match &self.output {
      MockOutput::Segmentation { classes } => {
        let (h, w) = match input.shape() {
          [1, h, w, _] => (*h, *w),
          other => return Err(MockError(format!("unexpected input {:?}", other))),
        };
        let mut data = vec![0f32; h * w * classes];
        for p in 0..h * w {
          data[p * classes + 1] = 1.0;
        }
        Tensor::from_shape_vec(&[1, h, w, *classes], data)
      }
      MockOutput::Detection { shape, data } => Tensor::from_shape_vec(shape, data.clone()),
    };
    tensor
      .map(|t| vec![t])
      .map_err(|e| MockError(e.to_string()))
  }

  fn download(&mut self, tensor: Tensor<f32>) -> Result<Tensor<f32>, MockError> {
    Ok(tensor)
  }
}

fn nhwc(h: usize, w: usize) -> Vec<Dim> {
  vec![Dim::Fixed(1), Dim::Fixed(h), Dim::Fixed(w), Dim::Fixed(3)]
}

fn frame(width: u32, height: u32) -> Frame {
  Frame::new(
    width,
    height,
    PixelFormat::Rgba8,
    vec![128; (width * height * 4) as usize],
  )
  .unwrap()
}

fn segmentation_pipeline(
  loader: MockLoader,
  cadence: Cadence,
) -> (
  FrameSender,
  Pipeline<ChannelSource, SegmentationStage<MockLoader>>,
) {
  let descriptor = ModelDescriptor::new("a.onnx", Device::Cpu);
  let model = SegmentationModel::new(loader, &descriptor, SegmentationDecoder::default()).unwrap();
  let (tx, source) = ChannelSource::new(Some((64, 48)));
  let pipeline = Pipeline::new(
    source,
    SegmentationStage::new(model),
    TransformConfig::video(),
    cadence,
  )
  .unwrap();
  (tx, pipeline)
}

fn two_model_loader() -> MockLoader {
  MockLoader::new(MockOutput::Segmentation { classes: 3 })
    .with_model("a.onnx", nhwc(32, 32))
    .with_model("b.onnx", nhwc(16, 24))
}

#[test]
fn swap_keeps_single_backend_and_retargets() {
  let loader = two_model_loader();
  let (live, loads) = (Arc::clone(&loader.live), Arc::clone(&loader.loads));
  let (tx, mut pipeline) = segmentation_pipeline(loader, Cadence::every_tick());
  assert_eq!(live.load(Ordering::SeqCst), 1);

  let snapshot = pipeline
    .swap_model(ModelDescriptor::new("b.onnx", Device::Cpu))
    .unwrap()
    .expect("gate is idle, swap applies immediately");
  assert_eq!((snapshot.shape.width, snapshot.shape.height), (24, 16));
  assert_eq!(snapshot.generation, 2);
  assert_eq!(live.load(Ordering::SeqCst), 1);
  assert_eq!(loads.load(Ordering::SeqCst), 2);
  assert_eq!(pipeline.transform().target(), (24, 16));

  tx.send(frame(64, 48)).unwrap();
  match pipeline.tick(Instant::now()).unwrap() {
    Tick::Completed { frame, .. } => assert_eq!((frame.width(), frame.height()), (24, 16)),
    other => panic!("unexpected tick: {:?}", other),
  }
  let latest = pipeline.latest().unwrap();
  assert_eq!(
    (latest.class_map.width(), latest.class_map.height()),
    (24, 16)
  );
  assert_eq!(latest.class_map.get(0, 0), 1);
}

#[test]
fn busy_gate_skips_tick_and_defers_swap() {
  let (tx, mut pipeline) = segmentation_pipeline(two_model_loader(), Cadence::every_tick());
  tx.send(frame(64, 48)).unwrap();

  let flight = pipeline.flight();
  let guard = flight.try_acquire().unwrap();
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Skipped(SkipReason::Busy)
  ));
  assert_eq!(pipeline.cycles(), 0);

  let deferred = pipeline
    .swap_model(ModelDescriptor::new("b.onnx", Device::Cpu))
    .unwrap();
  assert!(deferred.is_none());
  assert!(pipeline.has_pending_swap());
  assert_eq!(pipeline.stage().snapshot().generation, 1);

  drop(guard);
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Completed { .. }
  ));
  assert!(!pipeline.has_pending_swap());
  assert_eq!(pipeline.stage().snapshot().generation, 2);
  assert!(!flight.is_busy());
}

#[test]
fn missing_frame_skips_and_closed_source_ends() {
  let (tx, mut pipeline) = segmentation_pipeline(two_model_loader(), Cadence::every_tick());
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Skipped(SkipReason::NoFrame)
  ));
  assert!(pipeline.latest().is_none());

  drop(tx);
  assert!(matches!(pipeline.tick(Instant::now()).unwrap(), Tick::Closed));
}

#[test]
fn cadence_limits_inference_rate() {
  let (tx, mut pipeline) = segmentation_pipeline(
    two_model_loader(),
    Cadence::new(Duration::from_millis(190)),
  );
  for _ in 0..3 {
    tx.send(frame(64, 48)).unwrap();
  }

  let start = Instant::now();
  assert!(matches!(pipeline.tick(start).unwrap(), Tick::Completed { .. }));
  assert!(matches!(
    pipeline.tick(start + Duration::from_millis(100)).unwrap(),
    Tick::Skipped(SkipReason::Cadence)
  ));
  assert!(matches!(
    pipeline.tick(start + Duration::from_millis(200)).unwrap(),
    Tick::Completed { .. }
  ));
  assert_eq!(pipeline.cycles(), 2);
}

#[test]
fn control_messages_apply_on_next_tick() {
  let (_tx, mut pipeline) = segmentation_pipeline(two_model_loader(), Cadence::every_tick());
  let control = pipeline.control_channel();
  control
    .send(ControlMessage::SetMode(TransformMode::Cutout))
    .unwrap();
  control
    .send(ControlMessage::SwapModel(ModelDescriptor::new(
      "b.onnx",
      Device::Cpu,
    )))
    .unwrap();
  assert_eq!(pipeline.transform().mode(), TransformMode::Scaled);

  pipeline.tick(Instant::now()).unwrap();
  assert_eq!(pipeline.transform().mode(), TransformMode::Cutout);
  assert_eq!(pipeline.stage().snapshot().name, "b");
}

#[test]
fn failed_swap_restores_previous_model() {
  let loader = two_model_loader().with_model(
    "dynamic.onnx",
    vec![
      Dim::Fixed(1),
      Dim::Symbolic("height".to_string()),
      Dim::Fixed(32),
      Dim::Fixed(3),
    ],
  );
  let live = Arc::clone(&loader.live);
  let (tx, mut pipeline) = segmentation_pipeline(loader, Cadence::every_tick());

  for path in ["missing.onnx", "dynamic.onnx"] {
    let result = pipeline.swap_model(ModelDescriptor::new(path, Device::Cpu));
    assert!(result.is_err(), "{} should fail", path);
    assert_eq!(live.load(Ordering::SeqCst), 1);
    assert!(pipeline.stage().model().engine().is_loaded());
    let snapshot = pipeline.stage().snapshot();
    assert_eq!((snapshot.name.as_str(), snapshot.generation), ("a", 1));
    assert_eq!(pipeline.transform().target(), (32, 32));
  }

  tx.send(frame(64, 48)).unwrap();
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Completed { .. }
  ));
}

#[test]
fn failed_deferred_swap_keeps_pipeline_running() {
  let (tx, mut pipeline) = segmentation_pipeline(two_model_loader(), Cadence::every_tick());
  pipeline
    .control_channel()
    .send(ControlMessage::SwapModel(ModelDescriptor::new(
      "missing.onnx",
      Device::Cpu,
    )))
    .unwrap();

  tx.send(frame(64, 48)).unwrap();
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Completed { .. }
  ));
  assert!(!pipeline.has_pending_swap());
  assert_eq!(pipeline.stage().snapshot().name, "a");
}

#[test]
fn symbolic_input_is_unsupported() {
  let loader = MockLoader::new(MockOutput::Segmentation { classes: 3 }).with_model(
    "dynamic.onnx",
    vec![
      Dim::Fixed(1),
      Dim::Symbolic("height".to_string()),
      Dim::Symbolic("width".to_string()),
      Dim::Fixed(3),
    ],
  );
  let live = Arc::clone(&loader.live);
  let descriptor = ModelDescriptor::new("dynamic.onnx", Device::Cpu);

  let result = SegmentationModel::new(loader, &descriptor, SegmentationDecoder::default());
  assert!(matches!(
    result,
    Err(ModelError::Engine(EngineError::UnsupportedShape(_)))
  ));
  assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn detection_boxes_are_centered_in_display_space() {
  // [1, 4+2, 8]：锚点 0 位于模型中心，类别 0 分数 0.9
  let (features, anchors) = (6, 8);
  let mut data = vec![0f32; features * anchors];
  let anchor = [320.0, 320.0, 64.0, 32.0, 0.9, 0.1];
  for (f, value) in anchor.iter().enumerate() {
    data[f * anchors] = *value;
  }
  let loader = MockLoader::new(MockOutput::Detection {
    shape: vec![1, features, anchors],
    data,
  })
  .with_model("yolo.onnx", nhwc(640, 640));

  let descriptor = ModelDescriptor::new("yolo.onnx", Device::Cpu);
  let model = DetectionModel::new(loader, &descriptor, DetectionGraph::default()).unwrap();
  let decoder = DetectionDecoder::new(
    LabelList::coco(),
    (640, 640),
    DisplaySize::new(1280.0, 720.0),
  );
  let (tx, source) = ChannelSource::new(Some((640, 640)));
  let mut pipeline = Pipeline::new(
    source,
    DetectionStage::new(model, decoder),
    TransformConfig::video(),
    Cadence::every_tick(),
  )
  .unwrap();

  tx.send(frame(640, 640)).unwrap();
  assert!(matches!(
    pipeline.tick(Instant::now()).unwrap(),
    Tick::Completed { .. }
  ));

  let overlay = pipeline.latest().unwrap();
  let boxes = overlay.boxes();
  assert_eq!(boxes.len(), 1);
  let b = &boxes[0];
  assert_eq!(b.label, "person");
  assert!(b.center_x.abs() < 1e-3);
  assert!(b.center_y.abs() < 1e-3);
  assert!((b.width - 128.0).abs() < 1e-3);
  assert!((b.height - 36.0).abs() < 1e-3);
  assert!((b.score - 0.9).abs() < 1e-6);

  pipeline
    .control_channel()
    .send(ControlMessage::SetDisplay(DisplaySize::new(640.0, 360.0)))
    .unwrap();
  tx.send(frame(640, 640)).unwrap();
  pipeline.tick(Instant::now()).unwrap();
  assert_eq!(
    pipeline.stage().decoder().display(),
    DisplaySize::new(640.0, 360.0)
  );
  let b = &pipeline.latest().unwrap().boxes()[0];
  assert!((b.width - 64.0).abs() < 1e-3);
  assert!((b.height - 18.0).abs() < 1e-3);
}

#[test]
fn oversized_cutout_is_rejected() {
  let descriptor = ModelDescriptor::new("a.onnx", Device::Cpu);
  let model =
    SegmentationModel::new(two_model_loader(), &descriptor, SegmentationDecoder::default()).unwrap();
  let (_tx, source) = ChannelSource::new(Some((16, 16)));
  let result = Pipeline::new(
    source,
    SegmentationStage::new(model),
    TransformConfig::camera(),
    Cadence::every_tick(),
  );
  assert!(result.is_err());
}
