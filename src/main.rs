// 该文件是 Tianmu （天目） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tianmu::{
  FromUrl,
  decode::{DetectionDecoder, DisplaySize, LabelList, LabelPolicy, Palette, SegmentationDecoder},
  input::InputWrapper,
  model::{
    DetectionGraph, DetectionModel, ModelDescriptor, OrtLoader, RawLayout, SegmentationModel,
  },
  output::{Overlay, OutputWrapper},
  pipeline::{
    Cadence, DetectionStage, InferenceStage, Pipeline, SEGMENTATION_INTERVAL, SegmentationStage,
  },
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
};

use args::{Args, RunMode, TaskKind};

fn run<St>(args: &Args, pipeline: Pipeline<InputWrapper, St>, output: OutputWrapper) -> Result<()>
where
  St: InferenceStage,
  St::Output: Overlay,
{
  match args.run {
    RunMode::OneShot => OneShotTask.run_task(pipeline, output),
    RunMode::RepeatShot => RepeatShotTask::default()
      .with_repeat(args.repeat)
      .run_task(pipeline, output),
    RunMode::Continuous => ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .run_task(pipeline, output),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("任务: {:?}, 运行方式: {:?}", args.task, args.run);
  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let descriptor = ModelDescriptor::from_url(&args.model)?;
  let mut loader = OrtLoader::default();
  if let Some(threads) = args.threads {
    loader = loader.with_intra_threads(threads);
  }

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let config = args.transform_config();
  info!("帧变换: {:?}", config);

  match args.task {
    TaskKind::Segmentation => {
      let palette = match &args.palette {
        Some(path) => Palette::from_file(path)?,
        None => Palette::default(),
      };
      let model = SegmentationModel::new(loader, &descriptor, SegmentationDecoder::new(palette))?;
      let cadence = Cadence::new(
        args
          .interval
          .map(Duration::from_millis)
          .unwrap_or(SEGMENTATION_INTERVAL),
      );
      let pipeline = Pipeline::new(input, SegmentationStage::new(model), config, cadence)?;
      run(&args, pipeline, output)
    }
    TaskKind::Detection => {
      let graph = DetectionGraph {
        score_threshold: args.score_threshold,
        iou_threshold: args.iou_threshold,
        max_output_boxes: args.max_output_boxes,
        layout: if args.anchors_first {
          RawLayout::AnchorsFirst
        } else {
          RawLayout::FeaturesFirst
        },
      };
      let model = DetectionModel::new(loader, &descriptor, graph)?;
      let shape = model.snapshot().shape;
      let display = DisplaySize::new(
        args.display_width.unwrap_or(shape.width as f32),
        args.display_height.unwrap_or(shape.height as f32),
      );
      let labels = match &args.labels {
        Some(path) => LabelList::from_file(path)?,
        None => LabelList::coco(),
      };
      let policy = if args.strict_labels {
        LabelPolicy::Strict
      } else {
        LabelPolicy::Unknown
      };
      let decoder = DetectionDecoder::new(labels, (shape.width, shape.height), display)
        .with_max_boxes(args.max_boxes)
        .with_policy(policy);
      let cadence = args
        .interval
        .map(|ms| Cadence::new(Duration::from_millis(ms)))
        .unwrap_or_else(Cadence::every_tick);
      let pipeline = Pipeline::new(input, DetectionStage::new(model, decoder), config, cadence)?;
      run(&args, pipeline, output)
    }
  }
}
