// 该文件是 Tianmu （天目） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 分割模型重复推理基准
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use tianmu::{
  FromUrl,
  decode::SegmentationDecoder,
  input::InputWrapper,
  model::{ModelDescriptor, OrtLoader, SegmentationModel},
  output::OutputWrapper,
  pipeline::{Cadence, Pipeline, SegmentationStage},
  task::{RepeatShotTask, Task},
  transform::TransformConfig,
};

/// 对同一张图像重复执行分割推理并统计平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value = "1000")]
  pub repeat: usize,
  /// 每次推理后都渲染输出
  #[arg(long)]
  pub render: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let mut args = Args::parse();

  if !args.input.query_pairs().any(|(k, _)| k == "loop") {
    args.input.query_pairs_mut().append_key_only("loop");
  }

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let descriptor = ModelDescriptor::from_url(&args.model)?;
  let model = SegmentationModel::new(OrtLoader::default(), &descriptor, SegmentationDecoder::default())?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let pipeline = Pipeline::new(
    input,
    SegmentationStage::new(model),
    TransformConfig::video(),
    Cadence::every_tick(),
  )?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .with_render(args.render)
    .run_task(pipeline, output)?;

  Ok(())
}
