// 该文件是 Tianmu （天目） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use url::Url;

use tianmu::transform::{Rotation, TransformConfig, TransformMode};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
  /// 语义分割
  Segmentation,
  /// 目标检测
  Detection,
}

/// 四分之一圈旋转，`none` 关闭摄像头默认的顺时针旋转
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateArg {
  Cw,
  Ccw,
  None,
}

impl RotateArg {
  fn rotation(self) -> Option<Rotation> {
    match self {
      RotateArg::Cw => Some(Rotation::Clockwise),
      RotateArg::Ccw => Some(Rotation::CounterClockwise),
      RotateArg::None => None,
    }
  }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  OneShot,
  RepeatShot,
  Continuous,
}

/// Tianmu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理任务
  #[arg(long, value_enum, default_value = "segmentation")]
  pub task: TaskKind,

  /// 运行方式
  #[arg(long, value_enum, default_value = "continuous")]
  pub run: RunMode,

  /// 模型，例如 onnx:///models/deeplab.onnx?device=gpu
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源：image://、gst://camera、gst://file、v4l://
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出：image://、folder://、log://
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  /// 帧变换方式 cutout|scaled，默认摄像头裁剪、视频缩放
  #[arg(long, value_name = "MODE")]
  pub transform: Option<TransformMode>,

  /// 是否水平镜像，默认仅摄像头镜像
  #[arg(long, value_name = "BOOL")]
  pub mirror: Option<bool>,

  /// 四分之一圈旋转 cw|ccw|none，默认仅摄像头顺时针旋转
  #[arg(long, value_enum, value_name = "DIRECTION")]
  pub rotate: Option<RotateArg>,

  /// 最小推理间隔（毫秒），分割默认 190，检测默认每帧
  #[arg(long, value_name = "MS")]
  pub interval: Option<u64>,

  /// 分割调色板 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub palette: Option<PathBuf>,

  /// 检测标签文件，每行一个
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 类别索引超出标签范围时报错而不是使用 unknown
  #[arg(long)]
  pub strict_labels: bool,

  /// 检测分数阈值
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub score_threshold: f32,

  /// NMS IoU 阈值
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// NMS 后保留的最大框数
  #[arg(long, default_value = "64", value_name = "COUNT")]
  pub max_output_boxes: usize,

  /// 检测原始输出为 [1, N, 4+C] 排布，默认 [1, 4+C, N]
  #[arg(long)]
  pub anchors_first: bool,

  /// 每周期显示的最大框数
  #[arg(long, default_value = "200", value_name = "COUNT")]
  pub max_boxes: usize,

  /// 显示区域宽度，默认等于模型输入宽度
  #[arg(long, value_name = "WIDTH")]
  pub display_width: Option<f32>,

  /// 显示区域高度，默认等于模型输入高度
  #[arg(long, value_name = "HEIGHT")]
  pub display_height: Option<f32>,

  /// ONNX Runtime 线程数
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,

  /// 重复推理次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub repeat: usize,

  /// 连续推理的最大帧数
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

impl Args {
  fn is_camera(&self) -> bool {
    match self.input.scheme() {
      "v4l" => true,
      "gst" => self.input.host_str() == Some("camera"),
      _ => false,
    }
  }

  pub fn transform_config(&self) -> TransformConfig {
    let base = if self.is_camera() {
      TransformConfig::camera()
    } else {
      TransformConfig::video()
    };
    let mode = self.transform.unwrap_or(base.mode);
    let mirror = self.mirror.unwrap_or(base.mirror);
    let rotation = self.rotate.map_or(base.rotation, RotateArg::rotation);
    base
      .with_mode(mode)
      .with_mirror(mirror)
      .with_rotation(rotation)
  }
}
