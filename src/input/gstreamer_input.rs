// 该文件是 Tianmu （天目） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持两类来源：
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30`
//! - `gst://file/path/to/video.mp4`
//!
//! 可选参数 `rotate=90|180|270` 在管道中加入 `videoflip`，
//! `aspect=4:3` 加入 `aspectratiocrop`。
//!
//! 管道末端的 appsink 只保留最新的两帧，`poll_frame` 不会阻塞：
//! 没有新帧时返回 `FramePoll::Pending`，流结束时返回 `FramePoll::Closed`。

use std::{collections::HashMap, time::Instant};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
  input::{FramePoll, FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的 GStreamer 输入类型: {0:?}")]
  UnknownSource(Option<String>),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  AspectRatio {
    ratio: (u32, u32),
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;

#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  dimensions: Option<(u32, u32)>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn camera(mut self, device: &str, width: u32, height: u32, fps: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: device.to_string(),
      io_mode: None,
      format: "YUY2".to_string(),
      width,
      height,
      fps,
    });
    self.dimensions = Some((width, height));
    self
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  pub fn aspect_ratio(mut self, ratio: (u32, u32)) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::AspectRatio { ratio });
    // 裁剪后尺寸未知，等待第一帧
    self.dimensions = None;
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  fn camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    let width = parse("width").unwrap_or(DEFAULT_CAMERA_WIDTH);
    let height = parse("height").unwrap_or(DEFAULT_CAMERA_HEIGHT);

    let mut builder = Self::new();
    builder.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: parse("io-mode"),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| "YUY2".to_string()),
      width,
      height,
      fps: parse("fps").unwrap_or(DEFAULT_CAMERA_FPS),
    });
    builder.dimensions = Some((width, height));
    builder
  }

  fn file_pipeline(path: &str) -> Self {
    Self::new().file(path)
  }

  fn aspect(query: &HashMap<String, String>) -> Option<(u32, u32)> {
    let (w, h) = query.get("aspect")?.split_once(':')?;
    Some((w.parse().ok()?, h.parse().ok()?))
  }

  fn video_flip(&mut self, rotate: Option<&str>) {
    let method = match rotate {
      Some("90") => 1,
      Some("180") => 2,
      Some("270") => 3,
      _ => return,
    };
    self
      .items
      .push(GStreamerInputBuilderItem::VideoFlip { method });
    if method != 2 {
      self.dimensions = self.dimensions.map(|(w, h)| (h, w));
    }
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer 管道: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      dimensions: self.dimensions,
      index: 0,
      started: Instant::now(),
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = crate::decode_url_path(url);
    let mut builder = match url.host_str() {
      Some("camera") => Self::camera_pipeline(&path, &query),
      Some("file") => Self::file_pipeline(&path),
      other => {
        return Err(GStreamerInputError::UnknownSource(
          other.map(String::from),
        ));
      }
    };

    if let Some(ratio) = Self::aspect(&query) {
      builder = builder.aspect_ratio(ratio);
    }
    builder.video_flip(query.get("rotate").map(|s| s.as_ref()));

    Ok(builder.target_format("RGB"))
  }
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  dimensions: Option<(u32, u32)>,
  index: u64,
  started: Instant,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError> {
    let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) else {
      if self.appsink.is_eos() {
        info!("GStreamer 输入结束");
        return Ok(FramePoll::Closed);
      }
      return Ok(FramePoll::Pending);
    };

    let frame = convert_sample(&sample)?;
    self.dimensions = Some((frame.width(), frame.height()));
    self.index += 1;
    let timestamp = self.started.elapsed().as_millis() as u64;
    Ok(FramePoll::Ready(frame.with_index(self.index, timestamp)))
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    self.dimensions
  }
}

/// 按行拷贝，去掉 GStreamer 的行对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let format = match video_info.format() {
    gst_video::VideoFormat::Rgb => PixelFormat::Rgb8,
    gst_video::VideoFormat::Bgr => PixelFormat::Bgr8,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * 3;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height.max(1) - 1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  Frame::new(width as u32, height as u32, format, pixels)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}
