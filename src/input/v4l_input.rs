// 该文件是 Tianmu （天目） 项目的一部分。
// src/input/v4l_input.rs - V4L 视频输入
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
  io::ErrorKind,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
  input::{FramePoll, FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("采集缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

const BUFFER_COUNT: u32 = 4;
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// V4L2 摄像头输入，例如 `v4l:///dev/video0?width=640&height=480`。
///
/// 设备被协商为 RGB3 格式，mmap 流在整个生命周期内保持打开。
pub struct V4lInput {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  index: u64,
  started: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let path = crate::decode_url_path(url);
    let device_path = if path.is_empty() || path == "/" {
      "/dev/video0".to_string()
    } else {
      path
    };

    let device = Device::with_path(&device_path)?;
    let mut format = device.format()?;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => format.width = value.parse().unwrap_or(format.width),
        "height" => format.height = value.parse().unwrap_or(format.height),
        _ => {}
      }
    }
    format.fourcc = FourCC::new(b"RGB3");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"RGB3") {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }
    info!(
      "打开 V4L 设备: {} ({}x{})",
      device_path, format.width, format.height
    );

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    stream.set_timeout(POLL_TIMEOUT);

    Ok(V4lInput {
      stream,
      width: format.width,
      height: format.height,
      index: 0,
      started: Instant::now(),
    })
  }
}

impl V4lInput {
  fn capture_frame(&mut self) -> Result<Option<Vec<u8>>, V4lInputError> {
    let (buf, meta) = match self.stream.next() {
      Ok(captured) => captured,
      Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
        return Ok(None);
      }
      Err(e) => return Err(e.into()),
    };

    let expected = (self.width * self.height * 3) as usize;
    let used = (meta.bytesused as usize).min(buf.len());
    if used < expected {
      return Err(V4lInputError::BufferSizeMismatch {
        expected,
        actual: used,
      });
    }
    Ok(Some(buf[..expected].to_vec()))
  }
}

impl FrameSource for V4lInput {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError> {
    let Some(data) = self.capture_frame()? else {
      return Ok(FramePoll::Pending);
    };
    self.index += 1;
    let timestamp = self.started.elapsed().as_millis() as u64;
    let frame = Frame::new(self.width, self.height, PixelFormat::Rgb8, data)?;
    Ok(FramePoll::Ready(frame.with_index(self.index, timestamp)))
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    Some((self.width, self.height))
  }
}
