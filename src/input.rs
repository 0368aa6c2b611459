// 该文件是 Tianmu （天目） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 一次非阻塞轮询的结果
#[derive(Debug)]
pub enum FramePoll {
  Ready(Frame),
  /// 暂无可用帧，本周期跳过
  Pending,
  /// 输入源已结束
  Closed,
}

pub trait FrameSource {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError>;

  /// 已知时返回源帧尺寸 (宽, 高)
  fn dimensions(&self) -> Option<(u32, u32)> {
    None
  }
}

mod channel_source;
pub use self::channel_source::{ChannelSource, FrameSender};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("帧错误: {0}")]
  FrameError(#[from] crate::frame::FrameError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4lInput(V4lInput),
  Channel(ChannelSource),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4lInput(input));
      }
    }
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl From<ChannelSource> for InputWrapper {
  fn from(source: ChannelSource) -> Self {
    InputWrapper::Channel(source)
  }
}

impl FrameSource for InputWrapper {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.poll_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.poll_frame(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.poll_frame(),
      InputWrapper::Channel(input) => input.poll_frame(),
    }
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.dimensions(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.dimensions(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.dimensions(),
      InputWrapper::Channel(input) => input.dimensions(),
    }
  }
}
