// 该文件是 Tianmu （天目） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FramePoll, FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 静态图像输入。`?loop` 时每次轮询都返回同一张图像，否则只返回一次。
pub struct ImageFileInput {
  image: Option<RgbaImage>,
  repeat: bool,
  index: u64,
  dimensions: (u32, u32),
  started: Instant,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = crate::decode_url_path(url);
    let image = ImageReader::open(&path)?.decode()?.to_rgba8();
    let repeat = url.query_pairs().any(|(k, _)| k == "loop");
    info!(
      "读取图像文件: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(ImageFileInput::from_image(image, repeat))
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbaImage, repeat: bool) -> Self {
    Self {
      dimensions: image.dimensions(),
      image: Some(image),
      repeat,
      index: 0,
      started: Instant::now(),
    }
  }
}

impl FrameSource for ImageFileInput {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError> {
    let image = if self.repeat {
      self.image.clone()
    } else {
      self.image.take()
    };

    Ok(match image {
      Some(image) => {
        self.index += 1;
        let timestamp = self.started.elapsed().as_millis() as u64;
        FramePoll::Ready(Frame::from(image).with_index(self.index, timestamp))
      }
      None => FramePoll::Closed,
    })
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    Some(self.dimensions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_shot_closes_after_first_frame() {
    let mut input = ImageFileInput::from_image(RgbaImage::new(4, 3), false);
    assert_eq!(input.dimensions(), Some((4, 3)));
    assert!(matches!(input.poll_frame().unwrap(), FramePoll::Ready(_)));
    assert!(matches!(input.poll_frame().unwrap(), FramePoll::Closed));
  }

  #[test]
  fn looped_image_repeats() {
    let mut input = ImageFileInput::from_image(RgbaImage::new(2, 2), true);
    for expected in 1..=3 {
      match input.poll_frame().unwrap() {
        FramePoll::Ready(frame) => assert_eq!(frame.index(), expected),
        other => panic!("unexpected poll result: {:?}", other),
      }
    }
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("folder:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
