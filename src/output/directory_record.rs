// 该文件是 Tianmu （天目） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::PathBuf,
  sync::{Arc, Mutex},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbaFrame,
  output::{Overlay, Render, draw::Draw, opacity_from_query},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录保存叠加后的图像和同名 JSON 记录。
///
/// `folder:///var/tianmu?always` 时即使结果为空也保存；
/// `?raw` 时保存未叠加的原始帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
  raw: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let raw = uri.query_pairs().any(|(k, _)| k == "raw");
    let mut draw = Draw::default();
    if let Some(opacity) = opacity_from_query(uri) {
      draw = draw.with_opacity(opacity);
    }

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(crate::decode_url_path(uri)),
      draw,
      frame_counters: Arc::new(Mutex::new(0)),
      always,
      raw,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = match self.frame_counters.lock() {
      Ok(counter) => counter,
      Err(poisoned) => poisoned.into_inner(),
    };
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<O: Overlay> Render<RgbaFrame, O> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbaFrame, result: &O) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    let image = if self.raw {
      frame.image().clone()
    } else {
      result.draw_on(&self.draw, frame)
    };
    image.save(&path)?;
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_vec_pretty(&result.record())?,
    )?;
    debug!("记录结果到: {}", path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_flags_parsed() {
    let url = url::Url::parse("folder:///tmp/records?always&raw&opacity=0.2").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert!(output.always);
    assert!(output.raw);
    assert_eq!(output.directory, PathBuf::from("/tmp/records"));
    assert!((output.draw.opacity() - 0.2).abs() < 1e-6);
  }

  #[test]
  fn frame_ids_increment() {
    let url = url::Url::parse("folder:///tmp/records").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.frame_id(), 1);
    assert_eq!(output.frame_id(), 2);
  }
}
