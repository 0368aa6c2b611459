// 该文件是 Tianmu （天目） 项目的一部分。
// src/output.rs - 输出定义
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

use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, frame::RgbaFrame, model::SegmentationInference, pipeline::DetectionOverlay,
  timing::CycleTimings,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

use self::draw::DrawOnFrame;

/// 可以输出的推理结果
pub trait Overlay: DrawOnFrame {
  /// 结果中没有可显示的内容
  fn is_empty(&self) -> bool;

  fn timings(&self) -> CycleTimings;

  fn summary(&self) -> String;

  fn record(&self) -> Value;
}

impl Overlay for SegmentationInference {
  fn is_empty(&self) -> bool {
    self.class_map.width() == 0 || self.class_map.height() == 0
  }

  fn timings(&self) -> CycleTimings {
    self.timings
  }

  fn summary(&self) -> String {
    format!(
      "分割 {}x{}, {}",
      self.class_map.width(),
      self.class_map.height(),
      self.timings
    )
  }

  fn record(&self) -> Value {
    let count = self.class_map.max_class().map_or(0, |c| c + 1);
    let classes = self
      .class_map
      .histogram(count)
      .into_iter()
      .enumerate()
      .filter(|(_, n)| *n > 0)
      .map(|(k, n)| json!({ "class": k, "pixels": n }))
      .collect::<Vec<_>>();
    json!({
      "width": self.class_map.width(),
      "height": self.class_map.height(),
      "classes": classes,
      "timings": self.timings,
    })
  }
}

impl Overlay for DetectionOverlay {
  fn is_empty(&self) -> bool {
    self.boxes().is_empty()
  }

  fn timings(&self) -> CycleTimings {
    DetectionOverlay::timings(self)
  }

  fn summary(&self) -> String {
    let labels = self
      .boxes()
      .iter()
      .map(|b| format!("{}({:.2})", b.label, b.score))
      .collect::<Vec<_>>()
      .join(", ");
    format!(
      "检测 {} 个目标 [{}], {}",
      self.boxes().len(),
      labels,
      DetectionOverlay::timings(self)
    )
  }

  fn record(&self) -> Value {
    json!({
      "display": self.display(),
      "boxes": self.boxes(),
      "timings": DetectionOverlay::timings(self),
    })
  }
}

/// 解析 `?opacity=0.6` 形式的不透明度参数
fn opacity_from_query(url: &Url) -> Option<f32> {
  url
    .query_pairs()
    .find(|(k, _)| k == "opacity")
    .and_then(|(_, v)| v.parse::<f32>().ok())
}

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "log_output")]
mod log_output;
#[cfg(feature = "log_output")]
pub use self::log_output::{LogOutput, LogOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "log_output")]
  #[error("日志输出错误: {0}")]
  LogOutputError(#[from] LogOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  #[cfg(feature = "log_output")]
  LogOutput(LogOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(any(
      feature = "save_image_file",
      feature = "directory_record",
      feature = "log_output"
    ))]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      #[cfg(feature = "log_output")]
      LogOutput::SCHEME => {
        let output = LogOutput::from_url(url)?;
        Ok(OutputWrapper::LogOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<O: Overlay> Render<RgbaFrame, O> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbaFrame, result: &O) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "log_output")]
      OutputWrapper::LogOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::{DetectionDecoder, DisplaySize, LabelList},
    tensor::ModelBox,
  };

  #[test]
  fn detection_record_lists_boxes() {
    let decoder = DetectionDecoder::new(LabelList::coco(), (640, 640), DisplaySize::new(640.0, 640.0));
    let mut overlay = DetectionOverlay::default();
    overlay.decode(&decoder, &[ModelBox {
      cx: 320.0,
      cy: 320.0,
      w: 10.0,
      h: 10.0,
      class_id: 0,
      score: 0.9,
    }])
    .unwrap();

    let record = overlay.record();
    assert_eq!(record["boxes"][0]["label"], "person");
    assert_eq!(record["boxes"][0]["center_x"], 0.0);
    assert!(overlay.summary().contains("person(0.90)"));
    assert!(!Overlay::is_empty(&overlay));
  }

  #[test]
  fn unknown_scheme_rejected() {
    let url = Url::parse("rtsp://localhost/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
