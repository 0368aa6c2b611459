// 该文件是 Tianmu （天目） 项目的一部分。
// src/decode/segmentation.rs - 语义分割解码
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

use std::path::Path;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::{decode::DecodeError, tensor::ClassScores};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticClass {
  pub name: String,
  pub color: [u8; 4],
}

impl SemanticClass {
  pub fn new(name: impl Into<String>, color: [u8; 4]) -> Self {
    Self {
      name: name.into(),
      color,
    }
  }
}

/// 有序调色板，长度为类别数加一，最后一项为空类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SemanticClass>", into = "Vec<SemanticClass>")]
pub struct Palette {
  classes: Vec<SemanticClass>,
}

impl TryFrom<Vec<SemanticClass>> for Palette {
  type Error = DecodeError;

  fn try_from(classes: Vec<SemanticClass>) -> Result<Self, Self::Error> {
    Palette::new(classes)
  }
}

impl From<Palette> for Vec<SemanticClass> {
  fn from(palette: Palette) -> Self {
    palette.classes
  }
}

impl Palette {
  pub fn new(classes: Vec<SemanticClass>) -> Result<Self, DecodeError> {
    if classes.is_empty() {
      return Err(DecodeError::EmptyPalette);
    }
    Ok(Self { classes })
  }

  /// CamVid 的 11 个类别加空类别
  pub fn camvid() -> Self {
    let classes = [
      ("Sky", [128, 128, 128]),
      ("Building", [128, 0, 0]),
      ("Pole", [192, 192, 128]),
      ("Road", [128, 64, 128]),
      ("Pavement", [60, 40, 222]),
      ("Tree", [128, 128, 0]),
      ("SignSymbol", [192, 128, 128]),
      ("Fence", [64, 64, 128]),
      ("Car", [64, 0, 128]),
      ("Pedestrian", [64, 64, 0]),
      ("Bicyclist", [0, 128, 192]),
      ("Void", [0, 0, 0]),
    ]
    .into_iter()
    .map(|(name, [r, g, b])| SemanticClass::new(name, [r, g, b, u8::MAX]))
    .collect();

    Self { classes }
  }

  pub fn from_json(text: &str) -> Result<Self, DecodeError> {
    Ok(serde_json::from_str(text)?)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
    Self::from_json(&std::fs::read_to_string(path)?)
  }

  /// 不含空类别的类别数
  pub fn num_classes(&self) -> usize {
    self.classes.len() - 1
  }

  pub fn void(&self) -> &SemanticClass {
    &self.classes[self.classes.len() - 1]
  }

  pub fn classes(&self) -> &[SemanticClass] {
    &self.classes
  }

  /// 超出类别范围的索引映射到空类别
  pub fn color(&self, index: usize) -> [u8; 4] {
    if index < self.num_classes() {
      self.classes[index].color
    } else {
      self.void().color
    }
  }
}

impl Default for Palette {
  fn default() -> Self {
    Self::camvid()
  }
}

/// 逐像素类别索引
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassMap {
  width: usize,
  height: usize,
  classes: Vec<u32>,
}

impl ClassMap {
  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn get(&self, row: usize, col: usize) -> usize {
    self.classes[row * self.width + col] as usize
  }

  /// 出现过的最大类别索引
  pub fn max_class(&self) -> Option<usize> {
    self.classes.iter().max().map(|&c| c as usize)
  }

  /// 每个类别的像素数，长度为 `classes`
  pub fn histogram(&self, classes: usize) -> Vec<usize> {
    let mut counts = vec![0; classes];
    for &c in &self.classes {
      if let Some(slot) = counts.get_mut(c as usize) {
        *slot += 1;
      }
    }
    counts
  }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentationDecoder {
  palette: Palette,
}

impl SegmentationDecoder {
  pub fn new(palette: Palette) -> Self {
    Self { palette }
  }

  pub fn palette(&self) -> &Palette {
    &self.palette
  }

  pub fn set_palette(&mut self, palette: Palette) {
    self.palette = palette;
  }

  /// 逐像素取最大分数的类别，严格大于比较，相同分数取较小索引
  pub fn argmax(&self, scores: &ClassScores) -> ClassMap {
    let (height, width) = (scores.height(), scores.width());
    let mut classes = Vec::with_capacity(height * width);

    for row in 0..height {
      for col in 0..width {
        let pixel = scores.pixel(row, col);
        let mut best = 0usize;
        for (k, &s) in pixel.iter().enumerate().skip(1) {
          if s > pixel[best] {
            best = k;
          }
        }
        classes.push(best as u32);
      }
    }

    ClassMap {
      width,
      height,
      classes,
    }
  }

  /// 按调色板着色，类别图第 y 行写入图像第 h-1-y 行
  pub fn colorize(&self, map: &ClassMap) -> RgbaImage {
    let (w, h) = (map.width as u32, map.height as u32);
    RgbaImage::from_fn(w, h, |x, y| {
      let row = (h - 1 - y) as usize;
      Rgba(self.palette.color(map.get(row, x as usize)))
    })
  }

  pub fn decode(&self, scores: &ClassScores) -> (ClassMap, RgbaImage) {
    let map = self.argmax(scores);
    let image = self.colorize(&map);
    (map, image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scores(h: usize, w: usize, c: usize, data: Vec<f32>) -> ClassScores {
    ClassScores::from_hwc(h, w, c, data).unwrap()
  }

  #[test]
  fn argmax_picks_dominant_class() {
    let decoder = SegmentationDecoder::default();
    let map = decoder.argmax(&scores(1, 2, 3, vec![0.1, 0.7, 0.2, 0.9, 0.0, 0.05]));
    assert_eq!(map.get(0, 0), 1);
    assert_eq!(map.get(0, 1), 0);
  }

  #[test]
  fn argmax_ties_take_lowest_index() {
    let decoder = SegmentationDecoder::default();
    let map = decoder.argmax(&scores(1, 1, 4, vec![0.2, 0.5, 0.5, 0.5]));
    assert_eq!(map.get(0, 0), 1);
  }

  #[test]
  fn colorize_flips_rows() {
    let decoder = SegmentationDecoder::default();
    // 2 行 1 列：第 0 行为 Sky, 第 1 行为 Road
    let map = decoder.argmax(&scores(2, 1, 4, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]));
    let image = decoder.colorize(&map);
    assert_eq!(image.get_pixel(0, 1).0, [128, 128, 128, 255]);
    assert_eq!(image.get_pixel(0, 0).0, [128, 64, 128, 255]);
  }

  #[test]
  fn out_of_range_class_is_void() {
    let palette = Palette::new(vec![
      SemanticClass::new("a", [255, 0, 0, 255]),
      SemanticClass::new("void", [0, 0, 0, 0]),
    ])
    .unwrap();
    let decoder = SegmentationDecoder::new(palette);
    let map = decoder.argmax(&scores(1, 1, 3, vec![0.0, 0.0, 1.0]));
    assert_eq!(decoder.colorize(&map).get_pixel(0, 0).0, [0, 0, 0, 0]);
  }

  #[test]
  fn camvid_palette_layout() {
    let palette = Palette::camvid();
    assert_eq!(palette.num_classes(), 11);
    assert_eq!(palette.void().name, "Void");
    assert_eq!(palette.color(4), [60, 40, 222, 255]);
  }

  #[test]
  fn palette_from_json() {
    let palette = Palette::from_json(
      r#"[{"name": "road", "color": [1, 2, 3, 255]}, {"name": "void", "color": [0, 0, 0, 0]}]"#,
    )
    .unwrap();
    assert_eq!(palette.num_classes(), 1);
    assert!(matches!(Palette::from_json("[]"), Err(DecodeError::PaletteJson(_))));
  }

  #[test]
  fn histogram_counts_pixels() {
    let decoder = SegmentationDecoder::default();
    let map = decoder.argmax(&scores(1, 3, 2, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0]));
    assert_eq!(map.histogram(2), vec![2, 1]);
  }
}
