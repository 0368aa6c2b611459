// 该文件是 Tianmu （天目） 项目的一部分。
// src/output/draw.rs - 推理结果可视化
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

use image::{Rgba, RgbaImage, imageops::FilterType};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
  decode::BoundingBox,
  frame::RgbaFrame,
  model::SegmentationInference,
  pipeline::DetectionOverlay,
};

const DEFAULT_OPACITY: f32 = 0.5;
const BOX_COLOR: [u8; 4] = [0, 0, 255, 255];
const BOX_THICKNESS: i32 = 2;

#[derive(Debug, Clone)]
pub struct Draw {
  opacity: f32,
  box_color: [u8; 4],
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      opacity: DEFAULT_OPACITY,
      box_color: BOX_COLOR,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  pub fn with_opacity(mut self, opacity: f32) -> Self {
    self.opacity = opacity.clamp(0.0, 1.0);
    self
  }

  pub fn opacity(&self) -> f32 {
    self.opacity
  }

  /// 按叠加层的 alpha 乘以不透明度混合，叠加层尺寸不同时最近邻缩放
  pub fn blend(&self, frame: &RgbaFrame, overlay: &RgbaImage) -> RgbaImage {
    let mut image = frame.image().clone();
    let resized;
    let overlay = if overlay.dimensions() == image.dimensions() {
      overlay
    } else {
      resized = image::imageops::resize(overlay, image.width(), image.height(), FilterType::Nearest);
      &resized
    };

    for (dst, src) in image.pixels_mut().zip(overlay.pixels()) {
      let alpha = self.opacity * src[3] as f32 / 255.0;
      if alpha <= 0.0 {
        continue;
      }
      for c in 0..3 {
        let mixed = dst[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha;
        dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
      }
    }
    image
  }

  /// 显示空间中的框映射回帧像素坐标后绘制边框
  pub fn boxes(&self, frame: &RgbaFrame, overlay: &DetectionOverlay) -> RgbaImage {
    let mut image = frame.image().clone();
    let Some(display) = overlay.display() else {
      return image;
    };
    let sx = image.width() as f32 / display.width;
    let sy = image.height() as f32 / display.height;

    for b in overlay.boxes() {
      let Some(rect) = box_rect(b, display.width, display.height, sx, sy) else {
        continue;
      };
      for t in 0..self.thickness {
        let (w, h) = (rect.width() as i32 - 2 * t, rect.height() as i32 - 2 * t);
        if w <= 0 || h <= 0 {
          break;
        }
        let inner = Rect::at(rect.left() + t, rect.top() + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(&mut image, inner, Rgba(self.box_color));
      }
    }
    image
  }
}

fn box_rect(b: &BoundingBox, display_w: f32, display_h: f32, sx: f32, sy: f32) -> Option<Rect> {
  let left = (b.center_x - b.width / 2.0 + display_w / 2.0) * sx;
  let top = (b.center_y - b.height / 2.0 + display_h / 2.0) * sy;
  let (w, h) = ((b.width * sx).round(), (b.height * sy).round());
  if w < 1.0 || h < 1.0 {
    return None;
  }
  Some(Rect::at(left.round() as i32, top.round() as i32).of_size(w as u32, h as u32))
}

/// 可以绘制到帧上的推理结果
pub trait DrawOnFrame {
  fn draw_on(&self, draw: &Draw, frame: &RgbaFrame) -> RgbaImage;
}

impl DrawOnFrame for SegmentationInference {
  fn draw_on(&self, draw: &Draw, frame: &RgbaFrame) -> RgbaImage {
    draw.blend(frame, &self.overlay)
  }
}

impl DrawOnFrame for DetectionOverlay {
  fn draw_on(&self, draw: &Draw, frame: &RgbaFrame) -> RgbaImage {
    draw.boxes(frame, self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transparent_overlay_keeps_frame() {
    let frame = RgbaFrame::from(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
    let overlay = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 0]));
    let image = Draw::default().blend(&frame, &overlay);
    assert_eq!(image.get_pixel(1, 1), &Rgba([10, 20, 30, 255]));
  }

  #[test]
  fn opaque_overlay_mixes_by_opacity() {
    let frame = RgbaFrame::from(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
    let overlay = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 0, 255]));
    let image = Draw::default().with_opacity(0.5).blend(&frame, &overlay);
    assert_eq!(image.get_pixel(0, 1), &Rgba([100, 50, 0, 255]));
  }

  #[test]
  fn centered_box_maps_to_frame_center() {
    let b = BoundingBox {
      center_x: 0.0,
      center_y: 0.0,
      width: 100.0,
      height: 50.0,
      ..Default::default()
    };
    // 显示 200x100，帧 400x200
    let rect = box_rect(&b, 200.0, 100.0, 2.0, 2.0).unwrap();
    assert_eq!((rect.left(), rect.top()), (100, 50));
    assert_eq!((rect.width(), rect.height()), (200, 100));
  }
}
