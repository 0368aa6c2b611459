// 该文件是 Tianmu （天目） 项目的一部分。
// src/timing.rs - 推理周期计时
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

use std::{fmt, ops::Add, time::Duration};

use serde::{Serialize, Serializer};

/// 单次推理周期各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleTimings {
  /// 编码加前向推理
  #[serde(serialize_with = "as_millis")]
  pub inference: Duration,
  /// 设备到主机的同步下载
  #[serde(serialize_with = "as_millis")]
  pub download: Duration,
  /// 解码与叠加层生成
  #[serde(serialize_with = "as_millis")]
  pub draw: Duration,
}

impl CycleTimings {
  pub fn total(&self) -> Duration {
    self.inference + self.download + self.draw
  }
}

impl Add for CycleTimings {
  type Output = CycleTimings;

  fn add(self, rhs: Self) -> Self::Output {
    CycleTimings {
      inference: self.inference + rhs.inference,
      download: self.download + rhs.download,
      draw: self.draw + rhs.draw,
    }
  }
}

impl fmt::Display for CycleTimings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "推理 {:.2?} / 下载 {:.2?} / 绘制 {:.2?}",
      self.inference, self.download, self.draw
    )
  }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_f64(d.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn total_sums_stages() {
    let t = CycleTimings {
      inference: Duration::from_millis(12),
      download: Duration::from_millis(3),
      draw: Duration::from_millis(5),
    };
    assert_eq!(t.total(), Duration::from_millis(20));
    assert_eq!((t + t).draw, Duration::from_millis(10));
  }

  #[test]
  fn serializes_as_millis() {
    let t = CycleTimings {
      inference: Duration::from_micros(1500),
      ..Default::default()
    };
    let json = serde_json::to_value(t).unwrap();
    assert_eq!(json["inference"], 1.5);
    assert_eq!(json["download"], 0.0);
  }
}
