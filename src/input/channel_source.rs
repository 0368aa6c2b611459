// 该文件是 Tianmu （天目） 项目的一部分。
// src/input/channel_source.rs - 进程内通道输入
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

use std::sync::mpsc::{Receiver, SendError, Sender, TryRecvError, channel};

use crate::{
  frame::Frame,
  input::{FramePoll, FrameSource, InputError},
};

/// 向 `ChannelSource` 推送帧，并按推送顺序编号
#[derive(Debug, Clone)]
pub struct FrameSender {
  tx: Sender<Frame>,
}

impl FrameSender {
  pub fn send(&self, frame: Frame) -> Result<(), SendError<Frame>> {
    self.tx.send(frame)
  }
}

/// 由其他线程推送帧的输入源，例如外部采集回调
pub struct ChannelSource {
  rx: Receiver<Frame>,
  dimensions: Option<(u32, u32)>,
  index: u64,
}

impl ChannelSource {
  pub fn new(dimensions: Option<(u32, u32)>) -> (FrameSender, Self) {
    let (tx, rx) = channel();
    (
      FrameSender { tx },
      Self {
        rx,
        dimensions,
        index: 0,
      },
    )
  }
}

impl FrameSource for ChannelSource {
  fn poll_frame(&mut self) -> Result<FramePoll, InputError> {
    match self.rx.try_recv() {
      Ok(frame) => {
        self.index += 1;
        let timestamp = frame.timestamp_ms();
        Ok(FramePoll::Ready(frame.with_index(self.index, timestamp)))
      }
      Err(TryRecvError::Empty) => Ok(FramePoll::Pending),
      Err(TryRecvError::Disconnected) => Ok(FramePoll::Closed),
    }
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    self.dimensions
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelFormat;

  #[test]
  fn pending_then_ready_then_closed() {
    let (tx, mut source) = ChannelSource::new(Some((2, 1)));
    assert!(matches!(source.poll_frame().unwrap(), FramePoll::Pending));

    tx.send(Frame::new(2, 1, PixelFormat::Gray8, vec![1, 2]).unwrap())
      .unwrap();
    match source.poll_frame().unwrap() {
      FramePoll::Ready(frame) => assert_eq!(frame.index(), 1),
      other => panic!("unexpected poll result: {:?}", other),
    }

    drop(tx);
    assert!(matches!(source.poll_frame().unwrap(), FramePoll::Closed));
  }
}
