// 该文件是 Tianmu （天目） 项目的一部分。
// src/task.rs - 任务调度
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
  thread,
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
  frame::RgbaFrame,
  input::FrameSource,
  output::Render,
  pipeline::{InferenceStage, Pipeline, Tick},
  timing::CycleTimings,
};

/// 没有帧或未到推理间隔时的等待时间
const IDLE_WAIT: Duration = Duration::from_millis(2);

pub trait Task<P, O>: Sized {
  type Error;
  fn run_task(self, pipeline: P, output: O) -> Result<(), Self::Error>;
}

/// 推进流水线直到完成一个周期，输入结束时返回 `None`
fn next_cycle<S: FrameSource, St: InferenceStage>(
  pipeline: &mut Pipeline<S, St>,
) -> anyhow::Result<Option<(RgbaFrame, CycleTimings)>> {
  loop {
    match pipeline.tick(Instant::now())? {
      Tick::Completed { frame, timings } => return Ok(Some((frame, timings))),
      Tick::Skipped(_) => thread::sleep(IDLE_WAIT),
      Tick::Closed => return Ok(None),
    }
  }
}

fn render<S, St, O, RE>(
  pipeline: &Pipeline<S, St>,
  output: &O,
  frame: &RgbaFrame,
) -> anyhow::Result<()>
where
  S: FrameSource,
  St: InferenceStage,
  O: Render<RgbaFrame, St::Output, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  if let Some(result) = pipeline.latest() {
    output.render_result(frame, result)?;
  }
  Ok(())
}

pub struct OneShotTask;

impl<S, St, O, RE> Task<Pipeline<S, St>, O> for OneShotTask
where
  S: FrameSource,
  St: InferenceStage,
  O: Render<RgbaFrame, St::Output, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut pipeline: Pipeline<S, St>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (frame, timings) =
      next_cycle(&mut pipeline)?.ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("推理完成: {}", timings);
    let now = Instant::now();
    render(&pipeline, &output, &frame)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 重复推理以测量耗时，输入源需要能重复给出帧，例如 `image://...?loop`
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  render: bool,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 1000,
      render: true,
    }
  }
}

impl RepeatShotTask {
  /// 前两次推理视为预热，不计入平均值
  pub const WARMUP: usize = 2;

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_render(mut self, render: bool) -> Self {
    self.render = render;
    self
  }

  pub fn average(times: &[CycleTimings]) -> Option<CycleTimings> {
    let measured = times.get(Self::WARMUP..)?;
    if measured.is_empty() {
      return None;
    }
    let n = measured.len() as u32;
    let sum = measured
      .iter()
      .copied()
      .fold(CycleTimings::default(), |acc, t| acc + t);
    Some(CycleTimings {
      inference: sum.inference / n,
      download: sum.download / n,
      draw: sum.draw / n,
    })
  }
}

impl<S, St, O, RE> Task<Pipeline<S, St>, O> for RepeatShotTask
where
  S: FrameSource,
  St: InferenceStage,
  O: Render<RgbaFrame, St::Output, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut pipeline: Pipeline<S, St>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let Some((frame, timings)) = next_cycle(&mut pipeline)? else {
        warn!("输入在第 {} 次推理前结束", i);
        break;
      };
      info!("({})推理完成: {}", i, timings);
      if self.render {
        render(&pipeline, &output, &frame)?;
      }
      times.push(timings);
    }

    match Self::average(&times) {
      Some(avg) => warn!("平均推理时间: {} (总计 {:.2?})", avg, avg.total()),
      None => warn!("推理次数不足 {} 次, 无法计算平均时间", Self::WARMUP + 1),
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<S, St, O, RE> Task<Pipeline<S, St>, O> for ContinuousTask
where
  S: FrameSource,
  St: InferenceStage,
  O: Render<RgbaFrame, St::Output, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut pipeline: Pipeline<S, St>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    loop {
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      match pipeline.tick(Instant::now())? {
        Tick::Completed { frame, timings } => {
          frame_index = frame_index.wrapping_add(1);
          let now = Instant::now();
          render(&pipeline, &output, &frame)?;
          info!(
            "第 {} 帧: {}, 渲染耗时: {:.2?}",
            frame_index,
            timings,
            now.elapsed()
          );
          if self.frame_number.is_some_and(|n| frame_index >= n) {
            info!("达到指定帧数 {}, 退出任务循环", frame_index);
            break;
          }
        }
        Tick::Skipped(_) => thread::sleep(IDLE_WAIT),
        Tick::Closed => {
          info!("输入结束");
          break;
        }
      }
    }

    info!("任务完成，共 {} 个推理周期", pipeline.cycles());
    Ok(())
  }
}
