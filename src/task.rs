// 该文件是 Yibiao （仪表） 项目的一部分。
// src/task.rs - 任务执行
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一张输入
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始诊断...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("诊断完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

pub const DEFAULT_REPEAT_TIMES: usize = 1000;
const WARMUP_TIMES: usize = 2;

/// 对同一张输入反复诊断，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      times: DEFAULT_REPEAT_TIMES,
    }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

/// 去掉预热轮次后的平均耗时
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = times.get(WARMUP_TIMES..).filter(|t| !t.is_empty()).unwrap_or(times);
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始诊断...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})诊断完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})输出完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均诊断时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 依次处理所有输入，直到输入耗尽、达到指定数量或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  fn run_until<F, D, I, M, O>(&self, input: I, model: M, output: O, stop: &AtomicBool) -> anyhow::Result<usize>
  where
    I: Iterator<Item = F>,
    M: Model<Input = F, Output = D, Error: std::error::Error + Sync + Send + 'static>,
    O: Render<F, D, Error: std::error::Error + Sync + Send + 'static>,
  {
    let mut frame_index = 0;
    let mut now = Instant::now();
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 张图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("诊断完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定数量 {}, 退出任务循环", frame_index);
        break;
      }
      if stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }
    Ok(frame_index)
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，处理完当前图像后退出...");
      flag.store(true, Ordering::SeqCst);
    })?;

    let count = self.run_until(input, model, output, &stop)?;
    info!("任务完成，共处理 {} 张图像", count);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, convert::Infallible};

  use super::*;

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<(u32, u32)>>);

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), Infallible> {
      self.0.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_input() {
    let sink = Collect::default();
    OneShotTask.run_task(vec![3, 4].into_iter(), Doubler, &sink).unwrap();
    assert_eq!(*sink.0.borrow(), vec![(3, 6)]);
    assert!(OneShotTask.run_task(std::iter::empty::<u32>(), Doubler, &sink).is_err());
  }

  #[test]
  fn repeat_shot_repeats_the_same_input() {
    let sink = Collect::default();
    RepeatShotTask::default()
      .with_times(5)
      .run_task(vec![7, 8].into_iter(), Doubler, &sink)
      .unwrap();
    assert_eq!(*sink.0.borrow(), vec![(7, 14); 5]);
  }

  #[test]
  fn continuous_stops_at_frame_number_or_signal() {
    let sink = Collect::default();
    let stop = AtomicBool::new(false);
    let count = ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_until(1..10u32, Doubler, &sink, &stop)
      .unwrap();
    assert_eq!(count, 2);

    let stop = AtomicBool::new(true);
    let count = ContinuousTask::default()
      .run_until(1..10u32, Doubler, &sink, &stop)
      .unwrap();
    assert_eq!(count, 1);

    let stop = AtomicBool::new(false);
    let count = ContinuousTask::default().run_until(1..4u32, Doubler, &sink, &stop).unwrap();
    assert_eq!(count, 3);
  }

  #[test]
  fn warmup_rounds_are_excluded() {
    let ms = Duration::from_millis;
    assert_eq!(average_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]), Some(ms(15)));
    assert_eq!(average_after_warmup(&[ms(8), ms(4)]), Some(ms(6)));
    assert_eq!(average_after_warmup(&[]), None);
  }
}
