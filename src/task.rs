// 该文件是 Wuding （屋顶） 项目的一部分。
// src/task.rs - 批量检测任务
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

use std::collections::BTreeMap;
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::{thread, time::Duration, time::Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
  input::{ImageItem, ImageSource},
  model::Classifier,
  output::Render,
  pipeline::{DetectError, ImageOutcome, Orchestrator},
  store::DetectionStore,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 协作式取消标志，在每个 (检测器, 角度) 步骤之前检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 收到 Ctrl-C 时取消；再等 30 秒仍未退出则强制结束进程
  pub fn cancel_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
  pub image_id: String,
  pub reason: String,
}

/// 一次批量运行的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
  pub processed: usize,
  pub skipped: Vec<SkippedImage>,
  pub cancelled: bool,
  /// 取消时尚未开始处理的图像数
  pub not_started: usize,
  pub scans: usize,
  pub invalid_boxes: usize,
  pub discarded_off_image: usize,
  /// 各图像检测耗时之和（秒）
  pub total_detection_time_secs: f64,
  pub wall_time_secs: f64,
  pub detections_by_roof_type: BTreeMap<String, usize>,
}

enum ImageResult {
  Processed(ImageOutcome),
  Skipped(SkippedImage),
  NotStarted,
}

impl RunReport {
  fn absorb(&mut self, result: ImageResult) {
    match result {
      ImageResult::Processed(outcome) => {
        self.processed += 1;
        self.scans += outcome.scans;
        self.invalid_boxes += outcome.invalid_boxes;
        self.discarded_off_image += outcome.discarded_off_image;
        self.total_detection_time_secs += outcome.elapsed.as_secs_f64();
        self.cancelled |= outcome.cancelled;
      }
      ImageResult::Skipped(skipped) => self.skipped.push(skipped),
      ImageResult::NotStarted => {
        self.cancelled = true;
        self.not_started += 1;
      }
    }
  }
}

/// 对一批图像运行检测，结果写入共享的 [`DetectionStore`]。
///
/// 单幅图像失败只会被记录为跳过，不影响其他图像。
#[derive(Debug, Clone)]
pub struct BatchTask {
  workers: usize,
  cancel: CancelToken,
  store: Arc<DetectionStore>,
}

impl Default for BatchTask {
  fn default() -> Self {
    Self {
      workers: 1,
      cancel: CancelToken::new(),
      store: Arc::new(DetectionStore::new()),
    }
  }
}

impl BatchTask {
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_store(mut self, store: Arc<DetectionStore>) -> Self {
    self.store = store;
    self
  }

  pub fn store(&self) -> Arc<DetectionStore> {
    Arc::clone(&self.store)
  }

  /// 取消检查在读取图像之前，取消后剩余的图像不会被解码
  fn process<S, C, O>(&self, orchestrator: &Orchestrator<C>, output: &O, source: S) -> ImageResult
  where
    S: ImageSource,
    C: Classifier,
    O: Render,
    O::Error: std::fmt::Display,
  {
    if self.cancel.is_cancelled() {
      return ImageResult::NotStarted;
    }

    let ImageItem { id, path, image } = source.load();
    let detected = image.map_err(DetectError::from).and_then(|image| {
      orchestrator
        .detect_image(&id, &image, &self.store, &self.cancel)
        .map(|outcome| (outcome, image))
    });

    match detected {
      Ok((outcome, image)) => {
        let item = ImageItem {
          id,
          path,
          image: Ok(image),
        };
        let detections = self.store.get_image(&item.id);
        if let Err(e) = output.render_result(&item, &detections) {
          warn!("图像 {} 的结果输出失败: {}", item.id, e);
        }
        ImageResult::Processed(outcome)
      }
      Err(e) => {
        warn!("跳过图像 {}: {}", id, e);
        ImageResult::Skipped(SkippedImage {
          image_id: id,
          reason: e.to_string(),
        })
      }
    }
  }
}

impl<'a, I, C, O> Task<I, &'a Orchestrator<C>, O> for BatchTask
where
  I: Iterator + Send,
  I::Item: ImageSource,
  C: Classifier,
  O: Render + Sync,
  O::Error: std::fmt::Display,
{
  type Output = RunReport;
  type Error = rayon::ThreadPoolBuildError;

  fn run_task(self, input: I, model: &'a Orchestrator<C>, output: O) -> Result<RunReport, Self::Error> {
    info!("开始任务，工作线程数 {}", self.workers);
    let now = Instant::now();

    let mut results: Vec<(String, ImageResult)> = if self.workers == 1 {
      input
        .map(|source| (source.id().to_string(), self.process(model, &output, source)))
        .collect()
    } else {
      let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(self.workers)
        .build()?;
      pool.install(|| {
        input
          .par_bridge()
          .map(|source| (source.id().to_string(), self.process(model, &output, source)))
          .collect()
      })
    };
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut report = RunReport::default();
    for (_, result) in results {
      report.absorb(result);
    }
    report.cancelled |= self.cancel.is_cancelled();
    report.detections_by_roof_type = self.store.count_by_roof_type();
    report.wall_time_secs = now.elapsed().as_secs_f64();

    info!(
      "任务完成: 处理 {} 幅，跳过 {} 幅，检测总耗时 {:.2}s",
      report.processed,
      report.skipped.len(),
      report.total_detection_time_secs
    );
    if report.cancelled {
      warn!("任务被取消，{} 幅图像未开始处理", report.not_started);
    }
    Ok(report)
  }
}
