// 该文件是 Yanbei （雁北） 项目的一部分。
// src/task.rs - 批量推理任务
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

use std::path::{Path, PathBuf};
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  input::InputItem,
  label::CategoryIndex,
  model::{DetectionSet, Model},
  output::{ImageDetections, RecordedFiles, Render},
  postprocess::{PostProcessConfig, output_to_table},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 单张图片出错时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  /// 遇到第一个错误即中止
  #[default]
  Abort,
  /// 记录错误并继续处理下一张
  Skip,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemSummary {
  pub source: PathBuf,
  pub output: PathBuf,
  pub detections: usize,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub masks: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedItem {
  pub source: PathBuf,
  pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchSummary {
  pub processed: usize,
  pub detections: usize,
  pub interrupted: bool,
  pub items: Vec<ItemSummary>,
  pub skipped: Vec<SkippedItem>,
}

impl BatchSummary {
  pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    serde_json::to_writer_pretty(file, self)?;
    Ok(())
  }
}

/// 逐张处理图片：推理、过滤、写出记录
pub struct BatchTask<'a> {
  categories: &'a CategoryIndex,
  config: PostProcessConfig,
  policy: FailurePolicy,
  stop: Option<Arc<AtomicBool>>,
}

impl<'a> BatchTask<'a> {
  pub fn new(categories: &'a CategoryIndex) -> Self {
    Self {
      categories,
      config: PostProcessConfig::default(),
      policy: FailurePolicy::default(),
      stop: None,
    }
  }

  pub fn with_config(mut self, config: PostProcessConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 标志置位后在当前图片处理完成时退出
  pub fn with_stop_flag(mut self, stop: Option<Arc<AtomicBool>>) -> Self {
    self.stop = stop;
    self
  }

  fn stopped(&self) -> bool {
    self
      .stop
      .as_ref()
      .map(|s| s.load(Ordering::SeqCst))
      .unwrap_or(false)
  }
}

fn process_one<M, O, ME, RE>(
  item: InputItem,
  model: &mut M,
  output: &O,
  categories: &CategoryIndex,
  config: &PostProcessConfig,
) -> anyhow::Result<(usize, RecordedFiles)>
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: Model<Input = RgbNhwcFrame, Output = DetectionSet, Error = ME>,
  O: for<'r> Render<ImageDetections<'r>, Written = RecordedFiles, Error = RE>,
{
  let frame = item.frame?;
  let now = std::time::Instant::now();
  let set = model.infer(&frame)?;
  let infer_elapsed = now.elapsed();
  let table = output_to_table(&set, categories, config)?;
  let files = output.render_result(
    &item.path,
    &ImageDetections {
      set: &set,
      table: &table,
    },
  )?;
  info!(
    "{}: {} 个检测 -> {}，推理耗时: {:.2?}，总耗时: {:.2?}",
    item.path.display(),
    table.len(),
    files.table.display(),
    infer_elapsed,
    now.elapsed()
  );
  Ok((table.len(), files))
}

impl<'a, ME, RE, I, M, O> Task<I, M, O> for BatchTask<'a>
where
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: IntoIterator<Item = InputItem>,
  M: Model<Input = RgbNhwcFrame, Output = DetectionSet, Error = ME>,
  O: for<'r> Render<ImageDetections<'r>, Written = RecordedFiles, Error = RE>,
{
  type Output = BatchSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<BatchSummary, Self::Error> {
    self.config.validate()?;
    info!("开始任务...");

    let mut summary = BatchSummary::default();
    for item in input {
      if self.stopped() {
        warn!("中断信号接收，退出任务循环");
        summary.interrupted = true;
        break;
      }

      let source = item.path.clone();
      match process_one(item, &mut model, &output, self.categories, &self.config) {
        Ok((detections, files)) => {
          summary.processed += 1;
          summary.detections += detections;
          summary.items.push(ItemSummary {
            source,
            output: files.table,
            detections,
            masks: files.masks,
          });
        }
        Err(e) => match self.policy {
          FailurePolicy::Abort => {
            error!("处理 {} 失败: {:#}", source.display(), e);
            return Err(e.context(format!("处理 {} 失败", source.display())));
          }
          FailurePolicy::Skip => {
            warn!("跳过 {}: {:#}", source.display(), e);
            summary.skipped.push(SkippedItem {
              source,
              reason: format!("{:#}", e),
            });
          }
        },
      }
    }

    info!(
      "任务完成: 处理 {} 张，跳过 {} 张，共 {} 个检测",
      summary.processed,
      summary.skipped.len(),
      summary.detections
    );
    Ok(summary)
  }
}
