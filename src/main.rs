// 该文件是 Yanbei （雁北） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use yanbei::{
  frame::RgbNhwcFrame,
  input::ImageFileInput,
  label::CategoryIndex,
  model::OnnxDetectorBuilder,
  output::{CsvRecordOutput, RecordOutput},
  task::{BatchTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型路径: {}", args.model.display());
  info!("标签映射: {}", args.labelmap.display());
  info!("输入路径: {}", args.image_path.display());
  info!("输出目录: {}", args.output.display());

  let config = args.postprocess_config();
  config.validate()?;

  info!("加载标签映射...");
  let categories = CategoryIndex::from_labelmap(&args.labelmap, !args.raw_names)
    .with_context(|| format!("无法读取标签映射 {}", args.labelmap.display()))?;

  info!("加载模型...");
  let model = OnnxDetectorBuilder::new(&args.model)
    .intra_threads(args.threads)
    .build::<RgbNhwcFrame>()
    .with_context(|| format!("无法加载模型 {}", args.model.display()))?;

  let input = ImageFileInput::from_path(&args.image_path)?;
  if input.is_empty() {
    warn!("没有找到图片: {}", args.image_path.display());
  }

  let csv = CsvRecordOutput::new(&args.output)
    .naming(args.naming())
    .dated(args.dated);
  let output = RecordOutput::new(csv);
  #[cfg(feature = "mask_record")]
  let output = output.with_masks(
    args
      .save_masks
      .then(yanbei::output::MaskRecordOutput::new),
  );
  if cfg!(not(feature = "mask_record")) && args.save_masks {
    warn!("未启用 mask_record 功能，忽略 --save-masks");
  }

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      if stop.swap(true, Ordering::SeqCst) {
        warn!("强制退出程序");
        std::process::exit(130);
      }
      info!("收到中断信号，处理完当前图片后退出...");
    })
    .context("无法设置 Ctrl-C 处理函数")?;
  }

  info!("开始推理...");
  let summary = BatchTask::new(&categories)
    .with_config(config)
    .with_policy(args.failure_policy())
    .with_stop_flag(Some(stop))
    .run_task(input, model, output)?;

  if let Some(path) = &args.summary {
    summary
      .save(path)
      .with_context(|| format!("无法写入摘要 {}", path.display()))?;
    info!("摘要已写入 {}", path.display());
  }

  info!(
    "完成: {} 张图片，{} 个检测，跳过 {} 张",
    summary.processed,
    summary.detections,
    summary.skipped.len()
  );
  Ok(())
}
