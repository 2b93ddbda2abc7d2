// 该文件是 Yanbei （雁北） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use yanbei::{
  output::{LEGACY_OUTPUT_FILE, OutputNaming},
  postprocess::{CoordinateFrame, DEFAULT_FRAME_SIZE, DEFAULT_MIN_SCORE, PostProcessConfig},
  task::FailurePolicy,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
  /// 固定的正方形坐标系，边长由 --frame-size 指定
  Canonical,
  /// 每张图片自身的像素尺寸
  Image,
}

/// Yanbei 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件，或包含模型的目录
  #[arg(short, long, value_name = "MODEL")]
  pub model: PathBuf,

  /// 标签映射文件 (.pbtxt)
  #[arg(short, long, value_name = "LABELMAP")]
  pub labelmap: PathBuf,

  /// 图片文件或图片目录（png / jpg / jpeg）
  #[arg(short, long = "image_path", value_name = "PATH")]
  pub image_path: PathBuf,

  /// 输出目录
  #[arg(short, long, default_value = ".", value_name = "DIR")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_MIN_SCORE, value_name = "THRESHOLD")]
  pub min_score: f32,

  /// 坐标换算所用的像素网格
  #[arg(long, value_enum, default_value_t = FrameKind::Canonical)]
  pub frame: FrameKind,

  /// 固定坐标系的边长
  #[arg(long, default_value_t = DEFAULT_FRAME_SIZE, value_name = "PIXELS")]
  pub frame_size: u32,

  /// 所有结果写入同一个 detections.csv（每张图片覆盖上一张）
  #[arg(long)]
  pub single_file: bool,

  /// 写入 <output>/YYYY/MM/DD 子目录
  #[arg(long)]
  pub dated: bool,

  /// 使用 name 而不是 display_name 作为类别名
  #[arg(long)]
  pub raw_names: bool,

  /// 单张图片出错时跳过而不是中止
  #[arg(long)]
  pub keep_going: bool,

  /// 模型输出掩码时保存二值掩码图片
  #[arg(long)]
  pub save_masks: bool,

  /// 批处理摘要 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub summary: Option<PathBuf>,

  /// ONNX Runtime 算子内线程数
  #[arg(long, value_name = "N")]
  pub threads: Option<usize>,
}

impl Args {
  pub fn postprocess_config(&self) -> PostProcessConfig {
    let frame = match self.frame {
      FrameKind::Canonical => CoordinateFrame::square(self.frame_size),
      FrameKind::Image => CoordinateFrame::ImageSize,
    };
    PostProcessConfig {
      min_score: self.min_score,
      frame,
    }
  }

  pub fn naming(&self) -> OutputNaming {
    if self.single_file {
      OutputNaming::Single(LEGACY_OUTPUT_FILE.to_string())
    } else {
      OutputNaming::PerImage
    }
  }

  pub fn failure_policy(&self) -> FailurePolicy {
    if self.keep_going {
      FailurePolicy::Skip
    } else {
      FailurePolicy::Abort
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_legacy_behavior() {
    let args = Args::parse_from(["yanbei", "-m", "m.onnx", "-l", "l.pbtxt", "-i", "imgs"]);
    assert_eq!(args.output, PathBuf::from("."));
    assert_eq!(args.postprocess_config(), PostProcessConfig::default());
    assert_eq!(args.naming(), OutputNaming::PerImage);
    assert_eq!(args.failure_policy(), FailurePolicy::Abort);
    assert!(!args.raw_names);
  }

  #[test]
  fn long_options_map_onto_config() {
    let args = Args::parse_from([
      "yanbei",
      "--model",
      "m",
      "--labelmap",
      "l",
      "--image_path",
      "i",
      "--min-score",
      "0.3",
      "--frame",
      "image",
      "--single-file",
      "--keep-going",
    ]);
    let config = args.postprocess_config();
    assert_eq!(config.min_score, 0.3);
    assert_eq!(config.frame, CoordinateFrame::ImageSize);
    assert_eq!(args.naming(), OutputNaming::Single("detections.csv".to_string()));
    assert_eq!(args.failure_policy(), FailurePolicy::Skip);
  }
}
