// 该文件是 Yanbei （雁北） 项目的一部分。
// src/postprocess.rs - 检测结果过滤、坐标换算与类别解析
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  label::{CategoryIndex, LabelError},
  model::{DETECTION_SCORES, DetectionSet},
};

pub const DEFAULT_MIN_SCORE: f32 = 0.5;
pub const DEFAULT_FRAME_SIZE: u32 = 512;

/// 不写入表格的原始输出
pub const IGNORED_FIELDS: [&str; 7] = [
  "raw_detection_scores",
  "raw_detection_boxes",
  "detection_multiclass_scores",
  "detection_anchor_indices",
  "num_detections",
  "detection_masks",
  "detection_masks_reframed",
];

pub const COLUMN_CLASS: &str = "class";
pub const COLUMN_X_MIN: &str = "x min";
pub const COLUMN_Y_MIN: &str = "y min";
pub const COLUMN_X_MAX: &str = "x max";
pub const COLUMN_Y_MAX: &str = "y max";

#[derive(Error, Debug)]
pub enum PostProcessError {
  #[error("类别解析错误: {0}")]
  Label(#[from] LabelError),
  #[error("置信度阈值必须在 0 与 1 之间: {0}")]
  InvalidThreshold(f32),
  #[error("坐标系尺寸必须大于 0")]
  EmptyFrame,
  #[error("检测结果未对齐: boxes={boxes}, scores={scores}, classes={classes}")]
  Misaligned {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
}

/// 归一化坐标换算到的像素网格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateFrame {
  /// 固定尺寸，默认 512x512
  Canonical { width: u32, height: u32 },
  /// 使用每张图片的实际尺寸
  ImageSize,
}

impl CoordinateFrame {
  pub fn square(size: u32) -> Self {
    CoordinateFrame::Canonical {
      width: size,
      height: size,
    }
  }

  /// 返回 (宽, 高)
  pub fn extent(&self, set: &DetectionSet) -> (f32, f32) {
    match *self {
      CoordinateFrame::Canonical { width, height } => (width as f32, height as f32),
      CoordinateFrame::ImageSize => (set.image_width as f32, set.image_height as f32),
    }
  }
}

impl Default for CoordinateFrame {
  fn default() -> Self {
    CoordinateFrame::square(DEFAULT_FRAME_SIZE)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessConfig {
  pub min_score: f32,
  pub frame: CoordinateFrame,
}

impl Default for PostProcessConfig {
  fn default() -> Self {
    Self {
      min_score: DEFAULT_MIN_SCORE,
      frame: CoordinateFrame::default(),
    }
  }
}

impl PostProcessConfig {
  pub fn validate(&self) -> Result<(), PostProcessError> {
    if !(0.0..=1.0).contains(&self.min_score) {
      return Err(PostProcessError::InvalidThreshold(self.min_score));
    }
    if let CoordinateFrame::Canonical { width, height } = self.frame {
      if width == 0 || height == 0 {
        return Err(PostProcessError::EmptyFrame);
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x_min: i64,
  pub y_min: i64,
  pub x_max: i64,
  pub y_max: i64,
}

impl PixelBox {
  /// `bbox` 为 [y_min, x_min, y_max, x_max]
  pub fn from_normalized(bbox: [f32; 4], width: f32, height: f32) -> Self {
    Self {
      y_min: rescale(bbox[0], height),
      x_min: rescale(bbox[1], width),
      y_max: rescale(bbox[2], height),
      x_max: rescale(bbox[3], width),
    }
  }
}

/// round(coord * extent)，中间值取偶数
pub fn rescale(coord: f32, extent: f32) -> i64 {
  (coord as f64 * extent as f64).round_ties_even() as i64
}

/// 从头开始连续不低于阈值的个数；只有分数降序时才等于保留个数
pub fn leading_above(scores: &[f32], min_score: f32) -> usize {
  scores.iter().take_while(|&&s| s >= min_score).count()
}

/// 所有不低于阈值的下标，保持原有顺序
pub fn select_above(scores: &[f32], min_score: f32) -> Vec<usize> {
  scores
    .iter()
    .enumerate()
    .filter(|&(_, &s)| s >= min_score)
    .map(|(i, _)| i)
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRow {
  /// 在 DetectionSet 中的下标
  pub source_index: usize,
  /// 与 `DetectionTable::value_columns` 一一对应
  pub values: Vec<f32>,
  pub class: String,
  pub bbox: PixelBox,
}

/// 每个保留的检测一行
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionTable {
  pub value_columns: Vec<String>,
  pub rows: Vec<DetectionRow>,
}

impl DetectionTable {
  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// 第一列为无名的行号列
  pub fn header(&self) -> Vec<String> {
    let mut header = Vec::with_capacity(self.value_columns.len() + 6);
    header.push(String::new());
    header.extend(self.value_columns.iter().cloned());
    header.extend(
      [
        COLUMN_CLASS,
        COLUMN_X_MIN,
        COLUMN_Y_MIN,
        COLUMN_X_MAX,
        COLUMN_Y_MAX,
      ]
      .iter()
      .map(|c| c.to_string()),
    );
    header
  }

  pub fn record(&self, row: usize) -> Vec<String> {
    let r = &self.rows[row];
    let mut record = Vec::with_capacity(self.value_columns.len() + 6);
    record.push(row.to_string());
    record.extend(r.values.iter().map(|v| v.to_string()));
    record.push(r.class.clone());
    record.push(r.bbox.x_min.to_string());
    record.push(r.bbox.y_min.to_string());
    record.push(r.bbox.x_max.to_string());
    record.push(r.bbox.y_max.to_string());
    record
  }

  pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
    (0..self.rows.len()).map(|i| self.record(i))
  }
}

/// 将一张图片的检测结果整理为表格
///
/// 保留分数不低于 `config.min_score` 的检测（不依赖分数有序），按原顺序输出；
/// 坐标按 `config.frame` 换算为像素；类别 id 通过 `categories` 解析，未知 id 返回错误。
pub fn output_to_table(
  set: &DetectionSet,
  categories: &CategoryIndex,
  config: &PostProcessConfig,
) -> Result<DetectionTable, PostProcessError> {
  config.validate()?;
  if set.boxes.len() != set.scores.len() || set.classes.len() != set.scores.len() {
    return Err(PostProcessError::Misaligned {
      boxes: set.boxes.len(),
      scores: set.scores.len(),
      classes: set.classes.len(),
    });
  }

  let kept = select_above(&set.scores, config.min_score);
  let leading = leading_above(&set.scores, config.min_score);
  if leading != kept.len() {
    warn!(
      "检测分数未按降序排列: 前缀计数 {}，实际保留 {}",
      leading,
      kept.len()
    );
  }
  debug!("保留 {} / {} 个检测", kept.len(), set.len());

  // 其余逐检测的一维输出作为数值列
  let mut value_columns = vec![DETECTION_SCORES.to_string()];
  let mut value_sources: Vec<&[f32]> = vec![set.scores.as_slice()];
  for (name, tensor) in set.extra.iter() {
    if IGNORED_FIELDS.contains(&name.as_str()) {
      continue;
    }
    if tensor.rank() == 1 && tensor.data.len() == set.len() {
      value_columns.push(name.clone());
      value_sources.push(tensor.data.as_slice());
    } else {
      debug!("跳过非逐检测标量输出 {}: {:?}", name, tensor.shape);
    }
  }

  let (width, height) = config.frame.extent(set);
  let mut rows = Vec::with_capacity(kept.len());
  for &i in kept.iter() {
    let class = categories.name_of(set.classes[i])?.to_string();
    rows.push(DetectionRow {
      source_index: i,
      values: value_sources.iter().map(|source| source[i]).collect(),
      class,
      bbox: PixelBox::from_normalized(set.boxes[i], width, height),
    });
  }

  Ok(DetectionTable {
    value_columns,
    rows,
  })
}
