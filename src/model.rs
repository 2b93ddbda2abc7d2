// 该文件是 Yanbei （雁北） 项目的一部分。
// src/model.rs - 模型
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

use image::GrayImage;
use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型没有输入张量")]
  NoInput,
  #[error("模型缺少输出: {0}")]
  MissingOutput(&'static str),
  #[error("输出 {name} 的形状无效: {shape:?}")]
  InvalidShape { name: String, shape: Vec<usize> },
  #[error("输出 {0} 的数据类型不受支持")]
  UnsupportedOutput(String),
  #[error("批大小必须为 1，输出 {name} 的批大小为 {batch}")]
  BatchSize { name: String, batch: usize },
  #[error("检测结果未对齐: boxes={boxes}, scores={scores}, classes={classes}")]
  Misaligned {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
}

/// 模型的一个命名输出，整型输出在提取时统一转为 f32
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  /// 沿第一个轴每个元素包含的标量个数
  pub fn row_len(&self) -> usize {
    self.shape.iter().skip(1).product()
  }

  pub fn is_shape_consistent(&self) -> bool {
    self.shape.iter().product::<usize>() == self.data.len()
  }

  /// 去掉大小为 1 的批维度
  pub fn squeeze_batch(self, name: &str) -> Result<Tensor, ModelError> {
    match self.shape.first() {
      Some(&1) => Ok(Tensor {
        shape: self.shape[1..].to_vec(),
        data: self.data,
      }),
      Some(&batch) => Err(ModelError::BatchSize {
        name: name.to_string(),
        batch,
      }),
      None => Err(ModelError::InvalidShape {
        name: name.to_string(),
        shape: self.shape,
      }),
    }
  }

  /// 沿第一个轴保留前 n 个元素；零维张量保持不变
  pub fn truncate_rows(mut self, n: usize) -> Tensor {
    if self.shape.is_empty() {
      return self;
    }
    let row_len = self.row_len();
    let kept = self.shape[0].min(n);
    self.shape[0] = kept;
    self.data.truncate(kept * row_len);
    self
  }
}

pub type NamedOutputs = BTreeMap<String, Tensor>;

/// 单张图像的检测结果，批维度已去除并截断到 num_detections
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
  /// 归一化坐标 [y_min, x_min, y_max, x_max]
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub classes: Vec<i64>,
  pub num_detections: usize,
  /// 以检测框为坐标系的原始掩码 [N, mh, mw]
  pub masks: Option<Tensor>,
  /// 映射到整幅图像并二值化（0/1）后的掩码
  pub masks_reframed: Option<Vec<GrayImage>>,
  /// 其余输出，例如 raw_detection_scores
  pub extra: NamedOutputs,
  pub image_height: usize,
  pub image_width: usize,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }
}

mod detection;
pub mod mask;
mod onnx;

pub use self::detection::{
  DETECTION_BOXES, DETECTION_CLASSES, DETECTION_MASKS, DETECTION_SCORES, NUM_DETECTIONS,
};
pub use self::onnx::{OnnxDetector, OnnxDetectorBuilder, resolve_model_file};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn squeeze_and_truncate() {
    let t = Tensor::new(vec![1, 3, 2], vec![0., 1., 2., 3., 4., 5.]);
    let t = t.squeeze_batch("x").unwrap();
    assert_eq!(t.shape, vec![3, 2]);
    let t = t.truncate_rows(2);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![0., 1., 2., 3.]);
    assert!(t.is_shape_consistent());
  }

  #[test]
  fn squeeze_rejects_larger_batches() {
    let t = Tensor::new(vec![2, 1], vec![0., 1.]);
    assert!(matches!(
      t.squeeze_batch("x"),
      Err(ModelError::BatchSize { batch: 2, .. })
    ));
  }
}
