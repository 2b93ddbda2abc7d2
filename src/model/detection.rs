// 该文件是 Yanbei （雁北） 项目的一部分。
// src/model/detection.rs - 模型输出整理为检测结果
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

use tracing::debug;

use crate::model::{DetectionSet, ModelError, NamedOutputs, Tensor, mask};

pub const DETECTION_BOXES: &str = "detection_boxes";
pub const DETECTION_SCORES: &str = "detection_scores";
pub const DETECTION_CLASSES: &str = "detection_classes";
pub const DETECTION_MASKS: &str = "detection_masks";
pub const NUM_DETECTIONS: &str = "num_detections";

impl DetectionSet {
  /// 由模型的命名输出构造检测结果
  ///
  /// 每个输出都带有大小为 1 的批维度。先读出 `num_detections`，其余输出去掉批维度后
  /// 沿检测轴截断到前 N 个；类别转为 i64；若存在 `detection_masks`，映射到
  /// `image_height` x `image_width` 的图像网格并二值化。
  pub fn from_outputs(
    mut outputs: NamedOutputs,
    image_height: usize,
    image_width: usize,
  ) -> Result<Self, ModelError> {
    let declared = match outputs.remove(NUM_DETECTIONS) {
      Some(tensor) => Some(
        tensor
          .data
          .first()
          .map(|n| n.max(0.0) as usize)
          .ok_or_else(|| ModelError::InvalidShape {
            name: NUM_DETECTIONS.to_string(),
            shape: tensor.shape.clone(),
          })?,
      ),
      None => None,
    };

    let mut reduced = NamedOutputs::new();
    for (name, tensor) in outputs {
      if !tensor.is_shape_consistent() {
        return Err(ModelError::InvalidShape {
          name,
          shape: tensor.shape,
        });
      }
      let tensor = tensor.squeeze_batch(&name)?;
      reduced.insert(name, tensor);
    }

    let scores = reduced
      .remove(DETECTION_SCORES)
      .ok_or(ModelError::MissingOutput(DETECTION_SCORES))?;
    let available = scores.shape.first().copied().unwrap_or(0);
    let n = declared.unwrap_or(available).min(available);
    debug!("num_detections = {} (输出容量 {})", n, available);

    let mut reduced: NamedOutputs = reduced
      .into_iter()
      .map(|(name, tensor)| (name, tensor.truncate_rows(n)))
      .collect();

    let scores = scores.truncate_rows(n);
    if scores.rank() != 1 {
      return Err(ModelError::InvalidShape {
        name: DETECTION_SCORES.to_string(),
        shape: scores.shape,
      });
    }

    let boxes = reduced
      .remove(DETECTION_BOXES)
      .ok_or(ModelError::MissingOutput(DETECTION_BOXES))?;
    if boxes.rank() != 2 || boxes.shape[1] != 4 {
      return Err(ModelError::InvalidShape {
        name: DETECTION_BOXES.to_string(),
        shape: boxes.shape,
      });
    }
    let boxes: Vec<[f32; 4]> = boxes
      .data
      .chunks_exact(4)
      .map(|c| [c[0], c[1], c[2], c[3]])
      .collect();

    let classes = reduced
      .remove(DETECTION_CLASSES)
      .ok_or(ModelError::MissingOutput(DETECTION_CLASSES))?;
    if classes.rank() != 1 {
      return Err(ModelError::InvalidShape {
        name: DETECTION_CLASSES.to_string(),
        shape: classes.shape,
      });
    }
    let classes: Vec<i64> = classes.data.iter().map(|&c| c as i64).collect();

    if boxes.len() != n || classes.len() != n || scores.data.len() != n {
      return Err(ModelError::Misaligned {
        boxes: boxes.len(),
        scores: scores.data.len(),
        classes: classes.len(),
      });
    }

    let masks = reduced.remove(DETECTION_MASKS);
    let masks_reframed = match &masks {
      Some(masks) => {
        debug!("重新映射 {} 个实例掩码", masks.shape.first().unwrap_or(&0));
        Some(mask::reframe_box_masks(
          masks,
          &boxes,
          image_height,
          image_width,
        )?)
      }
      None => None,
    };

    Ok(DetectionSet {
      boxes,
      scores: scores.data,
      classes,
      num_detections: n,
      masks,
      masks_reframed,
      extra: reduced,
      image_height,
      image_width,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn outputs(num: f32) -> NamedOutputs {
    let mut o = NamedOutputs::new();
    o.insert(NUM_DETECTIONS.to_string(), Tensor::new(vec![1], vec![num]));
    o.insert(
      DETECTION_SCORES.to_string(),
      Tensor::new(vec![1, 4], vec![0.9, 0.6, 0.3, 0.1]),
    );
    o.insert(
      DETECTION_CLASSES.to_string(),
      Tensor::new(vec![1, 4], vec![1.0, 2.0, 3.0, 1.0]),
    );
    o.insert(
      DETECTION_BOXES.to_string(),
      Tensor::new(
        vec![1, 4, 4],
        vec![
          0.0, 0.0, 0.5, 0.5, //
          0.1, 0.2, 0.3, 0.4, //
          0.5, 0.5, 1.0, 1.0, //
          0.0, 0.0, 1.0, 1.0,
        ],
      ),
    );
    o.insert(
      "raw_detection_scores".to_string(),
      Tensor::new(vec![1, 6, 2], (0..12).map(|v| v as f32).collect()),
    );
    o
  }

  #[test]
  fn reduces_batch_and_truncates_to_num_detections() {
    let set = DetectionSet::from_outputs(outputs(3.0), 480, 640).unwrap();
    assert_eq!(set.num_detections, 3);
    assert_eq!(set.scores, vec![0.9, 0.6, 0.3]);
    assert_eq!(set.classes, vec![1, 2, 3]);
    assert_eq!(set.boxes.len(), 3);
    assert_eq!(set.boxes[1], [0.1, 0.2, 0.3, 0.4]);
    assert!(set.masks.is_none());
    assert!(set.masks_reframed.is_none());

    // 其余输出同样截断到前 N 个
    let raw = &set.extra["raw_detection_scores"];
    assert_eq!(raw.shape, vec![3, 2]);
    assert_eq!(raw.data.len(), 6);
  }

  #[test]
  fn num_detections_is_capped_by_available_rows() {
    let set = DetectionSet::from_outputs(outputs(100.0), 10, 10).unwrap();
    assert_eq!(set.num_detections, 4);
  }

  #[test]
  fn missing_num_detections_keeps_all_rows() {
    let mut o = outputs(0.0);
    o.remove(NUM_DETECTIONS);
    let set = DetectionSet::from_outputs(o, 10, 10).unwrap();
    assert_eq!(set.len(), 4);
  }

  #[test]
  fn missing_required_output_is_reported() {
    let mut o = outputs(2.0);
    o.remove(DETECTION_CLASSES);
    assert!(matches!(
      DetectionSet::from_outputs(o, 10, 10),
      Err(ModelError::MissingOutput(DETECTION_CLASSES))
    ));
  }

  #[test]
  fn masks_are_reframed_to_image_size() {
    let mut o = outputs(2.0);
    o.insert(
      DETECTION_MASKS.to_string(),
      Tensor::new(vec![1, 4, 2, 2], vec![1.0; 16]),
    );
    let set = DetectionSet::from_outputs(o, 6, 8).unwrap();
    let reframed = set.masks_reframed.unwrap();
    assert_eq!(reframed.len(), 2);
    assert_eq!(reframed[0].dimensions(), (8, 6));
    assert_eq!(set.masks.unwrap().shape, vec![2, 2, 2]);
  }
}
