// 该文件是 Yanbei （雁北） 项目的一部分。
// src/model/mask.rs - 实例掩码映射到整幅图像
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

use image::{GrayImage, Luma};

use crate::model::{ModelError, Tensor};

pub const MASK_THRESHOLD: f32 = 0.5;

/// 将 [N, mh, mw] 的框内掩码映射到 height x width 的图像网格，并按阈值二值化
pub fn reframe_box_masks(
  masks: &Tensor,
  boxes: &[[f32; 4]],
  height: usize,
  width: usize,
) -> Result<Vec<GrayImage>, ModelError> {
  if masks.rank() != 3 || !masks.is_shape_consistent() || masks.shape[0] < boxes.len() {
    return Err(ModelError::InvalidShape {
      name: crate::model::DETECTION_MASKS.to_string(),
      shape: masks.shape.clone(),
    });
  }

  let (mask_h, mask_w) = (masks.shape[1], masks.shape[2]);
  let plane = mask_h * mask_w;

  Ok(
    boxes
      .iter()
      .enumerate()
      .map(|(i, bbox)| {
        let mask = &masks.data[i * plane..(i + 1) * plane];
        reframe_box_mask(mask, mask_h, mask_w, *bbox, height, width, MASK_THRESHOLD)
      })
      .collect(),
  )
}

/// 单个掩码的映射。框外为 0，框内双线性采样后与阈值比较，输出 0/1
pub fn reframe_box_mask(
  mask: &[f32],
  mask_h: usize,
  mask_w: usize,
  bbox: [f32; 4],
  height: usize,
  width: usize,
  threshold: f32,
) -> GrayImage {
  let mut out = GrayImage::new(width as u32, height as u32);
  let [y_min, x_min, y_max, x_max] = bbox;
  let (box_h, box_w) = (y_max - y_min, x_max - x_min);

  if mask_h == 0 || mask_w == 0 || box_h <= 0.0 || box_w <= 0.0 {
    return out;
  }

  for row in 0..height {
    let Some(in_y) = source_coord(row, height, y_min, box_h, mask_h) else {
      continue;
    };
    for col in 0..width {
      let Some(in_x) = source_coord(col, width, x_min, box_w, mask_w) else {
        continue;
      };
      let value = bilinear(mask, mask_w, in_y, in_x);
      if value > threshold {
        out.put_pixel(col as u32, row as u32, Luma([1u8]));
      }
    }
  }

  out
}

// 图像像素中心的归一化坐标先换算到框内相对坐标，再换算到掩码像素坐标
fn source_coord(index: usize, size: usize, start: f32, extent: f32, mask_size: usize) -> Option<f32> {
  let normalized = if size > 1 {
    index as f32 / (size - 1) as f32
  } else {
    0.5
  };
  let relative = (normalized - start) / extent;
  if !(0.0..=1.0).contains(&relative) {
    return None;
  }
  Some(relative * (mask_size - 1) as f32)
}

fn bilinear(mask: &[f32], mask_w: usize, y: f32, x: f32) -> f32 {
  let mask_h = mask.len() / mask_w;
  let y0 = y.floor() as usize;
  let x0 = x.floor() as usize;
  let y1 = (y0 + 1).min(mask_h - 1);
  let x1 = (x0 + 1).min(mask_w - 1);
  let (dy, dx) = (y - y0 as f32, x - x0 as f32);

  let top = mask[y0 * mask_w + x0] * (1.0 - dx) + mask[y0 * mask_w + x1] * dx;
  let bottom = mask[y1 * mask_w + x0] * (1.0 - dx) + mask[y1 * mask_w + x1] * dx;
  top * (1.0 - dy) + bottom * dy
}
