// 该文件是 Yanbei （雁北） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
  fn height(&self) -> usize;
  fn width(&self) -> usize;

  /// 推理输入形状 [1, H, W, 3]
  fn batched_shape(&self) -> [usize; 4] {
    [1, self.height(), self.width(), RGB_CHANNELS]
  }
}

/// 形状为 (H, W, 3) 的 u8 RGB 帧，按行优先存储
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  height: usize,
  width: usize,
}

impl RgbNhwcFrame {
  /// 由原始字节构造，长度不符时返回 None
  pub fn from_raw(height: usize, width: usize, data: Vec<u8>) -> Option<Self> {
    if data.len() != height * width * RGB_CHANNELS {
      return None;
    }
    Some(Self {
      data: data.into_boxed_slice(),
      height,
      width,
    })
  }

  pub fn pixel(&self, y: usize, x: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  fn height(&self) -> usize {
    self.height
  }

  fn width(&self) -> usize {
    self.width
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 本身就是 HWC 排列
    Self {
      data: image.into_raw().into_boxed_slice(),
      height: height as usize,
      width: width as usize,
    }
  }
}
