// 该文件是 Yanbei （雁北） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;

mod read_image_file;

pub use self::read_image_file::{
  IMAGE_EXTENSIONS, ImageFileInput, ImageFileInputIter, InputItem, is_image_file, list_images,
  load_image,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法解码图片 {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("无法读取图片 {path}: {source}")]
  ImageOpenError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("输入路径不存在: {0}")]
  NotFound(PathBuf),
}
