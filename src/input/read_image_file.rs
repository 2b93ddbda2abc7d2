// 该文件是 Yanbei （雁北） 项目的一部分。
// src/input/read_image_file.rs - 图像文件与目录输入
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

use image::ImageReader;
use tracing::{debug, error, info};

use crate::{frame::RgbNhwcFrame, input::InputError};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 读取并解码图片，统一转换为 RGB8
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbNhwcFrame, InputError> {
  let path = path.as_ref();
  let image = ImageReader::open(path)
    .map_err(|source| InputError::ImageOpenError {
      path: path.to_path_buf(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| InputError::ImageOpenError {
      path: path.to_path_buf(),
      source,
    })?
    .decode()
    .map_err(|source| InputError::ImageLoadError {
      path: path.to_path_buf(),
      source,
    })?;

  let image = image.into_rgb8();
  debug!(
    "读取图片 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(RgbNhwcFrame::from(image))
}

pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
    .unwrap_or(false)
}

/// 列出目录下（不递归）的图片文件，按路径排序
pub fn list_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, InputError> {
  let mut paths = Vec::new();
  for entry in std::fs::read_dir(dir.as_ref())? {
    let path = entry?.path();
    if path.is_file() && is_image_file(&path) {
      paths.push(path);
    }
  }
  paths.sort();
  Ok(paths)
}

/// 单张图片或图片目录
#[derive(Debug, Clone)]
pub struct ImageFileInput {
  paths: Vec<PathBuf>,
}

impl ImageFileInput {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
    let path = path.as_ref();
    if path.is_dir() {
      let paths = list_images(path)?;
      info!("目录 {} 中找到 {} 张图片", path.display(), paths.len());
      Ok(Self { paths })
    } else if path.is_file() {
      Ok(Self {
        paths: vec![path.to_path_buf()],
      })
    } else {
      error!("输入路径不存在: {}", path.display());
      Err(InputError::NotFound(path.to_path_buf()))
    }
  }

  pub fn from_paths(paths: Vec<PathBuf>) -> Self {
    Self { paths }
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.paths
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }
}

/// 一次读取的结果，解码失败时保留路径供上层决定跳过或中止
#[derive(Debug)]
pub struct InputItem {
  pub path: PathBuf,
  pub frame: Result<RgbNhwcFrame, InputError>,
}

pub struct ImageFileInputIter {
  inner: std::vec::IntoIter<PathBuf>,
}

impl Iterator for ImageFileInputIter {
  type Item = InputItem;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|path| {
      let frame = load_image(&path);
      InputItem { path, frame }
    })
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.inner.size_hint()
  }
}

impl IntoIterator for ImageFileInput {
  type Item = InputItem;
  type IntoIter = ImageFileInputIter;

  fn into_iter(self) -> Self::IntoIter {
    ImageFileInputIter {
      inner: self.paths.into_iter(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::AsNhwcFrame;
  use image::{Rgb, RgbImage, RgbaImage};

  #[test]
  fn lists_only_supported_images_sorted() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(2, 2).save(dir.path().join("b.png")).unwrap();
    RgbImage::new(2, 2).save(dir.path().join("a.jpg")).unwrap();
    std::fs::write(dir.path().join("c.JPEG"), b"").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let paths = list_images(dir.path()).unwrap();
    let names: Vec<_> = paths
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["a.jpg", "b.png", "c.JPEG"]);
  }

  #[test]
  fn rgba_images_are_converted_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alpha.png");
    let mut image = RgbaImage::new(4, 3);
    image.put_pixel(1, 2, image::Rgba([9, 8, 7, 128]));
    image.save(&path).unwrap();

    let frame = load_image(&path).unwrap();
    assert_eq!((frame.height(), frame.width()), (3, 4));
    assert_eq!(frame.pixel(2, 1), [9, 8, 7]);
  }

  #[test]
  fn corrupt_image_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"not an image").unwrap();
    match load_image(&path) {
      Err(InputError::ImageLoadError { path: p, .. }) => assert_eq!(p, path),
      other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn single_file_and_directory_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.png");
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.save(&path).unwrap();

    let single = ImageFileInput::from_path(&path).unwrap();
    assert_eq!(single.paths(), &[path.clone()]);

    let items: Vec<_> = ImageFileInput::from_path(dir.path()).unwrap().into_iter().collect();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].frame.as_ref().unwrap().pixel(0, 0), [1, 2, 3]);

    assert!(matches!(
      ImageFileInput::from_path(dir.path().join("missing")),
      Err(InputError::NotFound(_))
    ));
  }
}
