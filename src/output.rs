// 该文件是 Yanbei （雁北） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;

use crate::{model::DetectionSet, postprocess::DetectionTable};

pub trait Render<R>: Sized {
  type Written;
  type Error;
  fn render_result(&self, source: &Path, result: &R) -> Result<Self::Written, Self::Error>;
}

mod csv_record;
pub use self::csv_record::{CsvRecordOutput, LEGACY_OUTPUT_FILE, OutputNaming};

#[cfg(feature = "mask_record")]
mod mask_record;
#[cfg(feature = "mask_record")]
pub use self::mask_record::MaskRecordOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("CSV 写入错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 一张图片的处理结果
pub struct ImageDetections<'a> {
  pub set: &'a DetectionSet,
  pub table: &'a DetectionTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedFiles {
  pub table: PathBuf,
  pub masks: Vec<PathBuf>,
}

/// CSV 表格输出，可选附带掩码图片
pub struct RecordOutput {
  csv: CsvRecordOutput,
  #[cfg(feature = "mask_record")]
  masks: Option<MaskRecordOutput>,
}

impl RecordOutput {
  pub fn new(csv: CsvRecordOutput) -> Self {
    Self {
      csv,
      #[cfg(feature = "mask_record")]
      masks: None,
    }
  }

  #[cfg(feature = "mask_record")]
  pub fn with_masks(mut self, masks: Option<MaskRecordOutput>) -> Self {
    self.masks = masks;
    self
  }
}

impl<'a> Render<ImageDetections<'a>> for RecordOutput {
  type Written = RecordedFiles;
  type Error = OutputError;

  fn render_result(
    &self,
    source: &Path,
    result: &ImageDetections<'a>,
  ) -> Result<Self::Written, Self::Error> {
    let table = self.csv.render_result(source, result.table)?;

    #[cfg(feature = "mask_record")]
    let masks = match &self.masks {
      Some(masks) => masks.record(&table, result.set, result.table)?,
      None => Vec::new(),
    };
    #[cfg(not(feature = "mask_record"))]
    let masks = Vec::new();

    Ok(RecordedFiles { table, masks })
  }
}
