// 该文件是 Yanbei （雁北） 项目的一部分。
// src/output/mask_record.rs - 实例掩码图片输出
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

use image::GrayImage;
use tracing::{debug, warn};

use crate::{model::DetectionSet, output::OutputError, postprocess::DetectionTable};

const MASK_FOREGROUND: u8 = 255;

/// 与表格文件并列写出 `<表格名>-mask-<行号>.png`
#[derive(Debug, Default, Clone)]
pub struct MaskRecordOutput;

impl MaskRecordOutput {
  pub fn new() -> Self {
    Self
  }

  pub fn mask_path(table_path: &Path, row: usize) -> PathBuf {
    let stem = table_path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    table_path.with_file_name(format!("{}-mask-{}.png", stem, row))
  }

  pub fn record(
    &self,
    table_path: &Path,
    set: &DetectionSet,
    table: &DetectionTable,
  ) -> Result<Vec<PathBuf>, OutputError> {
    let Some(masks) = set.masks_reframed.as_ref() else {
      if !table.is_empty() {
        warn!("模型没有输出掩码，跳过 {}", table_path.display());
      }
      return Ok(Vec::new());
    };

    let mut written = Vec::with_capacity(table.len());
    for (row, detection) in table.rows.iter().enumerate() {
      let Some(mask) = masks.get(detection.source_index) else {
        continue;
      };
      let path = Self::mask_path(table_path, row);
      to_visible(mask).save(&path)?;
      written.push(path);
    }
    debug!("写入 {} 张掩码", written.len());
    Ok(written)
  }
}

fn to_visible(mask: &GrayImage) -> GrayImage {
  let mut visible = mask.clone();
  for pixel in visible.pixels_mut() {
    if pixel[0] != 0 {
      pixel[0] = MASK_FOREGROUND;
    }
  }
  visible
}
