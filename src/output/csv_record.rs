// 该文件是 Yanbei （雁北） 项目的一部分。
// src/output/csv_record.rs - CSV 目录记录输出
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

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Datelike, Utc};
use tracing::debug;

use crate::{
  output::{OutputError, Render},
  postprocess::DetectionTable,
};

pub const LEGACY_OUTPUT_FILE: &str = "detections.csv";
const CSV_EXTENSION: &str = "csv";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputNaming {
  /// 每张图片一个文件，文件名取自图片
  #[default]
  PerImage,
  /// 所有图片写同一个文件，每张图片覆盖上一张
  Single(String),
}

pub struct CsvRecordOutput {
  directory: PathBuf,
  naming: OutputNaming,
  dated: bool,
  used_names: Mutex<HashSet<PathBuf>>,
}

impl CsvRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      naming: OutputNaming::default(),
      dated: false,
      used_names: Mutex::new(HashSet::new()),
    }
  }

  pub fn naming(mut self, naming: OutputNaming) -> Self {
    self.naming = naming;
    self
  }

  /// 写入 <directory>/YYYY/MM/DD
  pub fn dated(mut self, dated: bool) -> Self {
    self.dated = dated;
    self
  }

  fn target_directory(&self) -> Result<PathBuf, OutputError> {
    let directory = if self.dated {
      let now = Utc::now();
      self
        .directory
        .join(now.year().to_string())
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()))
    } else {
      self.directory.clone()
    };
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(directory)
  }

  /// 由图片路径得到输出路径；同名图片（如 a.png 与 a.jpg）不会互相覆盖
  pub fn table_path(&self, source: &Path) -> Result<PathBuf, OutputError> {
    let directory = self.target_directory()?;

    let stem = match &self.naming {
      OutputNaming::Single(name) => return Ok(directory.join(name)),
      OutputNaming::PerImage => source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string()),
    };
    let ext = source
      .extension()
      .map(|e| e.to_string_lossy().into_owned())
      .unwrap_or_default();

    let mut used = self
      .used_names
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut candidates = vec![directory.join(format!("{}.{}", stem, CSV_EXTENSION))];
    if !ext.is_empty() {
      candidates.push(directory.join(format!("{}-{}.{}", stem, ext, CSV_EXTENSION)));
    }
    let path = match candidates.into_iter().find(|p| !used.contains(p)) {
      Some(path) => path,
      None => (2..)
        .map(|n| directory.join(format!("{}-{}.{}", stem, n, CSV_EXTENSION)))
        .find(|p| !used.contains(p))
        .unwrap_or_else(|| directory.join(format!("{}.{}", stem, CSV_EXTENSION))),
    };
    used.insert(path.clone());
    Ok(path)
  }
}

pub fn write_table(path: &Path, table: &DetectionTable) -> Result<(), OutputError> {
  let mut writer = csv::Writer::from_path(path)?;
  writer.write_record(table.header())?;
  for record in table.records() {
    writer.write_record(&record)?;
  }
  writer.flush()?;
  Ok(())
}

impl Render<DetectionTable> for CsvRecordOutput {
  type Written = PathBuf;
  type Error = OutputError;

  fn render_result(&self, source: &Path, table: &DetectionTable) -> Result<PathBuf, OutputError> {
    let path = self.table_path(source)?;
    write_table(&path, table)?;
    debug!("写入 {} 行到 {}", table.len(), path.display());
    Ok(path)
  }
}
