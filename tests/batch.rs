// 该文件是 Yanbei （雁北） 项目的一部分。
// tests/batch.rs - 批量任务集成测试
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

use std::path::Path;
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use image::RgbImage;
use yanbei::{
  frame::{AsNhwcFrame, RgbNhwcFrame},
  input::ImageFileInput,
  label::CategoryIndex,
  model::{DetectionSet, Model},
  output::{CsvRecordOutput, LEGACY_OUTPUT_FILE, OutputNaming, RecordOutput},
  task::{BatchTask, FailurePolicy, Task},
};

const LABELMAP: &str = r#"
item {
  name: "/m/01g317"
  id: 1
  display_name: "person"
}
item {
  name: "/m/0k4j"
  id: 3
  display_name: "car"
}
"#;

/// 按图片宽度给出不同的结果：宽 4 的图片检测到行人，其余检测到汽车
struct FakeModel {
  calls: usize,
}

impl Model for FakeModel {
  type Input = RgbNhwcFrame;
  type Output = DetectionSet;
  type Error = std::io::Error;

  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<DetectionSet, Self::Error> {
    self.calls += 1;
    let class = if input.width() == 4 { 1 } else { 3 };
    Ok(DetectionSet {
      boxes: vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0], [0.1, 0.1, 0.2, 0.2]],
      scores: vec![0.9, 0.6, 0.3],
      classes: vec![class, class, class],
      num_detections: 3,
      image_height: input.height(),
      image_width: input.width(),
      ..Default::default()
    })
  }
}

fn categories() -> CategoryIndex {
  CategoryIndex::parse(LABELMAP, true).unwrap()
}

fn save_image(dir: &Path, name: &str, width: u32, height: u32) {
  RgbImage::new(width, height).save(dir.join(name)).unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
  std::fs::read_to_string(path)
    .unwrap()
    .lines()
    .map(|l| l.to_string())
    .collect()
}

#[test]
fn two_images_produce_two_tables() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);
  save_image(images.path(), "b.png", 8, 8);

  let categories = categories();
  let summary = BatchTask::new(&categories)
    .run_task(
      ImageFileInput::from_path(images.path()).unwrap(),
      FakeModel { calls: 0 },
      RecordOutput::new(CsvRecordOutput::new(out.path())),
    )
    .unwrap();

  assert_eq!(summary.processed, 2);
  assert_eq!(summary.detections, 4);
  assert!(summary.skipped.is_empty());

  let a = read_lines(&out.path().join("a.csv"));
  let b = read_lines(&out.path().join("b.csv"));
  assert_eq!(a[0], ",detection_scores,class,x min,y min,x max,y max");
  assert_eq!(a.len(), 3);
  assert_eq!(a[1], "0,0.9,person,0,0,256,256");
  assert_eq!(a[2], "1,0.6,person,256,256,512,512");
  assert_eq!(b[1], "0,0.9,car,0,0,256,256");
}

#[test]
fn single_file_mode_keeps_last_image_only() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);
  save_image(images.path(), "b.png", 8, 8);

  let categories = categories();
  let output = CsvRecordOutput::new(out.path())
    .naming(OutputNaming::Single(LEGACY_OUTPUT_FILE.to_string()));
  let summary = BatchTask::new(&categories)
    .run_task(
      ImageFileInput::from_path(images.path()).unwrap(),
      FakeModel { calls: 0 },
      RecordOutput::new(output),
    )
    .unwrap();

  assert_eq!(summary.processed, 2);
  let entries: Vec<_> = std::fs::read_dir(out.path()).unwrap().collect();
  assert_eq!(entries.len(), 1);
  let lines = read_lines(&out.path().join(LEGACY_OUTPUT_FILE));
  assert_eq!(lines.len(), 3);
  assert!(lines[1..].iter().all(|l| l.contains(",car,")));
}

#[test]
fn corrupt_image_aborts_by_default() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);
  std::fs::write(images.path().join("b.png"), b"broken").unwrap();
  save_image(images.path(), "c.png", 8, 8);

  let categories = categories();
  let result = BatchTask::new(&categories).run_task(
    ImageFileInput::from_path(images.path()).unwrap(),
    FakeModel { calls: 0 },
    RecordOutput::new(CsvRecordOutput::new(out.path())),
  );

  let err = result.unwrap_err();
  assert!(format!("{:#}", err).contains("b.png"));
  assert!(out.path().join("a.csv").exists());
  assert!(!out.path().join("c.csv").exists());
}

#[test]
fn keep_going_skips_corrupt_image() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);
  std::fs::write(images.path().join("b.png"), b"broken").unwrap();
  save_image(images.path(), "c.png", 8, 8);

  let categories = categories();
  let summary = BatchTask::new(&categories)
    .with_policy(FailurePolicy::Skip)
    .run_task(
      ImageFileInput::from_path(images.path()).unwrap(),
      FakeModel { calls: 0 },
      RecordOutput::new(CsvRecordOutput::new(out.path())),
    )
    .unwrap();

  assert_eq!(summary.processed, 2);
  assert_eq!(summary.skipped.len(), 1);
  assert!(summary.skipped[0].source.ends_with("b.png"));
  assert!(out.path().join("c.csv").exists());

  let json = serde_json::to_value(&summary).unwrap();
  assert_eq!(json["processed"], 2);
  assert_eq!(json["items"].as_array().unwrap().len(), 2);
}

#[test]
fn stop_flag_ends_the_batch() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);
  save_image(images.path(), "b.png", 8, 8);

  let stop = Arc::new(AtomicBool::new(false));
  stop.store(true, Ordering::SeqCst);

  let categories = categories();
  let summary = BatchTask::new(&categories)
    .with_stop_flag(Some(stop))
    .run_task(
      ImageFileInput::from_path(images.path()).unwrap(),
      FakeModel { calls: 0 },
      RecordOutput::new(CsvRecordOutput::new(out.path())),
    )
    .unwrap();

  assert!(summary.interrupted);
  assert_eq!(summary.processed, 0);
}

#[test]
fn unknown_class_fails_the_image() {
  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "a.png", 4, 4);

  let categories = CategoryIndex::parse("item { id: 3 name: \"car\" }", true).unwrap();
  let result = BatchTask::new(&categories).run_task(
    ImageFileInput::from_path(images.path()).unwrap(),
    FakeModel { calls: 0 },
    RecordOutput::new(CsvRecordOutput::new(out.path())),
  );
  assert!(result.is_err());
}

/// 输出与图片同尺寸的掩码，第一个检测覆盖左上角像素
#[cfg(feature = "mask_record")]
struct FakeMaskModel;

#[cfg(feature = "mask_record")]
impl Model for FakeMaskModel {
  type Input = RgbNhwcFrame;
  type Output = DetectionSet;
  type Error = std::io::Error;

  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<DetectionSet, Self::Error> {
    let (width, height) = (input.width() as u32, input.height() as u32);
    let mut first = image::GrayImage::new(width, height);
    first.put_pixel(0, 0, image::Luma([1]));
    let second = image::GrayImage::new(width, height);
    Ok(DetectionSet {
      boxes: vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]],
      scores: vec![0.9, 0.2],
      classes: vec![1, 3],
      num_detections: 2,
      masks_reframed: Some(vec![first, second]),
      image_height: input.height(),
      image_width: input.width(),
      ..Default::default()
    })
  }
}

#[cfg(feature = "mask_record")]
#[test]
fn masks_and_summary_are_written_for_kept_rows() {
  use yanbei::output::MaskRecordOutput;

  let images = tempfile::tempdir().unwrap();
  let out = tempfile::tempdir().unwrap();
  save_image(images.path(), "street.png", 4, 3);

  let categories = categories();
  let output = RecordOutput::new(CsvRecordOutput::new(out.path()))
    .with_masks(Some(MaskRecordOutput::new()));
  let summary = BatchTask::new(&categories)
    .run_task(
      ImageFileInput::from_path(images.path()).unwrap(),
      FakeMaskModel,
      output,
    )
    .unwrap();

  assert_eq!(summary.processed, 1);
  assert_eq!(summary.detections, 1);
  let mask_path = out.path().join("street-mask-0.png");
  assert_eq!(summary.items[0].masks, vec![mask_path.clone()]);
  assert!(!out.path().join("street-mask-1.png").exists());

  let mask = image::open(&mask_path).unwrap().into_luma8();
  assert_eq!(mask.dimensions(), (4, 3));
  assert_eq!(mask.get_pixel(0, 0)[0], 255);
  assert_eq!(mask.get_pixel(3, 2)[0], 0);

  let summary_path = out.path().join("summary.json");
  summary.save(&summary_path).unwrap();
  let json: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
  assert_eq!(json["processed"], 1);
  assert_eq!(json["interrupted"], false);
  assert_eq!(
    json["items"][0]["masks"][0].as_str().unwrap(),
    mask_path.to_str().unwrap()
  );
  assert_eq!(
    json["items"][0]["output"].as_str().unwrap(),
    out.path().join("street.csv").to_str().unwrap()
  );
}
