// 该文件是 Yanbei （雁北） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测模型
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

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::DynValue;
use tracing::{debug, error, info};

use crate::{
  frame::AsNhwcFrame,
  model::{DetectionSet, Model, ModelError, NamedOutputs, Tensor},
};

const DEFAULT_MODEL_FILE: &str = "model.onnx";
const ONNX_EXTENSION: &str = "onnx";

pub struct OnnxDetector<Frame> {
  session: Session,
  input_name: String,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct OnnxDetectorBuilder {
  model_path: PathBuf,
  intra_threads: Option<usize>,
}

/// 模型路径可以是 .onnx 文件，也可以是包含 model.onnx 或唯一 .onnx 文件的目录
pub fn resolve_model_file(path: &Path) -> Result<PathBuf, ModelError> {
  if path.is_file() {
    return Ok(path.to_path_buf());
  }
  if !path.is_dir() {
    return Err(ModelError::ModelPathError(format!(
      "{} 不存在",
      path.display()
    )));
  }

  let default = path.join(DEFAULT_MODEL_FILE);
  if default.is_file() {
    return Ok(default);
  }

  let mut candidates = Vec::new();
  for entry in std::fs::read_dir(path)? {
    let candidate = entry?.path();
    let is_onnx = candidate
      .extension()
      .map(|ext| ext.eq_ignore_ascii_case(ONNX_EXTENSION))
      .unwrap_or(false);
    if is_onnx && candidate.is_file() {
      candidates.push(candidate);
    }
  }

  match candidates.len() {
    1 => Ok(candidates.remove(0)),
    0 => Err(ModelError::ModelPathError(format!(
      "目录 {} 中没有 .onnx 模型文件",
      path.display()
    ))),
    n => Err(ModelError::ModelPathError(format!(
      "目录 {} 中有 {} 个 .onnx 文件，请直接指定模型文件",
      path.display(),
      n
    ))),
  }
}

impl OnnxDetectorBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      intra_threads: None,
    }
  }

  pub fn intra_threads(mut self, threads: Option<usize>) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn build<Frame>(self) -> Result<OnnxDetector<Frame>, ModelError> {
    let model_file = resolve_model_file(&self.model_path).inspect_err(|e| error!("{}", e))?;
    info!("加载模型文件: {}", model_file.display());
    let size = std::fs::metadata(&model_file)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&model_file)?;
    info!("模型加载完成");

    let input_name = match session.inputs.first() {
      Some(input) => input.name.clone(),
      None => {
        error!("模型没有输入张量");
        return Err(ModelError::NoInput);
      }
    };
    debug!("模型输入: {}", input_name);
    for output in session.outputs.iter() {
      debug!("模型输出: {}", output.name);
    }

    Ok(OnnxDetector {
      session,
      input_name,
      _phantom: std::marker::PhantomData,
    })
  }
}

/// TensorFlow 导出的输出名可能带有 `:0` 后缀
fn normalize_output_name(name: &str) -> &str {
  name.split(':').next().unwrap_or(name)
}

fn extract_tensor(name: &str, value: &DynValue) -> Result<Tensor, ModelError> {
  fn to_shape(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
  }

  if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
    return Ok(Tensor::new(to_shape(&shape), data.to_vec()));
  }
  if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
    return Ok(Tensor::new(
      to_shape(&shape),
      data.iter().map(|&v| v as f32).collect(),
    ));
  }
  if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
    return Ok(Tensor::new(
      to_shape(&shape),
      data.iter().map(|&v| v as f32).collect(),
    ));
  }
  if let Ok((shape, data)) = value.try_extract_tensor::<f64>() {
    return Ok(Tensor::new(
      to_shape(&shape),
      data.iter().map(|&v| v as f32).collect(),
    ));
  }
  if let Ok((shape, data)) = value.try_extract_tensor::<u8>() {
    return Ok(Tensor::new(
      to_shape(&shape),
      data.iter().map(|&v| v as f32).collect(),
    ));
  }
  Err(ModelError::UnsupportedOutput(name.to_string()))
}

impl<Frame: AsNhwcFrame> Model for OnnxDetector<Frame> {
  type Input = Frame;
  type Output = DetectionSet;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (height, width) = (input.height(), input.width());
    let shape = input.batched_shape();

    debug!("设置模型输入 {:?}", shape);
    let tensor = ort::value::Tensor::from_array((shape, input.as_nhwc().to_vec().into_boxed_slice()))?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])?;

    let mut named = NamedOutputs::new();
    for (name, value) in outputs.iter() {
      let tensor = extract_tensor(name, &value)?;
      debug!("输出 {}: {:?}", name, tensor.shape);
      named.insert(normalize_output_name(name).to_string(), tensor);
    }
    drop(outputs);

    DetectionSet::from_outputs(named, height, width)
  }
}
