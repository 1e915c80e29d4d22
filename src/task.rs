// 该文件是 Shaowang （哨望） 项目的一部分。
// src/task.rs - 事件处理流程编排
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

use std::fmt;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::BoxError;
use crate::config::PipelineConfig;
use crate::debounce::{Clock, DebounceGate, Decision, SystemClock};
use crate::detect::{Detections, Detector, ImageRef, detect_all};
use crate::event::{EventError, HandlerResponse, IncidentEvent};
use crate::inference::{InferenceAdapter, InferenceClient, InferenceResult};
use crate::output::{Draw, IncidentRecord, LATEST_RECORD_ID, Record, annotated_key, output_format};
use crate::prompt::{PromptResolver, PromptTemplate};
use crate::state::{KeyValueStore, StateStore};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  DebounceCheck,
  PromptResolve,
  Download,
  Detect,
  Infer,
  Annotate,
  Persist,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::DebounceCheck => "debounce_check",
      Stage::PromptResolve => "prompt_resolve",
      Stage::Download => "download",
      Stage::Detect => "detect",
      Stage::Infer => "infer",
      Stage::Annotate => "annotate",
      Stage::Persist => "persist",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("事件格式错误: {0}")]
  Event(#[from] EventError),
  #[error("阶段 {stage} 失败: {source}")]
  Stage {
    stage: Stage,
    #[source]
    source: BoxError,
  },
}

trait AtStage<T> {
  fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<BoxError>> AtStage<T> for Result<T, E> {
  fn at(self, stage: Stage) -> Result<T, PipelineError> {
    self.map_err(|err| PipelineError::Stage {
      stage,
      source: err.into(),
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  /// 距上次调用过近，没有做任何工作
  Skipped,
  Done {
    record: IncidentRecord,
    /// 标注图像中绘制的边框数
    boxes: usize,
  },
}

/// 在 `stage` span 中执行一个阶段并记录耗时
fn timed<T>(stage: Stage, f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
  let span = info_span!("stage", %stage);
  let _guard = span.enter();
  let now = Instant::now();
  let result = f();
  match &result {
    Ok(_) => info!("{} 完成，耗时: {:.2?}", stage, now.elapsed()),
    Err(err) => error!("{} 失败，耗时: {:.2?}: {}", stage, now.elapsed(), err),
  }
  result
}

/// 单次事件的处理流程。
///
/// 防抖 → 提示词 → 下载 → 检测 → 推理 → 标注 → 写入。
/// 任意致命错误都会终止后续阶段，不会写入不完整的记录。
pub struct IncidentTask<'a, O, D, C, S, K = SystemClock> {
  config: &'a PipelineConfig,
  objects: &'a O,
  detector: &'a D,
  client: &'a C,
  store: &'a S,
  draw: &'a Draw,
  clock: K,
}

impl<'a, O, D, C, S> IncidentTask<'a, O, D, C, S, SystemClock> {
  pub fn new(
    config: &'a PipelineConfig,
    objects: &'a O,
    detector: &'a D,
    client: &'a C,
    store: &'a S,
    draw: &'a Draw,
  ) -> Self {
    Self {
      config,
      objects,
      detector,
      client,
      store,
      draw,
      clock: SystemClock,
    }
  }
}

impl<'a, O, D, C, S, K> IncidentTask<'a, O, D, C, S, K>
where
  O: ObjectStore,
  D: Detector,
  C: InferenceClient,
  S: KeyValueStore,
  K: Clock,
{
  pub fn with_clock<K2: Clock>(self, clock: K2) -> IncidentTask<'a, O, D, C, S, K2> {
    IncidentTask {
      config: self.config,
      objects: self.objects,
      detector: self.detector,
      client: self.client,
      store: self.store,
      draw: self.draw,
      clock,
    }
  }

  /// 处理一条存储通知，成功和跳过都原样返回事件
  pub fn handle(&self, notification: Value) -> Result<HandlerResponse, PipelineError> {
    let event = IncidentEvent::from_notification(&notification)?;
    self.run_task(&event)?;
    Ok(HandlerResponse::ok(notification))
  }

  pub fn run_task(&self, event: &IncidentEvent) -> Result<Outcome, PipelineError> {
    let span = info_span!("invocation", bucket = %event.bucket, key = %event.key);
    let _guard = span.enter();
    let started = Instant::now();
    info!("开始处理 {}/{}", event.bucket, event.key);

    let state = StateStore::new(self.store, &self.config.tables);
    let now = self.clock.now();

    let decision = timed(Stage::DebounceCheck, || {
      Ok(DebounceGate::new(&state, self.config.interval).should_proceed(now))
    })?;
    if decision == Decision::Skip {
      info!("调用过于频繁，本次跳过");
      return Ok(Outcome::Skipped);
    }

    let template = timed(Stage::PromptResolve, || {
      let resolver = PromptResolver::new(&state);
      Ok(resolver.resolve(&resolver.active_prompt_id()))
    })?;

    let image = timed(Stage::Download, || {
      let bytes = self
        .objects
        .download(&event.bucket, &event.key)
        .at(Stage::Download)?;
      info!("图像下载完成，{} 字节", bytes.len());
      Ok(bytes)
    })?;

    let detections = timed(Stage::Detect, || {
      detect_all(
        self.detector,
        ImageRef {
          bucket: &event.bucket,
          key: &event.key,
        },
      )
      .at(Stage::Detect)
    })?;

    let inference = timed(Stage::Infer, || {
      self.infer(&template, &detections, &image)
    })?;

    let (annotated_location, boxes) = timed(Stage::Annotate, || {
      self.annotate(event, &detections, &image)
    })?;

    // 记录时间取写入时刻，防抖时间戳取调用开始时刻
    let record = IncidentRecord {
      id: LATEST_RECORD_ID.to_string(),
      timestamp: self.clock.now(),
      caption: inference.caption,
      model_name: self.config.model_id.clone(),
      raw_labels: detections.raw_labels.to_string(),
      raw_ppe: detections.raw_ppe.to_string(),
      source_location: self.objects.location(&event.bucket, &event.key),
      annotated_location,
      classification: inference.classification,
    };
    timed(Stage::Persist, || {
      Record::new(&state).persist(&record).at(Stage::Persist)
    })?;

    info!(
      "处理完成，分类: {}，总耗时: {:.2?}",
      record.classification,
      started.elapsed()
    );
    Ok(Outcome::Done { record, boxes })
  }

  fn infer(
    &self,
    template: &PromptTemplate,
    detections: &Detections,
    image: &[u8],
  ) -> Result<InferenceResult, PipelineError> {
    let label_result = serde_json::to_string(&detections.label_summary).at(Stage::Infer)?;
    let ppe_result = serde_json::to_string(&detections.ppe_summary).at(Stage::Infer)?;
    let prompt = template.render(&label_result, &ppe_result);

    InferenceAdapter::new(self.client, &self.config.model_id)
      .infer(image, &prompt)
      .at(Stage::Infer)
  }

  /// 绘制并上传标注图像，返回其位置与边框数
  fn annotate(
    &self,
    event: &IncidentEvent,
    detections: &Detections,
    image: &[u8],
  ) -> Result<(String, usize), PipelineError> {
    let source = image::load_from_memory(image)
      .at(Stage::Annotate)?
      .to_rgb8();
    if !self.draw.has_font() {
      warn!("未加载字体，标签不含文字");
    }
    let annotated = self.draw.render(
      &source,
      &detections.labels.labels,
      self.config.min_confidence,
    );
    info!("绘制了 {} 个边框", annotated.boxes.len());

    let file_name = event.file_name();
    let encoded = annotated
      .encode(output_format(file_name))
      .at(Stage::Annotate)?;
    let location = self
      .objects
      .upload(&self.config.output_bucket, &annotated_key(file_name), &encoded)
      .at(Stage::Annotate)?;
    Ok((location, annotated.boxes.len()))
  }
}
