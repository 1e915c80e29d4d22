// 该文件是 Shaowang （哨望） 项目的一部分。
// src/detect.rs - 标签与防护装备检测
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

use std::collections::BTreeMap;
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::BoxError;

#[cfg(feature = "http_backend")]
mod http_detector;
#[cfg(feature = "http_backend")]
pub use self::http_detector::{HttpDetector, HttpDetectorError};

/// 归一化坐标，取值为图像宽高的比例
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
  pub bounding_box: BoundingBox,
  pub confidence: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Label {
  pub name: String,
  pub confidence: f32,
  #[serde(default)]
  pub instances: Vec<Instance>,
}

/// 标签检测服务的原始响应
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LabelResponse {
  #[serde(default)]
  pub labels: Vec<Label>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EquipmentDetection {
  #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bounding_box: Option<BoundingBox>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BodyPart {
  pub name: String,
  #[serde(default)]
  pub equipment_detections: Vec<EquipmentDetection>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Person {
  pub bounding_box: BoundingBox,
  #[serde(default)]
  pub body_parts: Vec<BodyPart>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u32>,
}

/// 防护装备检测服务的原始响应
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PpeResponse {
  #[serde(default)]
  pub persons: Vec<Person>,
  /// 服务响应的 `Date` 头，取自 [`RESPONSE_DATE_POINTER`]
  #[serde(skip)]
  pub response_time: Option<String>,
}

/// 原始响应中响应时间所在的位置
pub const RESPONSE_DATE_POINTER: &str = "/ResponseMetadata/HTTPHeaders/date";

/// 归一化后的标签：无实例时只有名称和置信度
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LabelSummary {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub counts: Option<usize>,
  pub confidence: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub position: Option<Vec<Instance>>,
}

impl LabelSummary {
  pub fn instance_count(&self) -> usize {
    self.counts.unwrap_or(0)
  }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WorkerSummary {
  #[serde(rename = "WorkerID")]
  pub worker_id: usize,
  #[serde(rename = "Position")]
  pub bounding_box: BoundingBox,
  /// 按部位名排序输出；同名部位只保留最后一个
  #[serde(rename = "HavePPE")]
  pub equipment: BTreeMap<String, bool>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PpeSummary {
  #[serde(rename = "Number of Persons")]
  pub person_count: usize,
  #[serde(rename = "Persons")]
  pub persons: Vec<WorkerSummary>,
  #[serde(rename = "Current Time", skip_serializing_if = "Option::is_none")]
  pub current_time: Option<String>,
}

pub fn summarize_labels(response: &LabelResponse) -> Vec<LabelSummary> {
  response
    .labels
    .iter()
    .map(|label| {
      if label.instances.is_empty() {
        LabelSummary {
          name: label.name.clone(),
          counts: None,
          confidence: label.confidence,
          position: None,
        }
      } else {
        LabelSummary {
          name: label.name.clone(),
          counts: Some(label.instances.len()),
          confidence: label.confidence,
          position: Some(label.instances.clone()),
        }
      }
    })
    .collect()
}

/// 按左边界从左到右编号，相同左边界保持原有顺序。
///
/// 描述中的“左/中/右”依赖这个顺序。
pub fn summarize_ppe(response: &PpeResponse) -> PpeSummary {
  let mut persons: Vec<&Person> = response.persons.iter().collect();
  // sort_by 是稳定排序
  persons.sort_by(|a, b| a.bounding_box.left.total_cmp(&b.bounding_box.left));

  let persons: Vec<WorkerSummary> = persons
    .into_iter()
    .enumerate()
    .map(|(worker_id, person)| WorkerSummary {
      worker_id,
      bounding_box: person.bounding_box,
      equipment: person
        .body_parts
        .iter()
        .map(|part| (part.name.clone(), !part.equipment_detections.is_empty()))
        .collect(),
    })
    .collect();

  PpeSummary {
    person_count: persons.len(),
    persons,
    current_time: response.response_time.clone(),
  }
}

/// 被检测图像在对象存储中的位置
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
  pub bucket: &'a str,
  pub key: &'a str,
}

/// 检测服务返回完整的响应体，原样落库，类型化解析在 [`detect_all`] 中完成
pub trait Detector: Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect_labels(&self, image: ImageRef<'_>) -> Result<Value, Self::Error>;
  fn detect_ppe(&self, image: ImageRef<'_>) -> Result<Value, Self::Error>;
}

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("标签检测失败: {0}")]
  Labels(#[source] BoxError),
  #[error("防护装备检测失败: {0}")]
  Ppe(#[source] BoxError),
}

#[derive(Debug, Clone)]
pub struct Detections {
  /// 服务原始响应，包含类型中未建模的字段
  pub raw_labels: Value,
  pub raw_ppe: Value,
  pub labels: LabelResponse,
  pub ppe: PpeResponse,
  pub label_summary: Vec<LabelSummary>,
  pub ppe_summary: PpeSummary,
}

/// 两路检测互不依赖，并行执行；任意一路失败即整体失败
pub fn detect_all<D: Detector>(
  detector: &D,
  image: ImageRef<'_>,
) -> Result<Detections, DetectionError> {
  let (labels, ppe) = thread::scope(|scope| {
    let ppe = scope.spawn(|| detector.detect_ppe(image));
    let labels = detector.detect_labels(image);
    let ppe = ppe
      .join()
      .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
    (labels, ppe)
  });

  let raw_labels = labels.map_err(|err| DetectionError::Labels(Box::new(err)))?;
  let raw_ppe = ppe.map_err(|err| DetectionError::Ppe(Box::new(err)))?;

  let labels = LabelResponse::deserialize(&raw_labels)
    .map_err(|err| DetectionError::Labels(Box::new(err)))?;
  let mut ppe =
    PpeResponse::deserialize(&raw_ppe).map_err(|err| DetectionError::Ppe(Box::new(err)))?;
  ppe.response_time = raw_ppe
    .pointer(RESPONSE_DATE_POINTER)
    .and_then(Value::as_str)
    .map(str::to_string);

  let label_summary = summarize_labels(&labels);
  let ppe_summary = summarize_ppe(&ppe);
  info!(
    "检测完成: {} 个标签, {} 名人员",
    label_summary.len(),
    ppe_summary.person_count
  );

  Ok(Detections {
    raw_labels,
    raw_ppe,
    labels,
    ppe,
    label_summary,
    ppe_summary,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn person(left: f32, top: f32, parts: &[(&str, bool)]) -> Person {
    Person {
      bounding_box: BoundingBox {
        left,
        top,
        width: 0.1,
        height: 0.3,
      },
      body_parts: parts
        .iter()
        .map(|(name, covered)| BodyPart {
          name: name.to_string(),
          equipment_detections: if *covered {
            vec![EquipmentDetection {
              kind: Some("HEAD_COVER".to_string()),
              confidence: Some(99.0),
              bounding_box: None,
            }]
          } else {
            vec![]
          },
        })
        .collect(),
      confidence: None,
      id: None,
    }
  }

  #[test]
  fn label_without_instances_has_no_counts_or_position() {
    let response: LabelResponse = serde_json::from_value(json!({
      "Labels": [
        {"Name": "Outdoors", "Confidence": 97.5, "Instances": []},
        {"Name": "Person", "Confidence": 99.1, "Instances": [
          {"BoundingBox": {"Left": 0.1, "Top": 0.2, "Width": 0.3, "Height": 0.4}, "Confidence": 99.1},
          {"BoundingBox": {"Left": 0.6, "Top": 0.2, "Width": 0.2, "Height": 0.4}, "Confidence": 80.0}
        ]}
      ]
    }))
    .unwrap();

    let summary = summarize_labels(&response);
    let value = serde_json::to_value(&summary).unwrap();

    assert_eq!(value[0], json!({"Name": "Outdoors", "Confidence": 97.5}));
    assert_eq!(value[1]["Counts"], json!(2));
    assert_eq!(value[1]["Position"].as_array().unwrap().len(), 2);
    assert_eq!(summary[1].instance_count(), 2);
    assert_eq!(summary[0].instance_count(), 0);
  }

  #[test]
  fn labels_without_instances_field_parse() {
    let response: LabelResponse =
      serde_json::from_value(json!({"Labels": [{"Name": "Sky", "Confidence": 90.0}]})).unwrap();
    assert!(response.labels[0].instances.is_empty());
  }

  #[test]
  fn workers_are_numbered_left_to_right_and_stable_on_ties() {
    let response = PpeResponse {
      persons: vec![
        person(0.7, 0.0, &[("HEAD", true)]),
        person(0.2, 0.1, &[("HEAD", false)]),
        person(0.2, 0.9, &[("FACE", true)]),
        person(0.05, 0.0, &[]),
      ],
      response_time: Some("Mon, 04 May 2026 08:00:00 GMT".to_string()),
    };

    let summary = summarize_ppe(&response);

    assert_eq!(summary.person_count, 4);
    let lefts: Vec<f32> = summary.persons.iter().map(|p| p.bounding_box.left).collect();
    assert_eq!(lefts, vec![0.05, 0.2, 0.2, 0.7]);
    let ids: Vec<usize> = summary.persons.iter().map(|p| p.worker_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    // 相同左边界保持输入顺序
    assert_eq!(summary.persons[1].bounding_box.top, 0.1);
    assert_eq!(summary.persons[2].bounding_box.top, 0.9);
    assert_eq!(summary.persons[1].equipment.get("HEAD"), Some(&false));
    assert_eq!(summary.persons[2].equipment.get("FACE"), Some(&true));
    assert!(summary.persons[0].equipment.is_empty());

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["Number of Persons"], json!(4));
    assert_eq!(value["Current Time"], json!("Mon, 04 May 2026 08:00:00 GMT"));
    assert_eq!(value["Persons"][3]["WorkerID"], json!(3));
  }

  #[test]
  fn body_parts_are_keyed_by_name() {
    let response = PpeResponse {
      persons: vec![person(
        0.1,
        0.0,
        &[("RIGHT_HAND", true), ("HEAD", true), ("FACE", false), ("HEAD", false)],
      )],
      response_time: None,
    };

    let summary = summarize_ppe(&response);
    let json = serde_json::to_string(&summary.persons[0]).unwrap();
    assert!(json.ends_with(r#""HavePPE":{"FACE":false,"HEAD":false,"RIGHT_HAND":true}}"#));
  }

  #[derive(Debug, Error)]
  #[error("service unavailable")]
  struct Unavailable;

  struct FlakyDetector {
    labels: Value,
    fail_ppe: bool,
  }

  impl FlakyDetector {
    fn new(labels: Value) -> Self {
      Self {
        labels,
        fail_ppe: false,
      }
    }
  }

  impl Detector for FlakyDetector {
    type Error = Unavailable;

    fn detect_labels(&self, _: ImageRef<'_>) -> Result<Value, Unavailable> {
      Ok(self.labels.clone())
    }

    fn detect_ppe(&self, _: ImageRef<'_>) -> Result<Value, Unavailable> {
      if self.fail_ppe {
        return Err(Unavailable);
      }
      Ok(json!({
        "ProtectiveEquipmentModelVersion": "1.0",
        "Persons": [{"BoundingBox": {"Left": 0.3, "Top": 0.0, "Width": 0.1, "Height": 0.3}}],
        "ResponseMetadata": {"HTTPHeaders": {"date": "Mon, 04 May 2026 08:00:00 GMT"}}
      }))
    }
  }

  const IMAGE: ImageRef<'static> = ImageRef {
    bucket: "b",
    key: "img.jpg",
  };

  #[test]
  fn detect_all_combines_both_calls() {
    let detections = detect_all(&FlakyDetector::new(json!({"Labels": []})), IMAGE).unwrap();
    assert!(detections.label_summary.is_empty());
    assert_eq!(detections.ppe_summary.person_count, 1);
    assert_eq!(
      detections.ppe_summary.current_time.as_deref(),
      Some("Mon, 04 May 2026 08:00:00 GMT")
    );
  }

  #[test]
  fn raw_responses_keep_unmodelled_fields() {
    let labels = json!({
      "LabelModelVersion": "3.0",
      "Labels": [{"Name": "Person", "Confidence": 99.0, "Parents": [{"Name": "Human"}]}]
    });
    let detections = detect_all(&FlakyDetector::new(labels.clone()), IMAGE).unwrap();

    assert_eq!(detections.raw_labels, labels);
    assert!(detections.raw_labels["Labels"][0].get("Instances").is_none());
    assert_eq!(detections.raw_ppe["ProtectiveEquipmentModelVersion"], json!("1.0"));
    assert_eq!(detections.labels.labels[0].name, "Person");
  }

  #[test]
  fn either_call_failing_fails_the_stage() {
    let detector = FlakyDetector {
      fail_ppe: true,
      ..FlakyDetector::new(json!({"Labels": []}))
    };
    let err = detect_all(&detector, IMAGE).unwrap_err();
    assert!(matches!(err, DetectionError::Ppe(_)));
  }

  #[test]
  fn undecodable_response_fails_the_stage() {
    let detector = FlakyDetector::new(json!({"Labels": [{"Name": 7}]}));
    let err = detect_all(&detector, IMAGE).unwrap_err();
    assert!(matches!(err, DetectionError::Labels(_)));
  }
}
