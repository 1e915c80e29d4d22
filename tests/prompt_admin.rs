// 该文件是 Shaowang （哨望） 项目的一部分。
// tests/prompt_admin.rs - 提示词管理与结果查询测试
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

use chrono::{TimeZone, Utc};
use url::Url;

use shaowang::{
  FromUrl,
  config::TableNames,
  inference::Classification,
  output::{IncidentRecord, LATEST_RECORD_ID, Record},
  prompt::{DEFAULT_PROMPT_ID, PromptResolver, PromptSource},
  state::{StateBackend, StateStore, StoredPrompt},
};

fn backend(dir: &tempfile::TempDir) -> StateBackend {
  let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
  StateBackend::from_url(&url).unwrap()
}

#[test]
fn prompts_survive_across_store_instances() {
  let dir = tempfile::tempdir().unwrap();
  let tables = TableNames::default();

  {
    let store = backend(&dir);
    let state = StateStore::new(&store, &tables);
    state.put_prompt("night", "dark? {label_result}").unwrap();
    state.put_prompt("day", "bright? {ppe_result}").unwrap();
    state.put_prompt("night", "still dark? {label_result}").unwrap();
    state.select_prompt("night").unwrap();
  }

  let store = backend(&dir);
  let state = StateStore::new(&store, &tables);
  let resolver = PromptResolver::new(&state);
  let catalog = resolver.catalog().unwrap();
  assert_eq!(catalog.selected_id, "night");
  assert_eq!(
    catalog.prompts,
    vec![
      StoredPrompt {
        id: "day".to_string(),
        prompt: "bright? {ppe_result}".to_string(),
      },
      StoredPrompt {
        id: "night".to_string(),
        prompt: "still dark? {label_result}".to_string(),
      },
    ]
  );

  let template = resolver.resolve(&resolver.active_prompt_id());
  assert_eq!(template.source, PromptSource::Stored);
  assert_eq!(template.render("L", "P"), "still dark? L");
}

#[test]
fn empty_store_lists_nothing_and_selects_default() {
  let dir = tempfile::tempdir().unwrap();
  let tables = TableNames::default();
  let store = backend(&dir);
  let state = StateStore::new(&store, &tables);

  let catalog = PromptResolver::new(&state).catalog().unwrap();
  assert!(catalog.prompts.is_empty());
  assert_eq!(catalog.selected_id, DEFAULT_PROMPT_ID);
  assert!(Record::new(&state).latest().found().is_none());
}

#[test]
fn latest_result_is_read_back_from_disk() {
  let dir = tempfile::tempdir().unwrap();
  let tables = TableNames::default();
  let store = backend(&dir);
  let state = StateStore::new(&store, &tables);

  Record::new(&state)
    .persist(&IncidentRecord {
      id: LATEST_RECORD_ID.to_string(),
      timestamp: Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap(),
      caption: "Empty yard.".to_string(),
      model_name: "model".to_string(),
      raw_labels: r#"{"Labels":[]}"#.to_string(),
      raw_ppe: r#"{"Persons":[]}"#.to_string(),
      source_location: "file:///in/b/img.jpg".to_string(),
      annotated_location: "file:///out/content/images/img.jpg".to_string(),
      classification: Classification::NoIncident,
    })
    .unwrap();

  let reopened = backend(&dir);
  let state = StateStore::new(&reopened, &tables);
  let item = Record::new(&state).latest().found().unwrap();
  assert_eq!(item["id"], "1");
  assert_eq!(item["caption"], "Empty yard.");
  assert_eq!(item["classification"], "0");
  assert_eq!(item["rekognition_labels"], r#"{"Labels":[]}"#);
}
