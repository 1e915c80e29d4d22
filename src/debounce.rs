// 该文件是 Shaowang （哨望） 项目的一部分。
// src/debounce.rs - 调用防抖
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

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::state::{KeyValueStore, Lookup, StateStore};

pub trait Clock {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// 固定时刻，测试中用作时钟
impl Clock for DateTime<Utc> {
  fn now(&self) -> DateTime<Utc> {
    *self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Proceed,
  Skip,
}

/// 根据上次调用时间决定是否继续。
///
/// 读后写不是原子的：两个几乎同时到达的调用可能都看到“已过期”并同时继续。
/// 重复分析的代价很低，这里不做分布式锁。
pub struct DebounceGate<'a, S> {
  state: &'a StateStore<'a, S>,
  interval: TimeDelta,
}

impl<'a, S: KeyValueStore> DebounceGate<'a, S> {
  pub fn new(state: &'a StateStore<'a, S>, interval: std::time::Duration) -> Self {
    Self {
      state,
      interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
    }
  }

  pub fn should_proceed(&self, now: DateTime<Utc>) -> Decision {
    match self.state.last_invocation() {
      Lookup::Found(last) => {
        let elapsed = now - last;
        if elapsed < self.interval {
          info!(
            "距上次调用仅 {:.3}s，小于间隔 {}s，跳过",
            elapsed.num_milliseconds() as f64 / 1000.0,
            self.interval.num_seconds()
          );
          return Decision::Skip;
        }
      }
      Lookup::NotFound => info!("首次调用"),
      Lookup::Failed(err) => warn!("读取上次调用时间失败，按首次调用处理: {}", err),
    }

    // 在后续工作开始之前写入
    if let Err(err) = self.state.set_last_invocation(now) {
      warn!("写入调用时间失败: {}", err);
    }
    Decision::Proceed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TableNames;
  use crate::state::{Item, MemoryStore};
  use chrono::TimeZone;
  use std::convert::Infallible;
  use std::fmt;
  use std::sync::Barrier;
  use std::time::Duration;

  #[derive(Debug)]
  struct Offline;

  impl fmt::Display for Offline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("offline")
    }
  }

  impl std::error::Error for Offline {}

  /// 读取总是失败的存储，写入照常
  struct UnreadableStore(MemoryStore);

  impl KeyValueStore for UnreadableStore {
    type Error = Offline;

    fn get(&self, _: &str, _: &str) -> Result<Option<Item>, Offline> {
      Err(Offline)
    }

    fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Offline> {
      match self.0.put(table, key, item) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      }
    }

    fn list(&self, _: &str) -> Result<Vec<Item>, Offline> {
      Err(Offline)
    }
  }

  /// 读完后在栅栏处等待，让并发调用都先读后写
  struct InterleavedStore {
    inner: MemoryStore,
    readers: Barrier,
  }

  impl KeyValueStore for InterleavedStore {
    type Error = Infallible;

    fn get(&self, table: &str, key: &str) -> Result<Option<Item>, Infallible> {
      let item = self.inner.get(table, key)?;
      self.readers.wait();
      Ok(item)
    }

    fn put(&self, table: &str, key: &str, item: Item) -> Result<(), Infallible> {
      self.inner.put(table, key, item)
    }

    fn list(&self, table: &str) -> Result<Vec<Item>, Infallible> {
      self.inner.list(table)
    }
  }

  fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap() + TimeDelta::seconds(secs as i64)
  }

  #[test]
  fn first_invocation_proceeds_and_records_time() {
    let tables = TableNames::default();
    let memory = MemoryStore::new();
    let state = StateStore::new(&memory, &tables);
    let gate = DebounceGate::new(&state, Duration::from_secs(2));

    assert_eq!(gate.should_proceed(at(0)), Decision::Proceed);
    assert_eq!(state.last_invocation().found(), Some(at(0)));
  }

  #[test]
  fn threshold_boundary_is_inclusive_of_proceed() {
    let tables = TableNames::default();
    let memory = MemoryStore::new();
    let state = StateStore::new(&memory, &tables);
    let gate = DebounceGate::new(&state, Duration::from_secs(2));

    assert_eq!(gate.should_proceed(at(10)), Decision::Proceed);
    assert_eq!(gate.should_proceed(at(11)), Decision::Skip);
    // 跳过时不更新时间戳
    assert_eq!(state.last_invocation().found(), Some(at(10)));
    assert_eq!(gate.should_proceed(at(12)), Decision::Proceed);
    assert_eq!(state.last_invocation().found(), Some(at(12)));
  }

  #[test]
  fn malformed_timestamp_is_treated_as_first_invocation() {
    let tables = TableNames::default();
    let memory = MemoryStore::new();
    memory
      .put(
        &tables.util,
        "1",
        Item::from([("timestamp".to_string(), "garbage".to_string())]),
      )
      .unwrap();
    let state = StateStore::new(&memory, &tables);
    let gate = DebounceGate::new(&state, Duration::from_secs(2));

    assert_eq!(gate.should_proceed(at(3)), Decision::Proceed);
    assert_eq!(state.last_invocation().found(), Some(at(3)));
  }

  #[test]
  fn rapid_fire_sequence_only_lets_spaced_calls_through() {
    let tables = TableNames::default();
    let memory = MemoryStore::new();
    let state = StateStore::new(&memory, &tables);
    let gate = DebounceGate::new(&state, Duration::from_secs(5));

    let decisions: Vec<_> = [0, 1, 4, 5, 6, 9]
      .into_iter()
      .map(|t| gate.should_proceed(at(t)))
      .collect();
    assert_eq!(
      decisions,
      vec![
        Decision::Proceed,
        Decision::Skip,
        Decision::Skip,
        Decision::Proceed,
        Decision::Skip,
        Decision::Skip,
      ]
    );
  }

  #[test]
  fn unreadable_store_proceeds() {
    let tables = TableNames::default();
    let store = UnreadableStore(MemoryStore::new());
    let state = StateStore::new(&store, &tables);
    let gate = DebounceGate::new(&state, Duration::from_secs(2));

    assert_eq!(gate.should_proceed(at(0)), Decision::Proceed);
    assert_eq!(gate.should_proceed(at(1)), Decision::Proceed);
    let row = store.0.get(&tables.util, "1").unwrap().unwrap();
    assert_eq!(row["timestamp"], crate::state::format_timestamp(at(1)));
  }

  #[test]
  fn concurrent_reads_before_writes_both_proceed() {
    let tables = TableNames::default();
    let store = InterleavedStore {
      inner: MemoryStore::new(),
      readers: Barrier::new(2),
    };
    let state = StateStore::new(&store, &tables);

    let decisions: Vec<Decision> = std::thread::scope(|scope| {
      let handles: Vec<_> = [0, 1]
        .into_iter()
        .map(|t| {
          let state = &state;
          scope.spawn(move || {
            DebounceGate::new(state, Duration::from_secs(2)).should_proceed(at(t))
          })
        })
        .collect();
      handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
    });
    assert_eq!(decisions, vec![Decision::Proceed, Decision::Proceed]);
    // 再读一次会卡在栅栏上，直接查底层存储
    assert!(store.inner.get(&tables.util, "1").unwrap().is_some());
  }
}
