//! Schedule - 取得対象の (timestamp, band, resolution, sector) 列挙
//!
//! I/O を持たない純粋な列挙です。同じ入力からは常に同じ列が得られ、
//! `keys()` / `groups()` を何度呼んでも最初からやり直せます。
//!
//! # 順序
//! - timestamp は新しい順（anchor, anchor-10m, ...）
//! - 同じ timestamp の中では sector ごとにまとめ、その中で combo 順
//!
//! sector ごとにまとめるのは、通知の単位が (timestamp, sector) だからです。

use chrono::{DateTime, Duration, Utc};

use super::key::{ArtifactKey, Combo, Sector, floor_to_grid};

/// One (timestamp, sector) slice of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGroup {
    pub capture_time: DateTime<Utc>,
    pub sector: Sector,
    pub keys: Vec<ArtifactKey>,
}

/// Schedule は lookback 期間ぶんの取得対象
#[derive(Debug, Clone)]
pub struct Schedule {
    anchor: DateTime<Utc>,
    lookback: u32,
    step: Duration,
    combos: Vec<Combo>,
    sectors: Vec<Sector>,
}

impl Schedule {
    /// `now` は grid に切り捨ててから使います。
    pub fn new(
        now: DateTime<Utc>,
        lookback: u32,
        step: Duration,
        combos: &[Combo],
        sectors: &[Sector],
    ) -> Self {
        Self {
            anchor: floor_to_grid(now),
            lookback,
            step,
            combos: combos.to_vec(),
            sectors: sectors.to_vec(),
        }
    }

    /// Capture times, newest first.
    pub fn windows(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.lookback).map(move |i| floor_to_grid(self.anchor - self.step * i as i32))
    }

    pub fn groups(&self) -> impl Iterator<Item = WindowGroup> + '_ {
        self.windows().flat_map(move |capture_time| {
            self.sectors.iter().map(move |&sector| WindowGroup {
                capture_time,
                sector,
                keys: self
                    .combos
                    .iter()
                    .map(|&combo| ArtifactKey::new(capture_time, combo, sector))
                    .collect(),
            })
        })
    }

    /// Flat view of [`Schedule::groups`].
    pub fn keys(&self) -> impl Iterator<Item = ArtifactKey> + '_ {
        self.groups().flat_map(|group| group.keys)
    }

    pub fn len(&self) -> usize {
        self.lookback as usize * self.combos.len() * self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
