//! ArtifactKey: identity of one Himawari-8 full-disk segment.
//!
//! A key is (capture time, band, resolution, sector). The path on the remote server and
//! the object names in the store are derived from it, so two ingestions of the same key
//! always land on the same object.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capture grid of the Advanced Himawari Imager (full disk every 10 minutes).
pub const CAPTURE_STEP_MINUTES: i64 = 10;

const STEM_TIME_FORMAT: &str = "%Y%m%d_%H%M";

/// Sensor channel (AHI bands 1..=16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Band(pub u8);

/// Pixel resolution tier (`R05` = 0.5 km, `R10` = 1 km, `R20` = 2 km).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resolution(pub u8);

/// Geographic segment of the full disk (1..=10, north to south).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sector(pub u8);

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{:02}", self.0)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{:02}", self.0)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}", self.0)
    }
}

/// A band paired with the resolution it is published at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combo {
    pub band: Band,
    pub resolution: Resolution,
}

impl Combo {
    pub const fn new(band: u8, resolution: u8) -> Self {
        Self {
            band: Band(band),
            resolution: Resolution(resolution),
        }
    }
}

/// Visible and near-infrared bands at their native resolution.
pub const DEFAULT_COMBOS: [Combo; 4] = [
    Combo::new(1, 10),
    Combo::new(2, 10),
    Combo::new(3, 5),
    Combo::new(4, 10),
];

/// Segments covering the region of interest.
pub const DEFAULT_SECTORS: [Sector; 3] = [Sector(7), Sector(8), Sector(9)];

/// Floors `t` to the capture grid.
pub fn floor_to_grid(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    let floored = secs - secs.rem_euclid(CAPTURE_STEP_MINUTES * 60);
    DateTime::from_timestamp(floored, 0).unwrap_or(t)
}

/// Identity of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    capture_time: DateTime<Utc>,
    pub band: Band,
    pub resolution: Resolution,
    pub sector: Sector,
}

impl ArtifactKey {
    /// Builds a key; `capture_time` is floored to the 10-minute grid.
    pub fn new(capture_time: DateTime<Utc>, combo: Combo, sector: Sector) -> Self {
        Self {
            capture_time: floor_to_grid(capture_time),
            band: combo.band,
            resolution: combo.resolution,
            sector,
        }
    }

    pub fn capture_time(&self) -> DateTime<Utc> {
        self.capture_time
    }

    pub fn combo(&self) -> Combo {
        Combo {
            band: self.band,
            resolution: self.resolution,
        }
    }

    /// `HS_H08_20240101_1200_B01_FLDK_R10_S0710`
    pub fn file_stem(&self) -> String {
        format!(
            "HS_H08_{}_{}_FLDK_{}_{}10",
            self.capture_time.format(STEM_TIME_FORMAT),
            self.band,
            self.resolution,
            self.sector
        )
    }

    /// Path of the compressed segment relative to the remote root.
    pub fn remote_path(&self) -> String {
        let t = self.capture_time;
        format!(
            "/hsd/{}/{}/{}/{}.DAT.bz2",
            t.format("%Y%m"),
            t.format("%d"),
            t.format("%H"),
            self.file_stem()
        )
    }

    /// Name of the decoded raw object in the store.
    pub fn object_name(&self, raw_prefix: &str) -> String {
        format!("{}/{}", raw_prefix.trim_end_matches('/'), self.file_stem())
    }

    /// Name of the image the downstream renderer produces for this key.
    pub fn rendered_name(&self, rendered_prefix: &str) -> String {
        format!("{}/{}.png", rendered_prefix.trim_end_matches('/'), self.file_stem())
    }

    /// Inverse of [`ArtifactKey::file_stem`]. Returns `None` for anything that is not a
    /// well-formed stem.
    pub fn parse_stem(stem: &str) -> Option<Self> {
        let rest = stem.strip_prefix("HS_H08_")?;
        let (date, rest) = rest.split_at_checked(13)?;
        let capture_time = NaiveDateTime::parse_from_str(date, STEM_TIME_FORMAT).ok()?;
        let mut parts = rest.strip_prefix('_')?.split('_');

        let band = parse_tagged(parts.next()?, 'B')?;
        if parts.next()? != "FLDK" {
            return None;
        }
        let resolution = parse_tagged(parts.next()?, 'R')?;
        let sector_field = parts.next()?.strip_suffix("10")?;
        let sector = parse_tagged(sector_field, 'S')?;
        if parts.next().is_some() {
            return None;
        }

        let key = Self {
            capture_time: Utc.from_utc_datetime(&capture_time),
            band: Band(band),
            resolution: Resolution(resolution),
            sector: Sector(sector),
        };
        // reject off-grid times so that parse(format(k)) == k is the only way in
        (key.capture_time == floor_to_grid(key.capture_time)).then_some(key)
    }

    /// Parses the key out of an object name such as `himawari8/<stem>` or
    /// `himawari8-rendered/<stem>.png`.
    pub fn parse_object_name(name: &str) -> Option<Self> {
        let file = name.rsplit('/').next()?;
        let stem = file
            .strip_suffix(".png")
            .or_else(|| file.strip_suffix(".DAT"))
            .unwrap_or(file);
        Self::parse_stem(stem)
    }
}

fn parse_tagged(field: &str, tag: char) -> Option<u8> {
    let digits = field.strip_prefix(tag)?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Fixed textual encoding of a capture time (`YYYYMMDD_HHMM`), shared by file names and
/// change notifications.
pub fn format_capture_time(t: DateTime<Utc>) -> String {
    t.format(STEM_TIME_FORMAT).to_string()
}
