//! Best-effort capture timestamps for photo files.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, LocalResult, NaiveDateTime, TimeDelta, TimeZone};
use exif::{In, Tag, Value};
use tracing::{trace, warn};

/// EXIF fields consulted in priority order.
const EXIF_DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// One step of the date fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Embedded EXIF capture time, interpreted as local time.
    ExifCapture,
    /// Filesystem creation time, where the platform records one.
    FileCreated,
    /// Filesystem last-modified time.
    FileModified,
    /// Current wall-clock time. Always available.
    WallClock,
}

impl DateSource {
    fn resolve(self, path: &Path) -> Option<f64> {
        match self {
            Self::ExifCapture => read_exif_timestamp(path),
            Self::FileCreated => fs::metadata(path)
                .and_then(|meta| meta.created())
                .ok()
                .and_then(system_time_secs),
            Self::FileModified => fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(system_time_secs),
            Self::WallClock => system_time_secs(SystemTime::now()),
        }
    }
}

/// Ordered chain of [`DateSource`]s; the first one with an answer wins.
#[derive(Debug, Clone)]
pub struct DateResolver {
    chain: Vec<DateSource>,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DateResolver {
    pub fn new(read_exif: bool) -> Self {
        let mut chain = Vec::with_capacity(4);
        if read_exif {
            chain.push(DateSource::ExifCapture);
        }
        chain.extend([
            DateSource::FileCreated,
            DateSource::FileModified,
            DateSource::WallClock,
        ]);
        Self { chain }
    }

    /// Timestamp (seconds since the epoch) for `path`. Never fails.
    pub fn resolve(&self, path: &Path) -> f64 {
        self.resolve_with_source(path).0
    }

    /// Like [`resolve`](Self::resolve) but also reports which source answered.
    pub fn resolve_with_source(&self, path: &Path) -> (f64, DateSource) {
        for source in &self.chain {
            if let Some(ts) = source.resolve(path) {
                if *source == DateSource::WallClock {
                    warn!(path = %path.display(), "no usable date; treating photo as just seen");
                } else {
                    trace!(path = %path.display(), ?source, ts, "resolved photo date");
                }
                return (ts, *source);
            }
        }
        // The chain always ends in WallClock; this only runs if the system
        // clock sits before the epoch.
        (0.0, DateSource::WallClock)
    }
}

fn read_exif_timestamp(path: &Path) -> Option<f64> {
    let f = fs::File::open(path).ok()?;
    let mut buf = BufReader::new(f);
    let reader = exif::Reader::new().read_from_container(&mut buf).ok()?;
    for tag in EXIF_DATE_TAGS {
        let Some(field) = reader.get_field(tag, In::PRIMARY) else {
            continue;
        };
        let Value::Ascii(ref parts) = field.value else {
            continue;
        };
        let parsed = parts
            .first()
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(parse_exif_datetime);
        if let Some(ts) = parsed {
            return Some(ts);
        }
    }
    None
}

/// Parse `"YYYY:MM:DD HH:MM:SS"` as local time into epoch seconds.
fn parse_exif_datetime(raw: &str) -> Option<f64> {
    let cleaned = raw.trim_end_matches('\0').trim();
    let naive = NaiveDateTime::parse_from_str(cleaned, "%Y:%m:%d %H:%M:%S").ok()?;
    let ts = wall_clock_to_epoch(naive, |n| {
        Local.from_local_datetime(n).map(|t| t.timestamp())
    })?;
    Some(ts as f64)
}

/// Epoch seconds for a wall-clock time, given a zone lookup. Ambiguous times
/// take the earlier instant; a time inside a spring-forward gap is read with
/// the offset in force just before the gap.
fn wall_clock_to_epoch<F>(naive: NaiveDateTime, lookup: F) -> Option<i64>
where
    F: Fn(&NaiveDateTime) -> LocalResult<i64>,
{
    lookup(&naive).earliest().or_else(|| {
        let before = naive - TimeDelta::hours(1);
        lookup(&before)
            .earliest()
            .map(|ts| ts + TimeDelta::hours(1).num_seconds())
    })
}

fn system_time_secs(t: SystemTime) -> Option<f64> {
    t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs_f64())
}
