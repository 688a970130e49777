use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail, ensure};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde::de::{self, Deserializer};

pub use mode::SelectionMode;
pub use switch::{
    MAX_SWITCHES_PER_DAY, MIN_SWITCHES_PER_DAY, NextSwitch, SwitchSchedule, compute_switch_times,
    next_due,
};

mod mode {
    use super::*;

    /// How the next batch of gallery photos is chosen from the library.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum SelectionMode {
        #[default]
        Random,
        Newest,
        Oldest,
    }

    impl SelectionMode {
        const ALL: &'static [Self] = &[Self::Random, Self::Newest, Self::Oldest];
        const NAMES: &'static [&'static str] = &["random", "newest", "oldest"];

        pub fn as_str(&self) -> &'static str {
            match self {
                Self::Random => "random",
                Self::Newest => "newest",
                Self::Oldest => "oldest",
            }
        }

        /// Whether this mode ranks photos by capture date.
        pub fn is_date_ranked(&self) -> bool {
            !matches!(self, Self::Random)
        }
    }

    impl fmt::Display for SelectionMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl FromStr for SelectionMode {
        type Err = anyhow::Error;

        fn from_str(raw: &str) -> Result<Self> {
            let wanted = raw.trim().to_ascii_lowercase();
            for mode in Self::ALL {
                if wanted == mode.as_str() {
                    return Ok(*mode);
                }
            }
            bail!(
                "unknown selection mode '{raw}' (expected one of: {})",
                Self::NAMES.join(", ")
            )
        }
    }

    impl<'de> Deserialize<'de> for SelectionMode {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            raw.parse()
                .map_err(|_| de::Error::unknown_variant(&raw, Self::NAMES))
        }
    }
}

mod switch {
    use super::*;

    pub const MIN_SWITCHES_PER_DAY: u32 = 1;
    pub const MAX_SWITCHES_PER_DAY: u32 = 100;

    const DAY_MICROS: i64 = 24 * 60 * 60 * 1_000_000;

    /// Daily switch plan: a main time of day plus how many evenly spaced
    /// switches happen per 24 hours.
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct SwitchSchedule {
        pub main_time: String,
        pub switches_per_day: u32,
    }

    impl Default for SwitchSchedule {
        fn default() -> Self {
            Self {
                main_time: "21:15".to_string(),
                switches_per_day: 1,
            }
        }
    }

    impl SwitchSchedule {
        pub fn validate(&self) -> Result<()> {
            ensure!(
                parse_main_time(&self.main_time).is_some(),
                "schedule.main-time must be HH:MM (got '{}')",
                self.main_time
            );
            ensure!(
                (MIN_SWITCHES_PER_DAY..=MAX_SWITCHES_PER_DAY).contains(&self.switches_per_day),
                "schedule.switches-per-day must be between {} and {} (got {})",
                MIN_SWITCHES_PER_DAY,
                MAX_SWITCHES_PER_DAY,
                self.switches_per_day
            );
            Ok(())
        }

        pub fn times_on(&self, today: NaiveDate) -> Vec<NaiveDateTime> {
            compute_switch_times(&self.main_time, self.switches_per_day, today)
        }

        pub fn next_after(&self, now: NaiveDateTime) -> NextSwitch {
            next_due(&self.times_on(now.date()), now)
        }
    }

    /// Today's switch instants, sorted ascending.
    ///
    /// Returns an empty list when `base_time` is not `HH:MM` or
    /// `switch_count` is outside `1..=100`. Offsets that cross midnight are
    /// folded back onto `today`, so every entry keeps its clock time but
    /// shares the same calendar date.
    pub fn compute_switch_times(
        base_time: &str,
        switch_count: u32,
        today: NaiveDate,
    ) -> Vec<NaiveDateTime> {
        let Some(base) = parse_main_time(base_time) else {
            return Vec::new();
        };
        if !(MIN_SWITCHES_PER_DAY..=MAX_SWITCHES_PER_DAY).contains(&switch_count) {
            return Vec::new();
        }

        let main = NaiveDateTime::new(today, base);
        if switch_count == 1 {
            return vec![main];
        }

        let count = i64::from(switch_count);
        let interval_us = DAY_MICROS / count;
        let mut times: Vec<NaiveDateTime> = (0..count)
            .map(|i| {
                let raw = main + ChronoDuration::microseconds(interval_us * i);
                NaiveDateTime::new(today, raw.time())
            })
            .collect();
        times.sort_unstable();
        times
    }

    /// Next switch strictly after `now`; if every time today has passed the
    /// earliest one is reported as due tomorrow.
    pub fn next_due(times: &[NaiveDateTime], now: NaiveDateTime) -> NextSwitch {
        if let Some(next) = times.iter().find(|t| **t > now) {
            return NextSwitch::Today(*next);
        }
        match times.iter().min() {
            Some(first) => NextSwitch::Tomorrow(*first),
            None => NextSwitch::None,
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum NextSwitch {
        None,
        Today(NaiveDateTime),
        Tomorrow(NaiveDateTime),
    }

    impl fmt::Display for NextSwitch {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::None => f.write_str("No switches scheduled"),
                Self::Today(at) => write!(f, "{}", at.format("%H:%M")),
                Self::Tomorrow(at) => write!(f, "{} (tomorrow)", at.format("%H:%M")),
            }
        }
    }

    fn parse_main_time(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
    }
}
