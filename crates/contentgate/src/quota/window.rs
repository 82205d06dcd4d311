//! Time-of-day run windows (`"HH:MM-HH:MM"`).

use std::sync::LazyLock;

use chrono::{NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

static WINDOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{2}):(\d{2})\s*-\s*(\d{2}):(\d{2})\s*$").expect("valid window regex")
});

/// A daily window in local time. `start` is inclusive, `end` exclusive.
/// A window whose end is not after its start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    start_minute: u32,
    end_minute: u32,
}

impl RunWindow {
    pub fn parse(s: &str) -> Option<Self> {
        let caps = WINDOW_RE.captures(s)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (sh, sm, eh, em) = (num(1)?, num(2)?, num(3)?, num(4)?);

        // 24:00 is accepted as an end-of-day marker only.
        let valid = |h: u32, m: u32| h < 24 && m < 60;
        if !valid(sh, sm) || !(valid(eh, em) || (eh == 24 && em == 0)) {
            return None;
        }

        let start_minute = sh * 60 + sm;
        let end_minute = eh * 60 + em;
        if start_minute == end_minute {
            return None;
        }
        Some(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = time.hour() * 60 + time.minute();
        if self.start_minute < self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end_minute < self.start_minute
    }
}

impl std::fmt::Display for RunWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

/// Parses every entry, logging and dropping the malformed ones.
pub fn parse_windows(raw: &[String]) -> Vec<RunWindow> {
    raw.iter()
        .filter_map(|s| {
            let parsed = RunWindow::parse(s);
            if parsed.is_none() {
                log::warn!("Ignoring malformed run window '{}'", s);
            }
            parsed
        })
        .collect()
}

/// Whether `time` falls inside any window. No windows means never.
pub fn in_any_window(windows: &[RunWindow], time: NaiveTime) -> bool {
    windows.iter().any(|w| w.contains(time))
}
