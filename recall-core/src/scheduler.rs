use crate::{ReviewResponse, SrsConfig, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const EASE_MIN: u32 = 130;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleOutcome {
    pub interval: f32,
    pub ease: u32,
}

/// Count of items already assigned to each day offset (0 = today, negative =
/// overdue). Scoped to one pass; every `schedule` call during the pass with
/// the histogram supplied mutates it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueDateHistogram(BTreeMap<i64, u32>);

impl DueDateHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, offset: i64) {
        *self.0.entry(offset).or_insert(0) += 1;
    }

    pub fn count(&self, offset: i64) -> u32 {
        self.0.get(&offset).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

/// Map a review response and current scheduling state to the next
/// interval/ease. Pure and deterministic: identical inputs (including
/// histogram contents) always produce identical output.
///
/// `delay_before_review_ms` is how long past the due date the review
/// happened; reviewing early clamps to zero and is never penalized.
/// When `due_dates` is supplied the rounded interval is fuzzed within a
/// bounded window to flatten the number of items due per day.
pub fn schedule(
    response: ReviewResponse,
    interval: f32,
    ease: u32,
    delay_before_review_ms: i64,
    config: &SrsConfig,
    due_dates: Option<&mut DueDateHistogram>,
) -> ScheduleOutcome {
    let delay_days = delay_before_review_ms.div_euclid(MS_PER_DAY).max(0) as f32;

    let mut interval = interval;
    let mut ease = ease;
    match response {
        ReviewResponse::Easy => {
            ease += 20;
            interval = (interval + delay_days) * ease as f32 / 100.0;
            interval *= config.easy_bonus;
        }
        ReviewResponse::Good => {
            interval = (interval + delay_days / 2.0) * ease as f32 / 100.0;
        }
        ReviewResponse::Hard => {
            ease = ease.saturating_sub(20).max(EASE_MIN);
            interval = ((interval + delay_days / 4.0) * config.lapses_interval_change).max(1.0);
        }
        // Reset clears scheduling state host-side; interval math does not
        // apply, so the inputs pass through untouched.
        ReviewResponse::Reset => return ScheduleOutcome { interval, ease },
    }

    // Load balancing replaces random fuzz: within the fuzz window, move to
    // the earliest offset with a strictly smaller assigned count.
    if let Some(due_dates) = due_dates {
        let rounded = interval.round() as i64;
        let (lo, hi) = fuzz_range(rounded);

        let mut chosen = rounded;
        for offset in lo..=hi {
            if due_dates.count(offset) < due_dates.count(chosen) {
                chosen = offset;
            }
        }
        due_dates.record(chosen);
        interval = chosen as f32;
    }

    interval = interval.min(config.maximum_interval as f32);

    ScheduleOutcome {
        interval: (interval * 10.0).round() / 10.0,
        ease,
    }
}

fn fuzz_range(interval: i64) -> (i64, i64) {
    if interval < 2 {
        (1, 1)
    } else if interval == 2 {
        (2, 3)
    } else {
        let fuzz = if interval < 7 {
            1
        } else if interval < 30 {
            ((interval as f32 * 0.15).floor() as i64).max(2)
        } else {
            ((interval as f32 * 0.05).floor() as i64).max(4)
        };
        (interval - fuzz, interval + fuzz)
    }
}

/// Human-readable form of an interval in days.
pub fn text_interval(interval: f32) -> String {
    let months = (interval / 3.0).round() / 10.0;
    let years = (interval / 36.5).round() / 10.0;

    if interval < 30.0 {
        if interval == 1.0 {
            "1.0 day".to_string()
        } else {
            format!("{} days", interval)
        }
    } else if interval < 365.0 {
        if months == 1.0 {
            "1.0 month".to_string()
        } else {
            format!("{} months", months)
        }
    } else if years == 1.0 {
        "1.0 year".to_string()
    } else {
        format!("{} years", years)
    }
}
