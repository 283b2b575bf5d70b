//! Menstrual cycle history, predictions and the per-day symptom log.
//!
//! Predictions are estimates from the average gap between recorded starts.
//! With fewer than two starts the default cycle length is used.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CYCLE_LENGTH_DAYS: i64 = 28;
pub const LUTEAL_PHASE_DAYS: i64 = 14;
pub const FERTILE_DAYS_BEFORE_OVULATION: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub start: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl Cycle {
    pub fn open(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FertileWindow {
    pub start: NaiveDate,
    pub ovulation: NaiveDate,
}

/// Everything the predictor can say about the upcoming cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutlook {
    pub average_length_days: f64,
    /// Number of start-to-start gaps the average is based on; zero means the
    /// default length was used.
    pub samples: usize,
    pub next_start: Option<NaiveDate>,
    pub fertile_window: Option<FertileWindow>,
}

fn sorted_starts(cycles: &[Cycle]) -> Vec<NaiveDate> {
    let mut starts: Vec<NaiveDate> = cycles.iter().map(|c| c.start).collect();
    starts.sort();
    starts
}

fn start_gaps(cycles: &[Cycle]) -> Vec<i64> {
    sorted_starts(cycles)
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days())
        .filter(|gap| *gap > 0)
        .collect()
}

pub fn average_cycle_length(cycles: &[Cycle]) -> f64 {
    let gaps = start_gaps(cycles);
    if gaps.is_empty() {
        return DEFAULT_CYCLE_LENGTH_DAYS as f64;
    }
    gaps.iter().sum::<i64>() as f64 / gaps.len() as f64
}

pub fn predict_next_start(cycles: &[Cycle]) -> Option<NaiveDate> {
    let last = sorted_starts(cycles).pop()?;
    let length = average_cycle_length(cycles).round() as i64;
    Some(last + Duration::days(length))
}

pub fn fertile_window(cycles: &[Cycle]) -> Option<FertileWindow> {
    let next = predict_next_start(cycles)?;
    let ovulation = next - Duration::days(LUTEAL_PHASE_DAYS);
    Some(FertileWindow {
        start: ovulation - Duration::days(FERTILE_DAYS_BEFORE_OVULATION),
        ovulation,
    })
}

pub fn outlook(cycles: &[Cycle]) -> CycleOutlook {
    CycleOutlook {
        average_length_days: average_cycle_length(cycles),
        samples: start_gaps(cycles).len(),
        next_start: predict_next_start(cycles),
        fertile_window: fertile_window(cycles),
    }
}

pub fn active_cycle(cycles: &[Cycle]) -> Option<&Cycle> {
    cycles.iter().find(|c| c.is_open())
}

/// Open a new cycle. Returns `false` when one is already open.
pub fn start_cycle(cycles: &mut Vec<Cycle>, date: NaiveDate) -> bool {
    if active_cycle(cycles).is_some() {
        return false;
    }
    cycles.push(Cycle::open(date));
    cycles.sort_by_key(|c| c.start);
    true
}

/// Close the open cycle. Returns `false` when nothing is open or the end
/// would precede the start.
pub fn end_cycle(cycles: &mut [Cycle], date: NaiveDate) -> bool {
    let Some(active) = cycles.iter_mut().find(|c| c.is_open()) else {
        return false;
    };
    if date < active.start {
        return false;
    }
    active.end = Some(date);
    true
}

/// 1-based position of `date` inside the most recent cycle started on or
/// before it.
pub fn cycle_day(cycles: &[Cycle], date: NaiveDate) -> Option<u32> {
    let start = sorted_starts(cycles)
        .into_iter()
        .filter(|start| *start <= date)
        .last()?;
    Some((date - start).num_days() as u32 + 1)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CycleLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pain: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cramps: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nausea: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Partial update for a [`CycleLog`]; out of range scores are clamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleLogPatch {
    pub mood: Option<i32>,
    pub energy: Option<i32>,
    pub pain: Option<i32>,
    pub sleep: Option<i32>,
    pub sex: Option<bool>,
    pub notes: Option<String>,
    pub flow: Option<i32>,
    pub cramps: Option<bool>,
    pub headache: Option<bool>,
    pub nausea: Option<bool>,
}

fn score(value: i32) -> u8 {
    value.clamp(1, 10) as u8
}

impl CycleLog {
    pub fn apply(&mut self, patch: CycleLogPatch, ts: i64) {
        if let Some(v) = patch.mood {
            self.mood = Some(score(v));
        }
        if let Some(v) = patch.energy {
            self.energy = Some(score(v));
        }
        if let Some(v) = patch.pain {
            self.pain = Some(score(v));
        }
        if let Some(v) = patch.sleep {
            self.sleep = Some(score(v));
        }
        if let Some(v) = patch.flow {
            self.flow = Some(v.clamp(0, 10) as u8);
        }
        if patch.sex.is_some() {
            self.sex = patch.sex;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes;
        }
        if patch.cramps.is_some() {
            self.cramps = patch.cramps;
        }
        if patch.headache.is_some() {
            self.headache = patch.headache;
        }
        if patch.nausea.is_some() {
            self.nausea = patch.nausea;
        }
        self.updated_at = Some(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn single_cycle_uses_default_length() {
        let cycles = vec![Cycle::open(d(2024, 1, 1))];
        assert_eq!(predict_next_start(&cycles), Some(d(2024, 1, 29)));
        let window = fertile_window(&cycles).unwrap();
        assert_eq!(window.ovulation, d(2024, 1, 15));
        assert_eq!(window.start, d(2024, 1, 11));
        assert_eq!(outlook(&cycles).samples, 0);
    }

    #[test]
    fn averages_start_gaps() {
        let cycles = vec![
            Cycle {
                start: d(2024, 1, 1),
                end: Some(d(2024, 1, 5)),
            },
            Cycle {
                start: d(2024, 1, 31),
                end: Some(d(2024, 2, 4)),
            },
            Cycle::open(d(2024, 3, 1)),
        ];
        // gaps 30 and 30
        assert_eq!(average_cycle_length(&cycles), 30.0);
        assert_eq!(predict_next_start(&cycles), Some(d(2024, 3, 31)));
    }

    #[test]
    fn no_history_means_no_prediction() {
        assert_eq!(predict_next_start(&[]), None);
        assert_eq!(fertile_window(&[]), None);
    }

    #[test]
    fn only_one_open_cycle() {
        let mut cycles = Vec::new();
        assert!(start_cycle(&mut cycles, d(2024, 1, 1)));
        assert!(!start_cycle(&mut cycles, d(2024, 1, 3)));
        assert_eq!(cycles.len(), 1);
        assert!(!end_cycle(&mut cycles, d(2023, 12, 30)));
        assert!(end_cycle(&mut cycles, d(2024, 1, 5)));
        assert!(!end_cycle(&mut cycles, d(2024, 1, 6)));
        assert!(start_cycle(&mut cycles, d(2024, 1, 29)));
        assert_eq!(cycle_day(&cycles, d(2024, 2, 2)), Some(5));
        assert_eq!(cycle_day(&cycles, d(2023, 12, 1)), None);
    }

    #[test]
    fn log_patch_clamps_scores() {
        let mut log = CycleLog::default();
        log.apply(
            CycleLogPatch {
                mood: Some(14),
                pain: Some(0),
                flow: Some(-3),
                cramps: Some(true),
                ..CycleLogPatch::default()
            },
            42,
        );
        assert_eq!(log.mood, Some(10));
        assert_eq!(log.pain, Some(1));
        assert_eq!(log.flow, Some(0));
        assert_eq!(log.cramps, Some(true));
        assert_eq!(log.updated_at, Some(42));

        log.apply(
            CycleLogPatch {
                notes: Some("tired".into()),
                ..CycleLogPatch::default()
            },
            43,
        );
        assert_eq!(log.mood, Some(10));
        assert_eq!(log.notes.as_deref(), Some("tired"));
    }
}
