//! Weight trend, goal and correlation analytics.
//!
//! Everything here reads a state snapshot and never mutates it.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::{
    state::{AppState, Goal},
    time::parse_date_key,
};

pub const DEFAULT_TREND_WINDOW: usize = 14;
pub const DEFAULT_PLATEAU_WINDOW: usize = 7;
pub const PLATEAU_EPSILON_KG: f64 = 0.1;
pub const MIN_CORRELATION_PAIRS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightPoint {
    pub date: NaiveDate,
    pub weight: f64,
}

/// Logged weights ordered by day.
pub fn weight_series(state: &AppState) -> Vec<WeightPoint> {
    state
        .days
        .iter()
        .filter_map(|(key, day)| {
            Some(WeightPoint {
                date: parse_date_key(key)?,
                weight: day.weight?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendFit {
    pub slope_per_day: f64,
    pub r2: f64,
    pub delta: f64,
}

/// Least squares fit over the last `window` weigh-ins, with the sample index
/// as x. Fewer than two points give a flat fit.
pub fn linear_trend(series: &[WeightPoint], window: usize) -> TrendFit {
    let sub = &series[series.len().saturating_sub(window)..];
    let n = sub.len();
    if n < 2 {
        return TrendFit::default();
    }
    let nf = n as f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for (i, point) in sub.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += point.weight;
        sxx += x * x;
        sxy += x * point.weight;
    }
    let denom = nf * sxx - sx * sx;
    let slope = if denom == 0.0 { 0.0 } else { (nf * sxy - sx * sy) / denom };
    let mean_y = sy / nf;
    let intercept = mean_y - slope * (nf - 1.0) / 2.0;
    let (mut ss_tot, mut ss_res) = (0.0, 0.0);
    for (i, point) in sub.iter().enumerate() {
        let fitted = slope * i as f64 + intercept;
        ss_tot += (point.weight - mean_y).powi(2);
        ss_res += (point.weight - fitted).powi(2);
    }
    let r2 = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).max(0.0)
    };
    TrendFit {
        slope_per_day: slope,
        r2,
        delta: sub[n - 1].weight - sub[0].weight,
    }
}

/// True when the last `window` weigh-ins moved less than `epsilon_kg`.
pub fn plateau_detected(series: &[WeightPoint], window: usize, epsilon_kg: f64) -> bool {
    let sub = &series[series.len().saturating_sub(window)..];
    match (sub.first(), sub.last()) {
        (Some(first), Some(last)) if sub.len() >= 2 => (last.weight - first.weight).abs() < epsilon_kg,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eta {
    pub days: u32,
    pub date: NaiveDate,
}

/// Days until `target` at the current pace. `None` while the trend is flat
/// or points away from the target.
pub fn eta_to_target(current: f64, target: f64, slope_per_day: f64, today: NaiveDate) -> Option<Eta> {
    if !slope_per_day.is_finite() || slope_per_day == 0.0 || !current.is_finite() || !target.is_finite() {
        return None;
    }
    let remaining = target - current;
    if remaining != 0.0 && remaining.signum() != slope_per_day.signum() {
        return None;
    }
    let days = (remaining.abs() / slope_per_day.abs()).ceil();
    if days > u32::MAX as f64 {
        return None;
    }
    let days = days as u32;
    let date = today.checked_add_signed(Duration::days(i64::from(days)))?;
    Some(Eta { days, date })
}

/// Pearson correlation in `[-1, 1]`; 0 below five pairs or with no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < MIN_CORRELATION_PAIRS {
        return 0.0;
    }
    let nf = n as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys).take(n) {
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }
    let cov = sxy / nf - (sx / nf) * (sy / nf);
    let vx = (sxx / nf - (sx / nf).powi(2)).max(0.0);
    let vy = (syy / nf - (sy / nf).powi(2)).max(0.0);
    let denom = (vx * vy).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obesity,
}

impl BmiCategory {
    pub fn classify(bmi: f64) -> Self {
        if bmi < 18.5 {
            BmiCategory::Underweight
        } else if bmi < 25.0 {
            BmiCategory::Normal
        } else if bmi < 30.0 {
            BmiCategory::Overweight
        } else {
            BmiCategory::Obesity
        }
    }
}

/// BMI = kg / m².
pub fn bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if !(weight_kg > 0.0 && height_cm > 0.0) {
        return None;
    }
    let meters = height_cm / 100.0;
    let value = weight_kg / (meters * meters);
    value.is_finite().then_some(value)
}

/// Longest run of consecutive calendar days that were perfect.
pub fn best_perfect_streak(state: &AppState) -> u32 {
    let mut best = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for (key, day) in &state.days {
        let Some(date) = parse_date_key(key) else {
            continue;
        };
        if day.is_perfect(state.water_cup_ml) {
            let continues = previous.is_some_and(|p| p.succ_opt() == Some(date));
            run = if continues { run + 1 } else { 1 };
            previous = Some(date);
            best = best.max(run);
        } else {
            run = 0;
            previous = None;
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedStats {
    /// Average cups over the last 7 recorded days.
    pub water_avg_7: f64,
    pub water_avg_30: f64,
    /// `(last - first) / (weigh-ins - 1)`.
    pub weight_trend_per_day: f64,
    /// Share of recorded days with both pills, 0..=1.
    pub compliance_rate: f64,
    pub best_perfect_streak: u32,
}

pub fn extended_stats(state: &AppState) -> ExtendedStats {
    let days: Vec<_> = state.days.values().collect();
    let water_avg = |n: usize| {
        let tail = &days[days.len().saturating_sub(n)..];
        if tail.is_empty() {
            0.0
        } else {
            tail.iter().map(|d| d.drinks.water as f64).sum::<f64>() / tail.len() as f64
        }
    };
    let weights = weight_series(state);
    let weight_trend_per_day = match (weights.first(), weights.last()) {
        (Some(first), Some(last)) if weights.len() >= 2 => {
            (last.weight - first.weight) / (weights.len() - 1) as f64
        }
        _ => 0.0,
    };
    let compliant = days.iter().filter(|d| d.both_pills()).count();
    ExtendedStats {
        water_avg_7: water_avg(7),
        water_avg_30: water_avg(30),
        weight_trend_per_day,
        compliance_rate: compliant as f64 / days.len().max(1) as f64,
        best_perfect_streak: best_perfect_streak(state),
    }
}

/// Change between the latest weigh-in and the last one more than a week
/// before it (or the first one on record).
pub fn weight_delta_7d(series: &[WeightPoint]) -> f64 {
    let Some(end) = series.last() else {
        return 0.0;
    };
    if series.len() < 2 {
        return 0.0;
    }
    let cut = end.date - Duration::days(7);
    let reference = series
        .iter()
        .rev()
        .find(|p| p.date < cut)
        .unwrap_or(&series[0]);
    end.weight - reference.weight
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlations {
    /// Cups on a day against the weight change to the next weigh-in day.
    pub water_weight: f64,
    pub sport_mood: f64,
    pub coffee_mood: f64,
    pub coffee_sleep: f64,
}

pub fn correlations(state: &AppState) -> Correlations {
    let days: Vec<_> = state.days.iter().collect();

    let mut water = Vec::new();
    let mut weight_change = Vec::new();
    for pair in days.windows(2) {
        let (today, next) = (pair[0].1, pair[1].1);
        if let (Some(w0), Some(w1)) = (today.weight, next.weight) {
            water.push(today.drinks.water as f64);
            weight_change.push(w1 - w0);
        }
    }

    let (mut sport, mut mood) = (Vec::new(), Vec::new());
    let (mut coffee_m, mut mood_c) = (Vec::new(), Vec::new());
    let (mut coffee_s, mut sleep) = (Vec::new(), Vec::new());
    for (key, day) in &days {
        let Some(log) = state.cycle_logs.get(*key) else {
            continue;
        };
        let coffee = day.drinks.coffee as f64;
        if let Some(m) = log.mood {
            sport.push(if day.drinks.sport { 1.0 } else { 0.0 });
            mood.push(m as f64);
            coffee_m.push(coffee);
            mood_c.push(m as f64);
        }
        if let Some(s) = log.sleep {
            coffee_s.push(coffee);
            sleep.push(s as f64);
        }
    }

    Correlations {
        water_weight: pearson(&water, &weight_change),
        sport_mood: pearson(&sport, &mood),
        coffee_mood: pearson(&coffee_m, &mood_c),
        coffee_sleep: pearson(&coffee_s, &sleep),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    /// Share of the planned change already achieved, 0..=100.
    pub percent: f64,
    pub remaining_kg: f64,
    pub days_left: i64,
}

pub fn goal_progress(goal: &Goal, current_weight: f64, today: NaiveDate) -> GoalProgress {
    let planned = goal.start_weight - goal.target_weight;
    let done = goal.start_weight - current_weight;
    let percent = if planned == 0.0 {
        if current_weight == goal.target_weight { 100.0 } else { 0.0 }
    } else {
        (done / planned * 100.0).clamp(0.0, 100.0)
    };
    GoalProgress {
        percent,
        remaining_kg: current_weight - goal.target_weight,
        days_left: (goal.target_date - today).num_days(),
    }
}
