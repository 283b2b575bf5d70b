//! Weekly challenges.
//!
//! One challenge is active per Sunday-started week. Which one is a pure
//! function of the week start, so every device picks the same challenge.
//! Every rule is framed as "reach K days"; days without a record or without
//! any logged activity never count.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone};
use serde::Serialize;
use tracing::info;

use crate::{
    day::{DayRecord, DrinkFlag},
    state::{AppState, EventRecord, Language, Sender, XpSource},
    time::to_date_key,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRange {
    pub week_key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub day_keys: Vec<String>,
}

/// Sunday-started week containing `date`.
///
/// The week index is `floor(days since Jan 1 of the start year / 7)`, which
/// differs from ISO-8601 numbering around new year.
pub fn week_range(date: NaiveDate) -> WeekRange {
    let start = date - Duration::days(date.weekday().num_days_from_sunday() as i64);
    let day_keys = (0..7)
        .map(|offset| to_date_key(start + Duration::days(offset)))
        .collect();
    let jan_first = NaiveDate::from_ymd_opt(start.year(), 1, 1).unwrap_or(start);
    let index = (start - jan_first).num_days() / 7;
    WeekRange {
        week_key: format!("{}-W{:02}", start.year(), index),
        start,
        end: start + Duration::days(6),
        day_keys,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayRule {
    WaterGoal,
    BothPills,
    MorningPill,
    EveningPill,
    Flag(DrinkFlag),
    Weighed,
    /// Weigh-in logged before this local hour.
    WeighedBefore(u32),
    /// Weigh-in logged at or after this local hour.
    WeighedFrom(u32),
    Perfect,
    CoffeeAtMost(u32),
}

impl DayRule {
    fn matches(self, day: &DayRecord, cup_ml: u32) -> bool {
        match self {
            DayRule::WaterGoal => day.water_goal_met(cup_ml),
            DayRule::BothPills => day.both_pills(),
            DayRule::MorningPill => day.pills.morning,
            DayRule::EveningPill => day.pills.evening,
            DayRule::Flag(flag) => day.drinks.flag(flag),
            DayRule::Weighed => day.has_weight(),
            DayRule::WeighedBefore(hour) => day.weigh_in_hour().is_some_and(|h| h < hour),
            DayRule::WeighedFrom(hour) => day.weigh_in_hour().is_some_and(|h| h >= hour),
            DayRule::Perfect => day.is_perfect(cup_ml),
            DayRule::CoffeeAtMost(max) => day.has_activity() && day.drinks.coffee <= max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRule {
    Days { rule: DayRule, target: u32 },
    WaterStreak { target: u32 },
    SavedTips { target: u32 },
    ChatMessages { target: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct WeeklyEvent {
    pub id: &'static str,
    title: [&'static str; 2],
    description: [&'static str; 2],
    pub rule: EventRule,
    pub xp: u64,
    pub bonus_percent: f64,
}

impl WeeklyEvent {
    pub fn title(&self, language: Language) -> &'static str {
        language.pick(self.title[0], self.title[1])
    }

    pub fn description(&self, language: Language) -> &'static str {
        language.pick(self.description[0], self.description[1])
    }

    /// Unclamped percentage of the target reached within `day_keys`.
    pub fn raw_progress(&self, day_keys: &[String], state: &AppState) -> f64 {
        let (hits, target) = match self.rule {
            EventRule::Days { rule, target } => {
                let hits = day_keys
                    .iter()
                    .filter_map(|key| state.days.get(key))
                    .filter(|day| rule.matches(day, state.water_cup_ml))
                    .count();
                (hits, target)
            }
            EventRule::WaterStreak { target } => {
                let mut best = 0;
                let mut run = 0;
                for key in day_keys {
                    let met = state
                        .days
                        .get(key)
                        .is_some_and(|day| day.water_goal_met(state.water_cup_ml));
                    run = if met { run + 1 } else { 0 };
                    best = best.max(run);
                }
                (best, target)
            }
            EventRule::SavedTips { target } => {
                let hits = state
                    .saved
                    .iter()
                    .filter(|s| created_within(s.created_at, day_keys))
                    .count();
                (hits, target)
            }
            EventRule::ChatMessages { target } => {
                let hits = state
                    .chat
                    .iter()
                    .filter(|m| m.sender == Sender::User && created_within(m.created_at, day_keys))
                    .count();
                (hits, target)
            }
        };
        if target == 0 {
            return 0.0;
        }
        hits as f64 / target as f64 * 100.0
    }
}

fn created_within(ts: i64, day_keys: &[String]) -> bool {
    Local
        .timestamp_millis_opt(ts)
        .single()
        .map(|dt| to_date_key(dt.date_naive()))
        .is_some_and(|key| day_keys.contains(&key))
}

const fn days(rule: DayRule, target: u32) -> EventRule {
    EventRule::Days { rule, target }
}

pub static EVENTS: [WeeklyEvent; 27] = [
    WeeklyEvent {
        id: "water_boost",
        title: ["Hydration Boost", "Hydration Boost"],
        description: ["Erreiche an 4 Tagen dein Wasserziel.", "Reach your water goal on 4 days."],
        rule: days(DayRule::WaterGoal, 4),
        xp: 120,
        bonus_percent: 0.10,
    },
    WeeklyEvent {
        id: "pill_focus",
        title: ["Pillen-Fokus", "Pill Focus"],
        description: ["An 5 Tagen morgens & abends Pillen.", "Morning & evening pills on 5 days."],
        rule: days(DayRule::BothPills, 5),
        xp: 140,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "ginger_tea_week",
        title: ["Ingwer-Knoblauch-Woche", "Ginger-Garlic Week"],
        description: ["Trinke 3× Ingwer-Knoblauch-Tee.", "Drink ginger-garlic tea 3 times."],
        rule: days(DayRule::Flag(DrinkFlag::GingerGarlicTea), 3),
        xp: 110,
        bonus_percent: 0.07,
    },
    WeeklyEvent {
        id: "sport_spark",
        title: ["Sport-Funken", "Sport Spark"],
        description: ["Aktiviere Sport an 3 Tagen.", "Enable Sport on 3 days."],
        rule: days(DayRule::Flag(DrinkFlag::Sport), 3),
        xp: 130,
        bonus_percent: 0.12,
    },
    WeeklyEvent {
        id: "weigh_in_rhythm",
        title: ["Wiegerhythmus", "Weigh-in Rhythm"],
        description: ["Wiege dich an 4 Tagen.", "Weigh yourself on 4 days."],
        rule: days(DayRule::Weighed, 4),
        xp: 120,
        bonus_percent: 0.06,
    },
    WeeklyEvent {
        id: "water_cure_focus",
        title: ["Wasserkur-Fokus", "Water Cure Focus"],
        description: ["Aktiviere Wasserkur an 2 Tagen.", "Enable Water Cure on 2 days."],
        rule: days(DayRule::Flag(DrinkFlag::WaterCure), 2),
        xp: 90,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "slim_coffee_week",
        title: ["Abnehmkaffee-Woche", "Slim Coffee Week"],
        description: ["Aktiviere Abnehmkaffee an 3 Tagen.", "Enable Slim Coffee on 3 days."],
        rule: days(DayRule::Flag(DrinkFlag::SlimCoffee), 3),
        xp: 100,
        bonus_percent: 0.06,
    },
    WeeklyEvent {
        id: "perfect_day_duo",
        title: ["Perfekt x2", "Perfect x2"],
        description: ["Schaffe 2 perfekte Tage.", "Achieve 2 perfect days."],
        rule: days(DayRule::Perfect, 2),
        xp: 150,
        bonus_percent: 0.15,
    },
    WeeklyEvent {
        id: "evening_pill_focus",
        title: ["Abendroutine", "Evening Routine"],
        description: ["An 5 Tagen Abendpille.", "Evening pill on 5 days."],
        rule: days(DayRule::EveningPill, 5),
        xp: 100,
        bonus_percent: 0.07,
    },
    WeeklyEvent {
        id: "morning_pill_focus",
        title: ["Morgenroutine", "Morning Routine"],
        description: ["An 5 Tagen Morgenpille.", "Morning pill on 5 days."],
        rule: days(DayRule::MorningPill, 5),
        xp: 100,
        bonus_percent: 0.07,
    },
    WeeklyEvent {
        id: "water_streak",
        title: ["Wasser-Streak", "Water Streak"],
        description: ["2 Tage in Folge Wasserziel.", "Water goal 2 days in a row."],
        rule: EventRule::WaterStreak { target: 2 },
        xp: 120,
        bonus_percent: 0.10,
    },
    WeeklyEvent {
        id: "sport_duo",
        title: ["Sport-Duo", "Sport Duo"],
        description: ["2 Sporttage in der Woche.", "2 sport days this week."],
        rule: days(DayRule::Flag(DrinkFlag::Sport), 2),
        xp: 110,
        bonus_percent: 0.12,
    },
    WeeklyEvent {
        id: "weigh_early",
        title: ["Früh gewogen", "Weigh Early"],
        description: ["2× vor 8:00 wiegen.", "Weigh before 8:00 twice."],
        rule: days(DayRule::WeighedBefore(8), 2),
        xp: 120,
        bonus_percent: 0.06,
    },
    WeeklyEvent {
        id: "night_owl",
        title: ["Nachteule", "Night Owl"],
        description: ["2× nach 22:00 tracken.", "Track after 22:00 twice."],
        rule: days(DayRule::WeighedFrom(22), 2),
        xp: 90,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "save_tips",
        title: ["Tipps speichern", "Save tips"],
        description: ["3 Tipps in der Woche speichern.", "Save 3 tips this week."],
        rule: EventRule::SavedTips { target: 3 },
        xp: 90,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "chat_week",
        title: ["Chat-Woche", "Chat Week"],
        description: ["5 Nachrichten an den Coach.", "Send 5 messages to the coach."],
        rule: EventRule::ChatMessages { target: 5 },
        xp: 100,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "water_plus",
        title: ["Mehr Wasser", "More Water"],
        description: ["Wasserziel an 5 Tagen.", "Reach water goal on 5 days."],
        rule: days(DayRule::WaterGoal, 5),
        xp: 140,
        bonus_percent: 0.10,
    },
    WeeklyEvent {
        id: "pills_4",
        title: ["Pillen 4", "Pills 4"],
        description: ["4 Tage beide Pillen.", "4 days both pills."],
        rule: days(DayRule::BothPills, 4),
        xp: 120,
        bonus_percent: 0.06,
    },
    WeeklyEvent {
        id: "sport_plus",
        title: ["Mehr Sport", "More Sport"],
        description: ["4 Sporttage.", "4 sport days."],
        rule: days(DayRule::Flag(DrinkFlag::Sport), 4),
        xp: 160,
        bonus_percent: 0.12,
    },
    WeeklyEvent {
        id: "tea_plus",
        title: ["Mehr Tee", "More Tea"],
        description: ["4× Ingwer-Knoblauch-Tee.", "Tea 4 times."],
        rule: days(DayRule::Flag(DrinkFlag::GingerGarlicTea), 4),
        xp: 120,
        bonus_percent: 0.07,
    },
    WeeklyEvent {
        id: "weigh_5",
        title: ["Wiegen 5", "Weigh 5"],
        description: ["5 Tage wiegen.", "Weigh on 5 days."],
        rule: days(DayRule::Weighed, 5),
        xp: 130,
        bonus_percent: 0.06,
    },
    WeeklyEvent {
        id: "water_cure_plus",
        title: ["Wasserkur +", "Water Cure +"],
        description: ["3 Tage Wasserkur.", "Water Cure 3 days."],
        rule: days(DayRule::Flag(DrinkFlag::WaterCure), 3),
        xp: 110,
        bonus_percent: 0.05,
    },
    WeeklyEvent {
        id: "slim_coffee_plus",
        title: ["Abnehmkaffee +", "Slim Coffee +"],
        description: ["4 Tage Abnehmkaffee.", "Slim Coffee 4 days."],
        rule: days(DayRule::Flag(DrinkFlag::SlimCoffee), 4),
        xp: 120,
        bonus_percent: 0.07,
    },
    WeeklyEvent {
        id: "perfect_triple",
        title: ["Perfekt x3", "Perfect x3"],
        description: ["3 perfekte Tage.", "3 perfect days."],
        rule: days(DayRule::Perfect, 3),
        xp: 180,
        bonus_percent: 0.15,
    },
    WeeklyEvent {
        id: "coffee_3max",
        title: ["Kaffee ≤3", "Coffee ≤3"],
        description: ["Mind. 4 Tage mit ≤3 Kaffees.", "At least 4 days with ≤3 coffees."],
        rule: days(DayRule::CoffeeAtMost(3), 4),
        xp: 140,
        bonus_percent: 0.10,
    },
    WeeklyEvent {
        id: "early_bird",
        title: ["Frühaufsteher", "Early Bird"],
        description: ["3× vor 8:00 wiegen.", "Weigh before 8:00 three times."],
        rule: days(DayRule::WeighedBefore(8), 3),
        xp: 150,
        bonus_percent: 0.08,
    },
    WeeklyEvent {
        id: "night_tracker",
        title: ["Nacht-Tracker", "Night Tracker"],
        description: ["3× nach 22:00 tracken.", "Track after 22:00 three times."],
        rule: days(DayRule::WeighedFrom(22), 3),
        xp: 110,
        bonus_percent: 0.05,
    },
];

pub fn find_event(id: &str) -> Option<&'static WeeklyEvent> {
    EVENTS.iter().find(|e| e.id == id)
}

/// The challenge for the week containing `date`.
pub fn current_weekly_event(date: NaiveDate) -> &'static WeeklyEvent {
    let start = week_range(date).start;
    let seed = start.year() as i64 * 37 + start.month0() as i64 * 5 + start.day() as i64;
    let index = (seed.unsigned_abs() % EVENTS.len() as u64) as usize;
    &EVENTS[index]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventProgress {
    pub percent: u8,
    pub completed: bool,
}

pub fn event_progress(day_keys: &[String], state: &AppState, event: &WeeklyEvent) -> EventProgress {
    let raw = event.raw_progress(day_keys, state);
    if !raw.is_finite() {
        return EventProgress {
            percent: 0,
            completed: false,
        };
    }
    // the display rounds, completion needs the full target
    EventProgress {
        percent: raw.clamp(0.0, 100.0).round() as u8,
        completed: raw >= 100.0,
    }
}

/// Pay out a finished week once. Returns the XP paid, `None` when the week
/// was already claimed.
pub fn complete_event(
    state: &mut AppState,
    week_key: &str,
    event_id: &str,
    base_xp: u64,
    now: DateTime<Local>,
) -> Option<u64> {
    if state
        .event_history
        .get(week_key)
        .is_some_and(|record| record.completed)
    {
        return None;
    }
    let bonus_percent = find_event(event_id).map_or(0.0, |e| e.bonus_percent);
    let bonus = (base_xp as f64 * bonus_percent).round() as u64;
    let total = base_xp + bonus;
    state.event_history.insert(
        week_key.to_string(),
        EventRecord {
            id: event_id.to_string(),
            completed: true,
            xp: total,
        },
    );
    state.award_xp(total, XpSource::Event, format!("{event_id} {week_key}"), now);
    info!(week_key, event_id, xp = total, "weekly event completed");
    Some(total)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekCheck {
    pub week_key: String,
    pub event_id: &'static str,
    pub progress: EventProgress,
    /// XP paid by this check; `None` if nothing new was claimed.
    pub awarded: Option<u64>,
}

/// Evaluate this week's challenge and claim it when it reached 100%.
/// Returns `None` while weekly events are switched off.
pub fn check_weekly_event(state: &mut AppState, now: DateTime<Local>) -> Option<WeekCheck> {
    if !state.events_enabled {
        return None;
    }
    let week = week_range(now.date_naive());
    let event = current_weekly_event(week.start);
    let progress = event_progress(&week.day_keys, state, event);
    let awarded = if progress.completed {
        complete_event(state, &week.week_key, event.id, event.xp, now)
    } else {
        None
    };
    Some(WeekCheck {
        week_key: week.week_key,
        event_id: event.id,
        progress,
        awarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SavedMessage;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(date: NaiveDate, hour: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, 0, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn weeks_start_on_sunday() {
        let week = week_range(d(2024, 5, 1));
        assert_eq!(week.start, d(2024, 4, 28));
        assert_eq!(week.end, d(2024, 5, 4));
        assert_eq!(week.week_key, "2024-W16");
        assert_eq!(week.day_keys.first().unwrap(), "2024-04-28");
        assert_eq!(week.day_keys.len(), 7);
        assert_eq!(week_range(d(2024, 4, 28)), week);
    }

    #[test]
    fn week_key_belongs_to_the_start_year() {
        let week = week_range(d(2025, 1, 1));
        assert_eq!(week.start, d(2024, 12, 29));
        assert_eq!(week.week_key, "2024-W51");
    }

    #[test]
    fn same_event_for_the_whole_week() {
        let first = current_weekly_event(d(2024, 4, 28));
        for offset in 1..7 {
            let day = d(2024, 4, 28) + Duration::days(offset);
            assert_eq!(current_weekly_event(day).id, first.id);
        }
        assert_eq!(first.id, "slim_coffee_week");
        assert_ne!(current_weekly_event(d(2024, 5, 5)).id, first.id);
    }

    #[test]
    fn rounding_up_to_100_does_not_complete() {
        let event = WeeklyEvent {
            id: "long_haul",
            title: ["", ""],
            description: ["", ""],
            rule: days(DayRule::Flag(DrinkFlag::SlimCoffee), 200),
            xp: 0,
            bonus_percent: 0.0,
        };
        let mut state = AppState::default();
        let keys: Vec<String> = (0..200)
            .map(|i| crate::time::to_date_key(d(2024, 1, 1) + Duration::days(i)))
            .collect();
        for i in 0..199 {
            let day = d(2024, 1, 1) + Duration::days(i);
            state.toggle_flag(day, DrinkFlag::SlimCoffee, at(day, 9));
        }
        let progress = event_progress(&keys, &state, &event);
        assert_eq!(progress.percent, 100);
        assert!(!progress.completed);
    }

    #[test]
    fn progress_is_rounded_and_clamped() {
        let mut state = AppState::default();
        let week = week_range(d(2024, 5, 1));
        let event = find_event("slim_coffee_week").unwrap();
        for day in [d(2024, 4, 28), d(2024, 4, 29)] {
            state.toggle_flag(day, DrinkFlag::SlimCoffee, at(day, 9));
        }
        let progress = event_progress(&week.day_keys, &state, event);
        assert_eq!(progress.percent, 67);
        assert!(!progress.completed);

        for day in [d(2024, 4, 30), d(2024, 5, 1), d(2024, 5, 2)] {
            state.toggle_flag(day, DrinkFlag::SlimCoffee, at(day, 9));
        }
        let progress = event_progress(&week.day_keys, &state, event);
        assert_eq!(progress.percent, 100);
        assert!(progress.completed);
    }

    #[test]
    fn coffee_limit_ignores_untouched_days() {
        let mut state = AppState::default();
        let week = week_range(d(2024, 5, 1));
        let event = find_event("coffee_3max").unwrap();
        assert_eq!(event_progress(&week.day_keys, &state, event).percent, 0);

        let day = d(2024, 4, 29);
        state.increment_drink(day, crate::day::DrinkKind::Coffee, 1, at(day, 9));
        assert_eq!(event_progress(&week.day_keys, &state, event).percent, 25);
    }

    #[test]
    fn streak_needs_consecutive_days() {
        let mut state = AppState::default();
        state.water_cup_ml = 1000;
        let week = week_range(d(2024, 5, 1));
        let event = find_event("water_streak").unwrap();
        for day in [d(2024, 4, 28), d(2024, 4, 30)] {
            for _ in 0..2 {
                state.increment_drink(day, crate::day::DrinkKind::Water, 1, at(day, 9));
            }
        }
        assert_eq!(event_progress(&week.day_keys, &state, event).percent, 50);
    }

    #[test]
    fn saved_tips_count_within_the_week() {
        let mut state = AppState::default();
        let week = week_range(d(2024, 5, 1));
        let event = find_event("save_tips").unwrap();
        for (i, day) in [d(2024, 4, 27), d(2024, 4, 29), d(2024, 5, 1)].into_iter().enumerate() {
            state.add_saved(
                SavedMessage {
                    id: i.to_string(),
                    title: "tip".into(),
                    category: None,
                    tags: Vec::new(),
                    text: "drink water".into(),
                    created_at: at(day, 12).timestamp_millis(),
                },
                at(day, 12),
            );
        }
        assert_eq!(event_progress(&week.day_keys, &state, event).percent, 67);
    }

    #[test]
    fn completing_a_week_twice_pays_once() {
        let mut state = AppState::default();
        let now = at(d(2024, 5, 1), 9);
        assert_eq!(complete_event(&mut state, "2024-W16", "sport_spark", 130, now), Some(146));
        assert_eq!(complete_event(&mut state, "2024-W16", "sport_spark", 130, now), None);
        assert_eq!(state.xp, 146);
        assert_eq!(
            state
                .xp_log
                .iter()
                .filter(|e| e.source == XpSource::Event)
                .count(),
            1
        );
    }

    #[test]
    fn disabled_events_are_not_checked() {
        let mut state = AppState::default();
        state.set_events_enabled(false);
        assert!(check_weekly_event(&mut state, at(d(2024, 5, 1), 9)).is_none());
    }
}
