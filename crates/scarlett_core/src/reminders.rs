//! Planning side of notifications: which instant, which text.
//!
//! Nothing here talks to the notification service. The tracker service turns
//! these plans into requests and records the returned ids.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, Weekday};

use crate::{
    analytics::{best_perfect_streak, weight_delta_7d, weight_series},
    cycle,
    error::{TrackerError, TrackerResult},
    notifications::{Channel, NotificationRequest, TriggerStrategy},
    state::{AppState, Goal, Language, Reminder, ReminderKind, MAX_CUSTOM_REMINDERS},
    time::{parse_time_of_day, TimeOfDay},
};

pub const GOAL_REMINDER_KEY: &str = "goal_reminder";
pub const WEEKLY_DIGEST_KEY: &str = "weekly_digest";
pub const FALLBACK_TIME: &str = "08:00";

const CYCLE_HOUR: u32 = 9;
const GOAL_HOUR: u32 = 9;
const DIGEST_HOUR: u32 = 18;

/// Local instant for `date` at `time`. A time skipped by a DST jump moves to
/// the first valid instant after it.
pub fn local_at(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    let naive = date.and_time(time);
    naive
        .and_local_timezone(Local)
        .earliest()
        .or_else(|| (naive + Duration::hours(1)).and_local_timezone(Local).earliest())
}

/// Today at `time` if that is still ahead of `now`, otherwise tomorrow.
pub fn next_occurrence(time: TimeOfDay, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let today = now.date_naive();
    match local_at(today, time.to_naive_time()) {
        Some(candidate) if candidate > now => Some(candidate),
        _ => local_at(today.succ_opt()?, time.to_naive_time()),
    }
}

/// Next `weekday` at `time`, strictly after `now`.
pub fn next_weekday_at(
    weekday: Weekday,
    time: TimeOfDay,
    now: DateTime<Local>,
) -> Option<DateTime<Local>> {
    let today = now.date_naive();
    let ahead = (weekday.num_days_from_sunday() as i64 - today.weekday().num_days_from_sunday() as i64)
        .rem_euclid(7);
    let candidate = local_at(today + Duration::days(ahead), time.to_naive_time())?;
    if candidate > now {
        Some(candidate)
    } else {
        local_at(today + Duration::days(ahead + 7), time.to_naive_time())
    }
}

pub fn default_reminders() -> Vec<Reminder> {
    [
        ("pill_morning", ReminderKind::PillsMorning, "08:00"),
        ("pill_evening", ReminderKind::PillsEvening, "20:00"),
        ("weight_morning", ReminderKind::Weight, "07:00"),
        ("water_daily", ReminderKind::Water, "10:00"),
        ("sport_daily", ReminderKind::Sport, "16:00"),
    ]
    .into_iter()
    .map(|(id, kind, time)| Reminder {
        id: id.to_string(),
        kind,
        time: time.to_string(),
        enabled: false,
        label: None,
    })
    .collect()
}

/// Validate a new custom reminder against the cap and its input.
///
/// The cap is checked first so a full list never reaches the parser.
pub fn new_custom_reminder(
    state: &AppState,
    label: &str,
    time: &str,
    now: DateTime<Local>,
) -> TrackerResult<Reminder> {
    if state.custom_reminder_count() >= MAX_CUSTOM_REMINDERS {
        return Err(TrackerError::LimitReached {
            what: "custom reminders",
            limit: MAX_CUSTOM_REMINDERS,
        });
    }
    let label = label.trim();
    if label.is_empty() {
        return Err(TrackerError::InvalidInput("reminder label is empty".into()));
    }
    let time = parse_time_of_day(time)
        .ok_or_else(|| TrackerError::InvalidInput(format!("unrecognised time `{time}`")))?;
    let base = format!("custom_{}", now.timestamp_millis());
    let mut id = base.clone();
    let mut suffix = 1;
    while state.reminder(&id).is_some() {
        id = format!("{base}_{suffix}");
        suffix += 1;
    }
    Ok(Reminder {
        id,
        kind: ReminderKind::Custom,
        time: time.to_string(),
        enabled: false,
        label: Some(label.to_string()),
    })
}

fn reminder_body(kind: ReminderKind, language: Language) -> &'static str {
    match (kind, language) {
        (ReminderKind::PillsMorning | ReminderKind::PillsEvening, Language::De) => {
            "Zeit für deine Tabletten."
        }
        (ReminderKind::PillsMorning | ReminderKind::PillsEvening, Language::Pl) => {
            "Czas na tabletki."
        }
        (ReminderKind::PillsMorning | ReminderKind::PillsEvening, Language::En) => {
            "Time for your pills."
        }
        (ReminderKind::Weight, Language::De) => "Kurz auf die Waage.",
        (ReminderKind::Weight, Language::Pl) => "Czas na ważenie.",
        (ReminderKind::Weight, Language::En) => "Time to weigh in.",
        (ReminderKind::Water, Language::De) => "Ein Glas Wasser?",
        (ReminderKind::Water, Language::Pl) => "Szklanka wody?",
        (ReminderKind::Water, Language::En) => "A glass of water?",
        (ReminderKind::Sport, Language::De) => "Zeit für Bewegung.",
        (ReminderKind::Sport, Language::Pl) => "Czas na ruch.",
        (ReminderKind::Sport, Language::En) => "Time to move.",
        (ReminderKind::Custom, _) => "",
    }
}

pub fn reminder_request(
    reminder: &Reminder,
    language: Language,
    when: DateTime<Local>,
    strategy: TriggerStrategy,
    now: DateTime<Local>,
) -> NotificationRequest {
    NotificationRequest {
        title: reminder.title(language),
        body: reminder_body(reminder.kind, language).to_string(),
        trigger: strategy.trigger_for(when, now),
        channel: Channel::Reminders,
        reminder_id: Some(reminder.id.clone()),
    }
}

/// A notification the service should place, keyed by its meta slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNotification {
    pub key: &'static str,
    pub when: DateTime<Local>,
    pub title: String,
    pub body: String,
    pub channel: Channel,
}

impl PlannedNotification {
    pub fn request(&self, strategy: TriggerStrategy, now: DateTime<Local>) -> NotificationRequest {
        NotificationRequest {
            title: self.title.clone(),
            body: self.body.clone(),
            trigger: strategy.trigger_for(self.when, now),
            channel: self.channel,
            reminder_id: None,
        }
    }
}

pub const CYCLE_NOTIFICATION_KEYS: [&str; 4] = [
    "cycle_period_minus2",
    "cycle_period_day0",
    "cycle_fertile_minus2",
    "cycle_fertile_day0",
];

fn cycle_text(key: &str, language: Language) -> (&'static str, &'static str) {
    match (key, language) {
        ("cycle_period_minus2", Language::De) => ("Periode in 2 Tagen", "Deine Periode beginnt voraussichtlich in 2 Tagen."),
        ("cycle_period_minus2", Language::Pl) => ("Okres za 2 dni", "Twój okres prawdopodobnie zacznie się za 2 dni."),
        ("cycle_period_minus2", _) => ("Period in 2 days", "Your period is expected in 2 days."),
        ("cycle_period_day0", Language::De) => ("Periode heute erwartet", "Deine Periode sollte heute beginnen. Vergiss nicht, sie zu tracken!"),
        ("cycle_period_day0", Language::Pl) => ("Okres oczekiwany dzisiaj", "Twój okres powinien się dzisiaj rozpocząć."),
        ("cycle_period_day0", _) => ("Period expected today", "Your period should start today. Don't forget to track it!"),
        ("cycle_fertile_minus2", Language::De) => ("Fruchtbare Phase in 2 Tagen", "Deine fruchtbare Phase beginnt in 2 Tagen."),
        ("cycle_fertile_minus2", Language::Pl) => ("Okno płodności za 2 dni", "Twoje okno płodności zaczyna się za 2 dni."),
        ("cycle_fertile_minus2", _) => ("Fertile window in 2 days", "Your fertile window starts in 2 days."),
        (_, Language::De) => ("Fruchtbare Phase beginnt", "Deine fruchtbare Phase beginnt heute."),
        (_, Language::Pl) => ("Rozpoczyna się okno płodności", "Twoje okno płodności zaczyna się dzisiaj."),
        (_, Language::En) => ("Fertile window begins", "Your fertile window starts today."),
    }
}

/// Upcoming cycle notifications at 09:00, dropping any already in the past.
pub fn plan_cycle_notifications(state: &AppState, now: DateTime<Local>) -> Vec<PlannedNotification> {
    let Some(next_start) = cycle::predict_next_start(&state.cycles) else {
        return Vec::new();
    };
    let Some(window) = cycle::fertile_window(&state.cycles) else {
        return Vec::new();
    };
    let dates = [
        next_start - Duration::days(2),
        next_start,
        window.start - Duration::days(2),
        window.start,
    ];
    let nine = TimeOfDay {
        hour: CYCLE_HOUR,
        minute: 0,
    };
    CYCLE_NOTIFICATION_KEYS
        .into_iter()
        .zip(dates)
        .filter_map(|(key, date)| {
            let when = local_at(date, nine.to_naive_time())?;
            if when <= now {
                return None;
            }
            let (title, body) = cycle_text(key, state.language);
            Some(PlannedNotification {
                key,
                when,
                title: title.to_string(),
                body: body.to_string(),
                channel: Channel::Cycle,
            })
        })
        .collect()
}

/// Weekly goal check on the weekday the goal was started.
pub fn plan_goal_reminder(goal: &Goal, language: Language, now: DateTime<Local>) -> Option<PlannedNotification> {
    if !goal.active {
        return None;
    }
    let when = next_weekday_at(
        goal.start_date.weekday(),
        TimeOfDay {
            hour: GOAL_HOUR,
            minute: 0,
        },
        now,
    )?;
    let title = match language {
        Language::De => "Zielcheck",
        Language::En => "Goal check",
        Language::Pl => "Sprawdź cel",
    };
    Some(PlannedNotification {
        key: GOAL_REMINDER_KEY,
        when,
        title: title.to_string(),
        body: String::new(),
        channel: Channel::Reminders,
    })
}

/// Sunday evening summary with XP, the weekly weight change and the best
/// perfect-day streak.
pub fn plan_weekly_digest(state: &AppState, now: DateTime<Local>) -> Option<PlannedNotification> {
    let when = next_weekday_at(
        Weekday::Sun,
        TimeOfDay {
            hour: DIGEST_HOUR,
            minute: 0,
        },
        now,
    )?;
    let delta = weight_delta_7d(&weight_series(state));
    let streak = best_perfect_streak(state);
    let xp = state.xp;
    let (title, body) = match state.language {
        Language::De => (
            "Wochenfortschritt",
            format!("Wochendigest: XP {xp}, ΔGewicht (7T) {delta:.1} kg, beste Serie {streak}."),
        ),
        Language::En => (
            "Weekly progress",
            format!("Weekly digest: XP {xp}, Δweight (7d) {delta:.1} kg, best streak {streak}."),
        ),
        Language::Pl => (
            "Postępy tygodnia",
            format!("Tygodniowy skrót: XP {xp}, Δwaga (7d) {delta:.1} kg, najlepsza seria {streak}."),
        ),
    };
    Some(PlannedNotification {
        key: WEEKLY_DIGEST_KEY,
        when,
        title: title.to_string(),
        body,
        channel: Channel::Reminders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Cycle;
    use chrono::{TimeZone, Timelike};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
    }

    fn tod(hour: u32, minute: u32) -> TimeOfDay {
        TimeOfDay::new(hour, minute).unwrap()
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow() {
        let now = at(2024, 5, 1, 9, 0);
        assert_eq!(next_occurrence(tod(10, 0), now), Some(at(2024, 5, 1, 10, 0)));
        assert_eq!(next_occurrence(tod(9, 0), now), Some(at(2024, 5, 2, 9, 0)));
        assert_eq!(next_occurrence(tod(8, 59), now), Some(at(2024, 5, 2, 8, 59)));
    }

    #[test]
    fn weekday_search_is_strictly_ahead() {
        // 2024-05-01 is a Wednesday
        let now = at(2024, 5, 1, 18, 0);
        assert_eq!(
            next_weekday_at(Weekday::Wed, tod(18, 0), now),
            Some(at(2024, 5, 8, 18, 0))
        );
        assert_eq!(
            next_weekday_at(Weekday::Wed, tod(19, 0), now),
            Some(at(2024, 5, 1, 19, 0))
        );
        assert_eq!(
            next_weekday_at(Weekday::Sun, tod(18, 0), now),
            Some(at(2024, 5, 5, 18, 0))
        );
    }

    #[test]
    fn defaults_are_disabled() {
        let defaults = default_reminders();
        assert_eq!(defaults.len(), 5);
        assert!(defaults.iter().all(|r| !r.enabled));
        assert_eq!(defaults[1].id, "pill_evening");
        assert_eq!(defaults[1].time, "20:00");
    }

    #[test]
    fn custom_reminder_validation() {
        let now = at(2024, 5, 1, 9, 0);
        let state = AppState::default();
        assert!(matches!(
            new_custom_reminder(&state, "  ", "08:00", now),
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            new_custom_reminder(&state, "Vitamins", "99:00", now),
            Err(TrackerError::InvalidInput(_))
        ));
        let reminder = new_custom_reminder(&state, "Vitamins", "730", now).unwrap();
        assert_eq!(reminder.time, "07:30");
        assert_eq!(reminder.kind, ReminderKind::Custom);
        assert_eq!(reminder.title(Language::En), "Vitamins");
    }

    #[test]
    fn same_instant_ids_get_a_suffix() {
        let now = at(2024, 5, 1, 9, 0);
        let mut state = AppState::default();
        let first = new_custom_reminder(&state, "Vitamins", "08:00", now).unwrap();
        state.add_reminder(first.clone(), now);
        let second = new_custom_reminder(&state, "Stretch", "09:00", now).unwrap();
        assert_eq!(second.id, format!("{}_1", first.id));
        state.add_reminder(second, now);
        let third = new_custom_reminder(&state, "Walk", "10:00", now).unwrap();
        assert_eq!(third.id, format!("{}_2", first.id));
    }

    #[test]
    fn full_custom_list_is_rejected_before_parsing() {
        let now = at(2024, 5, 1, 9, 0);
        let mut state = AppState::default();
        for i in 0..MAX_CUSTOM_REMINDERS {
            state.reminders.push(Reminder {
                id: format!("c{i}"),
                kind: ReminderKind::Custom,
                time: "08:00".into(),
                enabled: false,
                label: Some("x".into()),
            });
        }
        let err = new_custom_reminder(&state, "", "garbage", now).unwrap_err();
        assert!(matches!(err, TrackerError::LimitReached { limit: 10, .. }));
    }

    #[test]
    fn cycle_plan_skips_past_instants() {
        let mut state = AppState::default();
        state.cycles.push(Cycle::open(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        // next start 2024-01-29, fertile window starts 2024-01-11
        let plan = plan_cycle_notifications(&state, at(2024, 1, 10, 12, 0));
        let keys: Vec<_> = plan.iter().map(|p| p.key).collect();
        assert_eq!(keys, ["cycle_period_minus2", "cycle_period_day0", "cycle_fertile_day0"]);
        assert_eq!(plan[0].when, at(2024, 1, 27, 9, 0));
        assert!(plan.iter().all(|p| p.channel == Channel::Cycle && p.when.hour() == 9));
        assert!(plan_cycle_notifications(&AppState::default(), at(2024, 1, 10, 12, 0)).is_empty());
    }

    #[test]
    fn digest_mentions_xp_and_streak() {
        let mut state = AppState::default();
        state.xp = 420;
        state.language = Language::En;
        let plan = plan_weekly_digest(&state, at(2024, 5, 1, 9, 0)).unwrap();
        assert_eq!(plan.when, at(2024, 5, 5, 18, 0));
        assert_eq!(plan.body, "Weekly digest: XP 420, Δweight (7d) 0.0 kg, best streak 0.");
    }

    #[test]
    fn goal_check_follows_start_weekday() {
        let goal = Goal::new(
            65.0,
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            72.0,
            // a Monday
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        )
        .unwrap();
        let plan = plan_goal_reminder(&goal, Language::De, at(2024, 5, 1, 9, 0)).unwrap();
        assert_eq!(plan.when, at(2024, 5, 6, 9, 0));
        assert_eq!(plan.title, "Zielcheck");
        let inactive = Goal { active: false, ..goal };
        assert!(plan_goal_reminder(&inactive, Language::De, at(2024, 5, 1, 9, 0)).is_none());
    }
}
