//! The persisted application state and its named mutators.
//!
//! Every change to the state goes through one of the methods below so the
//! derived bookkeeping (habit XP, achievement unlocks, audit logs) happens the
//! same way no matter which surface triggered it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    achievements::{self, AchievementUpdate},
    cycle::{self, Cycle, CycleLog, CycleLogPatch},
    day::{
        ActivityValue, DayRecord, DrinkFlag, DrinkKind, PhotoMeta, PillSlot, DEFAULT_CUP_ML,
        MAX_CUP_ML, MAX_PHOTOS_PER_DAY,
    },
    error::{TrackerError, TrackerResult},
    events,
    features::{self, Theme},
    time::to_date_key,
};

pub const XP_PER_LEVEL: u64 = 100;
pub const MAX_CUSTOM_REMINDERS: usize = 10;
pub const SHORT_CHAT_LIMIT: usize = 120;
pub const MAX_WEIGHT_KG: f64 = 500.0;

/// `level = xp / 100 + 1`; never stored.
pub fn level_for_xp(xp: u64) -> u32 {
    u32::try_from(xp / XP_PER_LEVEL + 1).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    En,
    Pl,
}

impl Language {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "de" => Some(Language::De),
            "en" => Some(Language::En),
            "pl" => Some(Language::Pl),
            _ => None,
        }
    }

    /// Picks the text for this language; Polish falls back to English where a
    /// table only carries two languages.
    pub fn pick<'a>(self, de: &'a str, en: &'a str) -> &'a str {
        match self {
            Language::De => de,
            Language::En | Language::Pl => en,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub target_weight: f64,
    pub target_date: NaiveDate,
    pub start_weight: f64,
    pub start_date: NaiveDate,
    #[serde(default = "enabled")]
    pub active: bool,
}

fn enabled() -> bool {
    true
}

impl Goal {
    pub fn new(
        target_weight: f64,
        target_date: NaiveDate,
        start_weight: f64,
        start_date: NaiveDate,
    ) -> TrackerResult<Self> {
        if !(target_weight.is_finite() && target_weight > 0.0) {
            return Err(TrackerError::InvalidInput(format!(
                "target weight must be positive, got {target_weight}"
            )));
        }
        if !(start_weight.is_finite() && start_weight > 0.0) {
            return Err(TrackerError::InvalidInput(format!(
                "start weight must be positive, got {start_weight}"
            )));
        }
        Ok(Self {
            target_weight,
            target_date,
            start_weight,
            start_date,
            active: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    PillsMorning,
    PillsEvening,
    Weight,
    Water,
    Sport,
    #[serde(other)]
    Custom,
}

impl ReminderKind {
    pub fn default_title(self, language: Language) -> &'static str {
        match (self, language) {
            (ReminderKind::PillsMorning, Language::De) => "Tabletten morgens",
            (ReminderKind::PillsMorning, Language::Pl) => "Tabletki rano",
            (ReminderKind::PillsMorning, Language::En) => "Pills morning",
            (ReminderKind::PillsEvening, Language::De) => "Tabletten abends",
            (ReminderKind::PillsEvening, Language::Pl) => "Tabletki wieczorem",
            (ReminderKind::PillsEvening, Language::En) => "Pills evening",
            (ReminderKind::Weight, Language::De) => "Gewicht",
            (ReminderKind::Weight, Language::Pl) => "Waga",
            (ReminderKind::Weight, Language::En) => "Weight",
            (ReminderKind::Water, Language::De) => "Wasser",
            (ReminderKind::Water, Language::Pl) => "Woda",
            (ReminderKind::Water, Language::En) => "Water",
            (ReminderKind::Sport, _) => "Sport",
            (ReminderKind::Custom, Language::De) => "Erinnerung",
            (ReminderKind::Custom, Language::Pl) => "Przypomnienie",
            (ReminderKind::Custom, Language::En) => "Reminder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// Always zero padded `HH:MM`.
    pub time: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Reminder {
    pub fn title(&self, language: Language) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => self.kind.default_title(language).to_string(),
        }
    }
}

/// Last request handed to the notification service for a reminder or one of
/// the automatic notification slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub completed: bool,
    pub xp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpSource {
    Habit,
    Achievement,
    Event,
    Combo,
    #[serde(other)]
    Other,
}

impl XpSource {
    pub fn as_str(self) -> &'static str {
        match self {
            XpSource::Habit => "habit",
            XpSource::Achievement => "achievement",
            XpSource::Event => "event",
            XpSource::Combo => "combo",
            XpSource::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpLogEntry {
    pub id: String,
    pub ts: i64,
    pub amount: u64,
    pub source: XpSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessage {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub days: BTreeMap<String, DayRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<Goal>,
    pub reminders: Vec<Reminder>,
    pub chat: Vec<ChatMessage>,
    pub saved: Vec<SavedMessage>,
    pub achievements_unlocked: BTreeSet<String>,
    pub xp: u64,
    pub xp_log: Vec<XpLogEntry>,
    pub language: Language,
    pub theme: Theme,
    pub notification_meta: BTreeMap<String, NotificationMeta>,
    pub has_seeded_reminders: bool,
    pub event_history: BTreeMap<String, EventRecord>,
    pub events_enabled: bool,
    pub cycles: Vec<Cycle>,
    pub cycle_logs: BTreeMap<String, CycleLog>,
    pub water_cup_ml: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            days: BTreeMap::new(),
            goal: None,
            reminders: Vec::new(),
            chat: Vec::new(),
            saved: Vec::new(),
            achievements_unlocked: BTreeSet::new(),
            xp: 0,
            xp_log: Vec::new(),
            language: Language::default(),
            theme: Theme::default(),
            notification_meta: BTreeMap::new(),
            has_seeded_reminders: false,
            event_history: BTreeMap::new(),
            events_enabled: true,
            cycles: Vec::new(),
            cycle_logs: BTreeMap::new(),
            water_cup_ml: DEFAULT_CUP_ML,
            height_cm: None,
        }
    }
}

impl AppState {
    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&to_date_key(date))
    }

    /// Day record for `date`, created with zero defaults when missing.
    pub fn ensure_day(&mut self, date: NaiveDate) -> &mut DayRecord {
        let key = to_date_key(date);
        self.days
            .entry(key.clone())
            .or_insert_with(|| DayRecord::for_key(&key))
    }

    pub(crate) fn award_xp(
        &mut self,
        amount: u64,
        source: XpSource,
        note: impl Into<String>,
        now: DateTime<Local>,
    ) {
        if amount == 0 {
            return;
        }
        let ts = now.timestamp_millis();
        let id = format!("{}:{}:{}", source.as_str(), ts, self.xp_log.len());
        self.xp = self.xp.saturating_add(amount);
        self.xp_log.push(XpLogEntry {
            id,
            ts,
            amount,
            source,
            note: Some(note.into()),
        });
    }

    pub fn recalc_achievements(&mut self, now: DateTime<Local>) -> AchievementUpdate {
        achievements::apply(self, now)
    }

    pub fn toggle_pill(&mut self, date: NaiveDate, slot: PillSlot, now: DateTime<Local>) -> u64 {
        let earned = self
            .ensure_day(date)
            .toggle_pill(slot, now.timestamp_millis());
        let note = crate::day::HabitKey::Pill(slot).as_str();
        self.award_xp(earned, XpSource::Habit, note, now);
        self.recalc_achievements(now);
        earned
    }

    /// Mark both pills as taken, paying habit XP for each one that flips.
    pub fn set_both_pills(&mut self, date: NaiveDate, now: DateTime<Local>) -> u64 {
        let mut earned = 0;
        for slot in [PillSlot::Morning, PillSlot::Evening] {
            let day = self.ensure_day(date);
            let taken = match slot {
                PillSlot::Morning => day.pills.morning,
                PillSlot::Evening => day.pills.evening,
            };
            if !taken {
                let xp = day.toggle_pill(slot, now.timestamp_millis());
                self.award_xp(xp, XpSource::Habit, crate::day::HabitKey::Pill(slot).as_str(), now);
                earned += xp;
            }
        }
        self.recalc_achievements(now);
        earned
    }

    pub fn toggle_flag(&mut self, date: NaiveDate, flag: DrinkFlag, now: DateTime<Local>) -> u64 {
        let earned = self
            .ensure_day(date)
            .toggle_flag(flag, now.timestamp_millis());
        self.award_xp(earned, XpSource::Habit, flag.as_str(), now);
        self.recalc_achievements(now);
        earned
    }

    pub fn increment_drink(
        &mut self,
        date: NaiveDate,
        kind: DrinkKind,
        delta: i32,
        now: DateTime<Local>,
    ) -> u32 {
        let count = self
            .ensure_day(date)
            .increment_drink(kind, delta.signum(), now.timestamp_millis());
        self.recalc_achievements(now);
        count
    }

    pub fn set_weight(&mut self, date: NaiveDate, kg: f64, now: DateTime<Local>) -> TrackerResult<()> {
        if !(kg.is_finite() && kg > 0.0 && kg <= MAX_WEIGHT_KG) {
            return Err(TrackerError::InvalidInput(format!(
                "weight must be between 0 and {MAX_WEIGHT_KG} kg, got {kg}"
            )));
        }
        let ts = now.timestamp_millis();
        let day = self.ensure_day(date);
        day.weight = Some(kg);
        day.weight_time = Some(ts);
        day.log(ts, "weight_set", Some(ActivityValue::Number(kg)));
        self.recalc_achievements(now);
        Ok(())
    }

    pub fn add_photo(&mut self, date: NaiveDate, photo: PhotoMeta) -> TrackerResult<()> {
        let day = self.ensure_day(date);
        if day.photos.len() >= MAX_PHOTOS_PER_DAY {
            return Err(TrackerError::LimitReached {
                what: "photos per day",
                limit: MAX_PHOTOS_PER_DAY,
            });
        }
        day.photos.push(photo);
        Ok(())
    }

    pub fn remove_photo(&mut self, date: NaiveDate, uri: &str) -> bool {
        let Some(day) = self.days.get_mut(&to_date_key(date)) else {
            return false;
        };
        let before = day.photos.len();
        day.photos.retain(|p| p.uri != uri);
        day.photos.len() != before
    }

    pub fn set_goal(&mut self, goal: Goal, now: DateTime<Local>) {
        self.goal = Some(goal);
        self.recalc_achievements(now);
    }

    pub fn remove_goal(&mut self, now: DateTime<Local>) {
        self.goal = None;
        self.recalc_achievements(now);
    }

    pub fn set_language(&mut self, language: Language, now: DateTime<Local>) {
        self.language = language;
        self.recalc_achievements(now);
    }

    /// Returns `false` when the theme is locked at the current level.
    pub fn set_theme(&mut self, theme: Theme, now: DateTime<Local>) -> bool {
        if !features::theme_unlocked(theme, self.level()) {
            return false;
        }
        self.theme = theme;
        self.recalc_achievements(now);
        true
    }

    pub fn set_events_enabled(&mut self, enabled: bool) {
        self.events_enabled = enabled;
    }

    pub fn set_water_cup_ml(&mut self, ml: f64) {
        if !ml.is_finite() {
            return;
        }
        self.water_cup_ml = ml.round().clamp(0.0, MAX_CUP_ML as f64) as u32;
    }

    pub fn set_height_cm(&mut self, cm: f64) -> TrackerResult<()> {
        if !(cm.is_finite() && cm > 0.0) {
            return Err(TrackerError::InvalidInput(format!(
                "height must be positive, got {cm}"
            )));
        }
        self.height_cm = Some(cm);
        Ok(())
    }

    pub fn reminder(&self, id: &str) -> Option<&Reminder> {
        self.reminders.iter().find(|r| r.id == id)
    }

    pub fn reminder_mut(&mut self, id: &str) -> Option<&mut Reminder> {
        self.reminders.iter_mut().find(|r| r.id == id)
    }

    pub fn custom_reminder_count(&self) -> usize {
        self.reminders
            .iter()
            .filter(|r| r.kind == ReminderKind::Custom)
            .count()
    }

    /// Newest reminders first, replacing an existing one with the same id.
    pub fn add_reminder(&mut self, reminder: Reminder, now: DateTime<Local>) {
        self.reminders.retain(|r| r.id != reminder.id);
        self.reminders.insert(0, reminder);
        self.recalc_achievements(now);
    }

    pub fn delete_reminder(&mut self, id: &str, now: DateTime<Local>) -> Option<Reminder> {
        let index = self.reminders.iter().position(|r| r.id == id)?;
        let removed = self.reminders.remove(index);
        self.notification_meta.remove(id);
        self.recalc_achievements(now);
        Some(removed)
    }

    pub fn set_notification_meta(&mut self, key: &str, meta: Option<NotificationMeta>) {
        match meta {
            Some(meta) => {
                self.notification_meta.insert(key.to_string(), meta);
            }
            None => {
                self.notification_meta.remove(key);
            }
        }
    }

    /// Append a chat message. User messages are shortened below the VIP chat
    /// level.
    pub fn add_chat(&mut self, mut message: ChatMessage, now: DateTime<Local>) {
        if message.sender == Sender::User
            && message.text.chars().count() > SHORT_CHAT_LIMIT
            && !features::is_unlocked("vip_chat", self.level())
        {
            message.text = message.text.chars().take(SHORT_CHAT_LIMIT).collect();
        }
        self.chat.push(message);
        self.recalc_achievements(now);
    }

    pub fn add_saved(&mut self, saved: SavedMessage, now: DateTime<Local>) {
        self.saved.insert(0, saved);
        self.recalc_achievements(now);
    }

    pub fn update_saved(
        &mut self,
        id: &str,
        update: impl FnOnce(&mut SavedMessage),
    ) -> bool {
        match self.saved.iter_mut().find(|s| s.id == id) {
            Some(saved) => {
                update(saved);
                true
            }
            None => false,
        }
    }

    pub fn delete_saved(&mut self, id: &str, now: DateTime<Local>) -> bool {
        let before = self.saved.len();
        self.saved.retain(|s| s.id != id);
        let removed = self.saved.len() != before;
        if removed {
            self.recalc_achievements(now);
        }
        removed
    }

    pub fn start_cycle(&mut self, date: NaiveDate) -> bool {
        cycle::start_cycle(&mut self.cycles, date)
    }

    pub fn end_cycle(&mut self, date: NaiveDate) -> bool {
        cycle::end_cycle(&mut self.cycles, date)
    }

    pub fn set_cycle_log(&mut self, date: NaiveDate, patch: CycleLogPatch, now: DateTime<Local>) {
        self.cycle_logs
            .entry(to_date_key(date))
            .or_default()
            .apply(patch, now.timestamp_millis());
    }

    pub fn clear_cycle_log(&mut self, date: NaiveDate) -> bool {
        self.cycle_logs.remove(&to_date_key(date)).is_some()
    }

    /// Record a weekly event as completed. Returns the XP paid, or `None`
    /// when the week was already completed.
    pub fn complete_event(
        &mut self,
        week_key: &str,
        event_id: &str,
        base_xp: u64,
        now: DateTime<Local>,
    ) -> Option<u64> {
        events::complete_event(self, week_key, event_id, base_xp, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn level_is_derived_from_xp() {
        let table = [(0, 1), (99, 1), (100, 2), (199, 2), (200, 3), (10_000, 101)];
        for (xp, level) in table {
            assert_eq!(level_for_xp(xp), level, "xp {xp}");
        }
        assert_eq!(level_for_xp(u64::MAX), u32::MAX);
    }

    #[test]
    fn retoggling_a_pill_never_farms_xp() {
        let mut state = AppState::default();
        let day = today();
        state.toggle_pill(day, PillSlot::Morning, now());
        let after_first = state.xp;
        state.toggle_pill(day, PillSlot::Morning, now());
        state.toggle_pill(day, PillSlot::Morning, now());
        assert_eq!(state.xp, after_first);
        let habit_xp: u64 = state
            .xp_log
            .iter()
            .filter(|e| e.source == XpSource::Habit)
            .map(|e| e.amount)
            .sum();
        assert_eq!(habit_xp, 15);
    }

    #[test]
    fn next_day_pays_again() {
        let mut state = AppState::default();
        state.toggle_pill(today(), PillSlot::Evening, now());
        let tomorrow = today().succ_opt().unwrap();
        assert_eq!(state.toggle_pill(tomorrow, PillSlot::Evening, now()), 15);
    }

    #[test]
    fn weight_must_be_positive() {
        let mut state = AppState::default();
        assert!(state.set_weight(today(), 0.0, now()).is_err());
        assert!(state.set_weight(today(), f64::NAN, now()).is_err());
        assert!(state.set_weight(today(), 1e9, now()).is_err());
        assert!(state.day(today()).is_none());
        state.set_weight(today(), MAX_WEIGHT_KG, now()).unwrap();
        state.toggle_flag(today(), DrinkFlag::Sport, now());
        state.set_weight(today(), 71.3, now()).unwrap();
        let day = state.day(today()).unwrap();
        assert_eq!(day.weight, Some(71.3));
        assert_eq!(day.weight_time, Some(now().timestamp_millis()));
        assert_eq!(day.activity_log.last().unwrap().action, "weight_set");
    }

    #[test]
    fn golden_theme_is_level_gated() {
        let mut state = AppState::default();
        assert!(!state.set_theme(Theme::GoldenPink, now()));
        assert_eq!(state.theme, Theme::PinkDefault);
        state.xp = 7_400;
        assert!(state.set_theme(Theme::GoldenPink, now()));
        assert!(state.set_theme(Theme::PinkPastel, now()));
    }

    #[test]
    fn cup_size_is_clamped() {
        let mut state = AppState::default();
        state.set_water_cup_ml(1500.0);
        assert_eq!(state.water_cup_ml, 1000);
        state.set_water_cup_ml(-3.0);
        assert_eq!(state.water_cup_ml, 0);
        state.set_water_cup_ml(330.4);
        assert_eq!(state.water_cup_ml, 330);
    }

    #[test]
    fn photo_cap_per_day() {
        let mut state = AppState::default();
        for i in 0..MAX_PHOTOS_PER_DAY {
            let photo = PhotoMeta {
                uri: format!("file://{i}.jpg"),
                thumb_uri: format!("file://{i}_t.jpg"),
                width: 10,
                height: 10,
                size: 1,
                created_at: 0,
            };
            state.add_photo(today(), photo).unwrap();
        }
        let extra = PhotoMeta {
            uri: "file://x.jpg".into(),
            thumb_uri: "file://x_t.jpg".into(),
            width: 0,
            height: 0,
            size: 0,
            created_at: 0,
        };
        let err = state.add_photo(today(), extra).unwrap_err();
        assert!(err.is_user_visible());
        assert!(state.remove_photo(today(), "file://0.jpg"));
        assert!(!state.remove_photo(today(), "file://0.jpg"));
    }

    #[test]
    fn long_user_messages_are_shortened_below_vip() {
        let mut state = AppState::default();
        let long = "a".repeat(200);
        state.add_chat(
            ChatMessage {
                id: "1".into(),
                sender: Sender::User,
                text: long.clone(),
                created_at: 0,
            },
            now(),
        );
        assert_eq!(state.chat[0].text.len(), SHORT_CHAT_LIMIT);

        state.add_chat(
            ChatMessage {
                id: "2".into(),
                sender: Sender::Bot,
                text: long,
                created_at: 0,
            },
            now(),
        );
        assert_eq!(state.chat[1].text.len(), 200);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let state: AppState = serde_json::from_str(r#"{"xp": 250}"#).unwrap();
        assert_eq!(state.xp, 250);
        assert!(state.events_enabled);
        assert_eq!(state.water_cup_ml, DEFAULT_CUP_ML);
        assert_eq!(state.level(), 3);
    }
}
