use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    achievements::AchievementUpdate,
    analytics::{self, Correlations, Eta, ExtendedStats, GoalProgress, TrendFit},
    clock::{Clock, SystemClock},
    coach::{
        compact_summary, recent_history, system_prompt, ChatMode, ChatRequest, ChatTurn, Coach,
        CoachReply, Role, HISTORY_LIMIT,
    },
    cycle::{self, CycleLogPatch, CycleOutlook},
    day::{DrinkFlag, DrinkKind, PhotoMeta, PillSlot},
    error::{TrackerError, TrackerResult},
    events::{self, EventProgress, WeekCheck, WeekRange, WeeklyEvent},
    features::{self, Theme},
    notifications::{
        classify_device, DeviceClassifier, DeviceInfo, NotificationService, TriggerStrategy,
    },
    reminders::{
        self, PlannedNotification, CYCLE_NOTIFICATION_KEYS, GOAL_REMINDER_KEY, WEEKLY_DIGEST_KEY,
    },
    state::{
        AppState, ChatMessage, Goal, Language, NotificationMeta, Reminder, SavedMessage, Sender,
    },
    storage::{self, StateStore},
    time::{parse_time_of_day, TimeOfDay},
};

/// How often the background sweep looks for lost reminder notifications.
pub const REPAIR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// Progress of the challenge running this week.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekStatus {
    pub week: WeekRange,
    pub event_id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub xp: u64,
    pub progress: EventProgress,
    pub completed_before: bool,
}

/// Owner of the application state.
///
/// Every mutation works on a copy of the current snapshot and swaps it in
/// only when the mutator succeeded, then persists. Calls into the
/// notification service and the coach happen outside the lock.
pub struct TrackerService {
    state: RwLock<AppState>,
    store: Option<StateStore>,
    notifications: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    strategy: TriggerStrategy,
    coach: Coach,
}

pub struct TrackerServiceBuilder {
    state_dir: Option<PathBuf>,
    notifications: Option<Arc<dyn NotificationService>>,
    clock: Arc<dyn Clock>,
    device: DeviceInfo,
    classifier: DeviceClassifier,
    coach: Coach,
    initial_state: Option<AppState>,
}

impl Default for TrackerServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerServiceBuilder {
    pub fn new() -> Self {
        Self {
            state_dir: None,
            notifications: None,
            clock: Arc::new(SystemClock),
            device: DeviceInfo::default(),
            classifier: classify_device,
            coach: Coach::offline(),
            initial_state: None,
        }
    }

    /// Directory holding the persisted state. Without one the service keeps
    /// its state in memory only.
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.state_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_notification_service(mut self, service: Arc<dyn NotificationService>) -> Self {
        self.notifications = Some(service);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn with_device_classifier(mut self, classifier: DeviceClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_coach(mut self, coach: Coach) -> Self {
        self.coach = coach;
        self
    }

    /// Start from `state` instead of the stored one.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn build(self) -> Result<TrackerService> {
        let store = self.state_dir.map(StateStore::new);
        let state = match (self.initial_state, &store) {
            (Some(state), _) => state,
            (None, Some(store)) => store.load()?,
            (None, None) => AppState::default(),
        };
        let notifications = self.notifications.ok_or_else(|| {
            anyhow::anyhow!("a notification service is required to build the tracker")
        })?;
        let strategy = (self.classifier)(&self.device);
        info!(
            ?strategy,
            manufacturer = %self.device.manufacturer,
            persisted = store.is_some(),
            "tracker service ready"
        );
        Ok(TrackerService {
            state: RwLock::new(state),
            store,
            notifications,
            clock: self.clock,
            strategy,
            coach: self.coach,
        })
    }
}

impl TrackerService {
    pub fn builder() -> TrackerServiceBuilder {
        TrackerServiceBuilder::new()
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub fn trigger_strategy(&self) -> TriggerStrategy {
        self.strategy
    }

    pub fn snapshot(&self) -> AppState {
        self.state.read().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&AppState) -> T) -> T {
        f(&self.state.read())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut AppState, DateTime<Local>) -> TrackerResult<T>,
    ) -> TrackerResult<T> {
        let now = self.now();
        let mut guard = self.state.write();
        let mut next = guard.clone();
        let out = f(&mut next, now)?;
        // memory only moves forward once the disk has it
        if let Some(store) = &self.store {
            store.save(&next)?;
        }
        let (from, to) = (guard.level(), next.level());
        for feature in features::newly_unlocked(from, to) {
            info!(
                feature = feature.id,
                title = feature.title(next.language),
                level = to,
                "feature unlocked"
            );
        }
        *guard = next;
        Ok(out)
    }

    #[instrument(skip(self))]
    pub fn toggle_pill(&self, date: NaiveDate, slot: PillSlot) -> TrackerResult<u64> {
        self.mutate(|s, now| Ok(s.toggle_pill(date, slot, now)))
    }

    #[instrument(skip(self))]
    pub fn set_both_pills(&self, date: NaiveDate) -> TrackerResult<u64> {
        self.mutate(|s, now| Ok(s.set_both_pills(date, now)))
    }

    #[instrument(skip(self))]
    pub fn toggle_flag(&self, date: NaiveDate, flag: DrinkFlag) -> TrackerResult<u64> {
        self.mutate(|s, now| Ok(s.toggle_flag(date, flag, now)))
    }

    #[instrument(skip(self))]
    pub fn increment_drink(
        &self,
        date: NaiveDate,
        kind: DrinkKind,
        delta: i32,
    ) -> TrackerResult<u32> {
        self.mutate(|s, now| Ok(s.increment_drink(date, kind, delta, now)))
    }

    #[instrument(skip(self))]
    pub fn set_weight(&self, date: NaiveDate, kg: f64) -> TrackerResult<()> {
        self.mutate(|s, now| s.set_weight(date, kg, now))
    }

    #[instrument(skip(self, photo))]
    pub fn add_photo(&self, date: NaiveDate, photo: PhotoMeta) -> TrackerResult<()> {
        self.mutate(|s, _| s.add_photo(date, photo))
    }

    pub fn remove_photo(&self, date: NaiveDate, uri: &str) -> TrackerResult<bool> {
        self.mutate(|s, _| Ok(s.remove_photo(date, uri)))
    }

    #[instrument(skip(self))]
    pub fn set_language(&self, language: Language) -> TrackerResult<()> {
        self.mutate(|s, now| {
            s.set_language(language, now);
            Ok(())
        })
    }

    /// Returns `false` when the theme is still locked.
    #[instrument(skip(self))]
    pub fn set_theme(&self, theme: Theme) -> TrackerResult<bool> {
        self.mutate(|s, now| Ok(s.set_theme(theme, now)))
    }

    pub fn set_events_enabled(&self, enabled: bool) -> TrackerResult<()> {
        self.mutate(|s, _| {
            s.set_events_enabled(enabled);
            Ok(())
        })
    }

    pub fn set_water_cup_ml(&self, ml: f64) -> TrackerResult<u32> {
        self.mutate(|s, _| {
            s.set_water_cup_ml(ml);
            Ok(s.water_cup_ml)
        })
    }

    pub fn set_height_cm(&self, cm: f64) -> TrackerResult<()> {
        self.mutate(|s, _| s.set_height_cm(cm))
    }

    #[instrument(skip(self, saved))]
    pub fn add_saved(&self, saved: SavedMessage) -> TrackerResult<()> {
        self.mutate(|s, now| {
            s.add_saved(saved, now);
            Ok(())
        })
    }

    pub fn update_saved(
        &self,
        id: &str,
        title: Option<String>,
        tags: Option<Vec<String>>,
    ) -> TrackerResult<bool> {
        self.mutate(|s, _| {
            Ok(s.update_saved(id, |saved| {
                if let Some(title) = title {
                    saved.title = title;
                }
                if let Some(tags) = tags {
                    saved.tags = tags;
                }
            }))
        })
    }

    pub fn delete_saved(&self, id: &str) -> TrackerResult<bool> {
        self.mutate(|s, now| Ok(s.delete_saved(id, now)))
    }

    #[instrument(skip(self))]
    pub fn set_goal(&self, goal: Goal) -> TrackerResult<()> {
        self.mutate(|s, now| {
            s.set_goal(goal, now);
            Ok(())
        })?;
        if let Err(err) = self.schedule_goal_reminder() {
            warn!(%err, "goal reminder not scheduled");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn remove_goal(&self) -> TrackerResult<()> {
        if let Some(meta) = self.read(|s| s.notification_meta.get(GOAL_REMINDER_KEY).cloned()) {
            self.notifications.cancel(&meta.id);
        }
        self.mutate(|s, now| {
            s.remove_goal(now);
            s.set_notification_meta(GOAL_REMINDER_KEY, None);
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn start_cycle(&self, date: NaiveDate) -> TrackerResult<bool> {
        let started = self.mutate(|s, _| Ok(s.start_cycle(date)))?;
        if started {
            self.reschedule_cycle_notifications()?;
        }
        Ok(started)
    }

    #[instrument(skip(self))]
    pub fn end_cycle(&self, date: NaiveDate) -> TrackerResult<bool> {
        let ended = self.mutate(|s, _| Ok(s.end_cycle(date)))?;
        if ended {
            self.reschedule_cycle_notifications()?;
        }
        Ok(ended)
    }

    pub fn set_cycle_log(&self, date: NaiveDate, patch: CycleLogPatch) -> TrackerResult<()> {
        self.mutate(|s, now| {
            s.set_cycle_log(date, patch, now);
            Ok(())
        })
    }

    pub fn clear_cycle_log(&self, date: NaiveDate) -> TrackerResult<bool> {
        self.mutate(|s, _| Ok(s.clear_cycle_log(date)))
    }

    pub fn cycle_outlook(&self) -> CycleOutlook {
        self.read(|s| cycle::outlook(&s.cycles))
    }

    /// Cancel the tracked cycle notifications and place the upcoming ones.
    /// Returns how many were scheduled.
    #[instrument(skip(self))]
    pub fn reschedule_cycle_notifications(&self) -> TrackerResult<usize> {
        let stale: Vec<String> = self.read(|s| {
            CYCLE_NOTIFICATION_KEYS
                .iter()
                .filter_map(|key| s.notification_meta.get(*key).map(|m| m.id.clone()))
                .collect()
        });
        for id in &stale {
            self.notifications.cancel(id);
        }

        let now = self.now();
        let plans = if self.notifications.permission_granted() {
            self.read(|s| reminders::plan_cycle_notifications(s, now))
        } else {
            Vec::new()
        };
        let placed = self.place_all(&plans, now);
        let count = placed.len();
        self.mutate(move |s, _| {
            for key in CYCLE_NOTIFICATION_KEYS {
                s.set_notification_meta(key, None);
            }
            for (key, meta) in placed {
                s.set_notification_meta(key, Some(meta));
            }
            Ok(())
        })?;
        info!(cancelled = stale.len(), scheduled = count, "cycle notifications refreshed");
        Ok(count)
    }

    fn place_all(
        &self,
        plans: &[PlannedNotification],
        now: DateTime<Local>,
    ) -> Vec<(&'static str, NotificationMeta)> {
        plans
            .iter()
            .filter_map(|plan| {
                let Some(id) = self.notifications.schedule(plan.request(self.strategy, now)) else {
                    warn!(key = plan.key, "notification rejected by the platform");
                    return None;
                };
                let meta = NotificationMeta {
                    id,
                    time: Some(TimeOfDay::from(plan.when.time()).to_string()),
                };
                Some((plan.key, meta))
            })
            .collect()
    }

    pub fn week_status(&self) -> WeekStatus {
        let today = self.today();
        let week = events::week_range(today);
        let event: &'static WeeklyEvent = events::current_weekly_event(today);
        self.read(|s| WeekStatus {
            event_id: event.id,
            title: event.title(s.language),
            description: event.description(s.language),
            xp: event.xp,
            progress: events::event_progress(&week.day_keys, s, event),
            completed_before: s
                .event_history
                .get(&week.week_key)
                .is_some_and(|r| r.completed),
            week,
        })
    }

    #[instrument(skip(self))]
    pub fn complete_event(
        &self,
        week_key: &str,
        event_id: &str,
        base_xp: u64,
    ) -> TrackerResult<Option<u64>> {
        self.mutate(|s, now| Ok(s.complete_event(week_key, event_id, base_xp, now)))
    }

    #[instrument(skip(self))]
    pub fn check_weekly_event(&self) -> TrackerResult<Option<WeekCheck>> {
        self.mutate(|s, now| Ok(events::check_weekly_event(s, now)))
    }

    pub fn recalc_achievements(&self) -> TrackerResult<AchievementUpdate> {
        self.mutate(|s, now| Ok(s.recalc_achievements(now)))
    }

    /// Add the default reminder set once per install.
    #[instrument(skip(self))]
    pub fn seed_default_reminders(&self) -> TrackerResult<bool> {
        self.mutate(|s, now| {
            if s.has_seeded_reminders {
                return Ok(false);
            }
            for reminder in reminders::default_reminders().into_iter().rev() {
                if s.reminder(&reminder.id).is_none() {
                    s.add_reminder(reminder, now);
                }
            }
            s.has_seeded_reminders = true;
            Ok(true)
        })
    }

    #[instrument(skip(self))]
    pub fn add_custom_reminder(&self, label: &str, time: &str) -> TrackerResult<Reminder> {
        self.mutate(|s, now| {
            let reminder = reminders::new_custom_reminder(s, label, time, now)?;
            s.add_reminder(reminder.clone(), now);
            Ok(reminder)
        })
    }

    fn reminder_snapshot(
        &self,
        id: &str,
    ) -> TrackerResult<(Reminder, Option<NotificationMeta>, Language)> {
        self.read(|s| {
            let reminder = s
                .reminder(id)
                .cloned()
                .ok_or_else(|| TrackerError::UnknownReminder(id.to_string()))?;
            Ok((reminder, s.notification_meta.get(id).cloned(), s.language))
        })
    }

    fn schedule_reminder_at(
        &self,
        reminder: &Reminder,
        language: Language,
        time: TimeOfDay,
        reference: DateTime<Local>,
    ) -> TrackerResult<NotificationMeta> {
        let now = self.now();
        let when = reminders::next_occurrence(time, reference).ok_or_else(|| {
            TrackerError::SchedulingFailed(format!("no next occurrence for {time}"))
        })?;
        let request = reminders::reminder_request(reminder, language, when, self.strategy, now);
        let id = self
            .notifications
            .schedule(request)
            .ok_or_else(|| TrackerError::SchedulingFailed(reminder.id.clone()))?;
        debug!(reminder = %reminder.id, %id, %when, "reminder scheduled");
        Ok(NotificationMeta {
            id,
            time: Some(time.to_string()),
        })
    }

    /// Drop the notification a new one replaced, once the new id is stored.
    fn cancel_replaced(&self, stale: Option<NotificationMeta>, current: &str) {
        if let Some(stale) = stale.filter(|m| m.id != current) {
            self.notifications.cancel(&stale.id);
        }
    }

    /// Switch a reminder on and schedule its next occurrence.
    #[instrument(skip(self))]
    pub fn enable_reminder(&self, id: &str) -> TrackerResult<String> {
        let (reminder, stale, language) = self.reminder_snapshot(id)?;
        if !self.notifications.permission_granted() && !self.notifications.request_permission() {
            return Err(TrackerError::PermissionDenied);
        }
        let time = parse_time_of_day(&reminder.time)
            .ok_or_else(|| TrackerError::InvalidInput(format!("stored time `{}`", reminder.time)))?;
        let meta = self.schedule_reminder_at(&reminder, language, time, self.now())?;
        let scheduled_id = meta.id.clone();
        let result = self.mutate(|s, _| {
            let r = s
                .reminder_mut(id)
                .ok_or_else(|| TrackerError::UnknownReminder(id.to_string()))?;
            r.enabled = true;
            s.set_notification_meta(id, Some(meta));
            Ok(())
        });
        if let Err(err) = result {
            self.notifications.cancel(&scheduled_id);
            return Err(err);
        }
        self.cancel_replaced(stale, &scheduled_id);
        info!(reminder = id, notification = %scheduled_id, "reminder enabled");
        Ok(scheduled_id)
    }

    /// Switch a reminder off. The definition is kept.
    #[instrument(skip(self))]
    pub fn disable_reminder(&self, id: &str) -> TrackerResult<()> {
        let (_, meta, _) = self.reminder_snapshot(id)?;
        if let Some(meta) = meta {
            self.notifications.cancel(&meta.id);
        }
        self.mutate(|s, _| {
            if let Some(r) = s.reminder_mut(id) {
                r.enabled = false;
            }
            s.set_notification_meta(id, None);
            Ok(())
        })
    }

    pub fn set_reminder_enabled(&self, id: &str, enabled: bool) -> TrackerResult<()> {
        if enabled {
            self.enable_reminder(id).map(|_| ())
        } else {
            self.disable_reminder(id)
        }
    }

    /// Change a reminder's time. Returns `false` when `input` is not a time,
    /// in which case nothing changes.
    #[instrument(skip(self))]
    pub fn update_reminder_time(&self, id: &str, input: &str) -> TrackerResult<bool> {
        let Some(time) = parse_time_of_day(input) else {
            debug!(reminder = id, input, "time not recognised, keeping the old one");
            return Ok(false);
        };
        let (reminder, meta, language) = self.reminder_snapshot(id)?;
        let text = time.to_string();

        if !reminder.enabled {
            self.mutate(|s, _| {
                if let Some(r) = s.reminder_mut(id) {
                    r.time = text.clone();
                }
                if let Some(meta) = s.notification_meta.get_mut(id) {
                    meta.time = Some(text.clone());
                }
                Ok(())
            })?;
            return Ok(true);
        }

        let updated = Reminder {
            time: text.clone(),
            ..reminder
        };
        let fresh = self.schedule_reminder_at(&updated, language, time, self.now())?;
        let scheduled_id = fresh.id.clone();
        let result = self.mutate(|s, _| {
            if let Some(r) = s.reminder_mut(id) {
                r.time = text.clone();
            }
            s.set_notification_meta(id, Some(fresh));
            Ok(())
        });
        if let Err(err) = result {
            self.notifications.cancel(&scheduled_id);
            return Err(err);
        }
        self.cancel_replaced(meta, &scheduled_id);
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn delete_reminder(&self, id: &str) -> TrackerResult<()> {
        let (_, meta, _) = self.reminder_snapshot(id)?;
        if let Some(meta) = meta {
            self.notifications.cancel(&meta.id);
        }
        self.mutate(|s, now| {
            s.delete_reminder(id, now);
            Ok(())
        })
    }

    /// Schedule the following occurrence of a reminder after one fired.
    /// Disabled or deleted reminders are left alone.
    #[instrument(skip(self))]
    pub fn schedule_next(&self, id: &str) -> TrackerResult<Option<String>> {
        let Ok((reminder, meta, language)) = self.reminder_snapshot(id) else {
            return Ok(None);
        };
        if !reminder.enabled {
            return Ok(None);
        }
        let Some(time) = parse_time_of_day(&reminder.time) else {
            return Ok(None);
        };
        // skip the occurrence that just fired
        let reference = self.now() + Duration::minutes(1);
        let fresh = self.schedule_reminder_at(&reminder, language, time, reference)?;
        let scheduled = fresh.id.clone();
        let result = self.mutate(|s, _| {
            s.set_notification_meta(id, Some(fresh));
            Ok(())
        });
        if let Err(err) = result {
            self.notifications.cancel(&scheduled);
            return Err(err);
        }
        self.cancel_replaced(meta, &scheduled);
        Ok(Some(scheduled))
    }

    /// Entry point for delivery and tap events. `key` is a reminder id or one
    /// of the automatic notification slots.
    #[instrument(skip(self))]
    pub fn handle_notification_event(&self, key: &str) -> TrackerResult<()> {
        match key {
            GOAL_REMINDER_KEY => {
                self.mutate(|s, _| {
                    s.set_notification_meta(GOAL_REMINDER_KEY, None);
                    Ok(())
                })?;
                self.schedule_goal_reminder()?;
            }
            WEEKLY_DIGEST_KEY => {
                self.schedule_weekly_digest(true)?;
            }
            key if CYCLE_NOTIFICATION_KEYS.iter().any(|k| *k == key) => {
                self.mutate(|s, _| {
                    s.set_notification_meta(key, None);
                    Ok(())
                })?;
            }
            reminder_id => {
                self.schedule_next(reminder_id)?;
            }
        }
        Ok(())
    }

    /// Reschedule enabled reminders whose notification disappeared.
    ///
    /// Never prompts: without a granted permission this does nothing.
    #[instrument(skip(self))]
    pub fn repair_reminders(&self) -> TrackerResult<usize> {
        if !self.notifications.permission_granted() {
            return Ok(0);
        }
        let live: HashSet<String> = self
            .notifications
            .list_scheduled()
            .into_iter()
            .map(|n| n.id)
            .collect();
        let (missing, language): (Vec<Reminder>, Language) = self.read(|s| {
            let missing = s
                .reminders
                .iter()
                .filter(|r| r.enabled)
                .filter(|r| {
                    s.notification_meta
                        .get(&r.id)
                        .map_or(true, |meta| !live.contains(&meta.id))
                })
                .cloned()
                .collect();
            (missing, s.language)
        });
        if missing.is_empty() {
            return Ok(0);
        }

        let now = self.now();
        let mut repaired = Vec::new();
        for reminder in &missing {
            let Some(time) = parse_time_of_day(&reminder.time) else {
                continue;
            };
            match self.schedule_reminder_at(reminder, language, time, now) {
                Ok(meta) => repaired.push((reminder.id.clone(), meta)),
                Err(err) => warn!(reminder = %reminder.id, %err, "repair failed"),
            }
        }
        let count = repaired.len();
        self.mutate(move |s, _| {
            for (id, meta) in repaired {
                s.set_notification_meta(&id, Some(meta));
            }
            Ok(())
        })?;
        info!(missing = missing.len(), repaired = count, "reminder repair sweep");
        Ok(count)
    }

    /// Run [`Self::repair_reminders`] every `every` on a background thread
    /// until the returned handle is stopped or dropped.
    pub fn spawn_repair_sweep(self: &Arc<Self>, every: std::time::Duration) -> RepairSweep {
        let (stop, stopped) = mpsc::channel::<()>();
        let service = Arc::clone(self);
        let handle = thread::spawn(move || loop {
            match stopped.recv_timeout(every) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = service.repair_reminders() {
                        warn!(%err, "repair sweep failed");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        info!(every_secs = every.as_secs(), "repair sweep started");
        RepairSweep {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Place the weekly goal check unless one is already pending.
    #[instrument(skip(self))]
    pub fn schedule_goal_reminder(&self) -> TrackerResult<bool> {
        let now = self.now();
        let plan = self.read(|s| {
            if s.notification_meta.contains_key(GOAL_REMINDER_KEY) {
                return None;
            }
            s.goal
                .as_ref()
                .and_then(|goal| reminders::plan_goal_reminder(goal, s.language, now))
        });
        let Some(plan) = plan else {
            return Ok(false);
        };
        if !self.notifications.permission_granted() {
            return Ok(false);
        }
        self.store_placed(self.place_all(std::slice::from_ref(&plan), now))
    }

    /// Place the Sunday digest. With `force` an already pending digest is
    /// replaced with fresh numbers.
    #[instrument(skip(self))]
    pub fn schedule_weekly_digest(&self, force: bool) -> TrackerResult<bool> {
        let pending = self.read(|s| s.notification_meta.get(WEEKLY_DIGEST_KEY).cloned());
        if let Some(meta) = pending {
            if !force {
                return Ok(false);
            }
            self.notifications.cancel(&meta.id);
            self.mutate(|s, _| {
                s.set_notification_meta(WEEKLY_DIGEST_KEY, None);
                Ok(())
            })?;
        }
        if !self.notifications.permission_granted() {
            return Ok(false);
        }
        let now = self.now();
        let Some(plan) = self.read(|s| reminders::plan_weekly_digest(s, now)) else {
            return Ok(false);
        };
        self.store_placed(self.place_all(std::slice::from_ref(&plan), now))
    }

    fn store_placed(&self, placed: Vec<(&'static str, NotificationMeta)>) -> TrackerResult<bool> {
        if placed.is_empty() {
            return Ok(false);
        }
        self.mutate(move |s, _| {
            for (key, meta) in placed {
                s.set_notification_meta(key, Some(meta));
            }
            Ok(true)
        })
    }

    pub fn extended_stats(&self) -> ExtendedStats {
        self.read(analytics::extended_stats)
    }

    pub fn correlations(&self) -> Correlations {
        self.read(analytics::correlations)
    }

    pub fn weight_trend(&self, window: usize) -> TrendFit {
        self.read(|s| analytics::linear_trend(&analytics::weight_series(s), window))
    }

    pub fn plateau(&self) -> bool {
        self.read(|s| {
            analytics::plateau_detected(
                &analytics::weight_series(s),
                analytics::DEFAULT_PLATEAU_WINDOW,
                analytics::PLATEAU_EPSILON_KG,
            )
        })
    }

    /// ETA to the goal weight at the current trend.
    pub fn goal_eta(&self) -> Option<Eta> {
        let today = self.today();
        self.read(|s| {
            let goal = s.goal.as_ref()?;
            let series = analytics::weight_series(s);
            let current = series.last()?.weight;
            let trend = analytics::linear_trend(&series, analytics::DEFAULT_TREND_WINDOW);
            analytics::eta_to_target(current, goal.target_weight, trend.slope_per_day, today)
        })
    }

    pub fn goal_progress(&self) -> Option<GoalProgress> {
        let today = self.today();
        self.read(|s| {
            let goal = s.goal.as_ref()?;
            let current = analytics::weight_series(s).last()?.weight;
            Some(analytics::goal_progress(goal, current, today))
        })
    }

    pub fn bmi(&self) -> Option<(f64, analytics::BmiCategory)> {
        self.read(|s| {
            let weight = analytics::weight_series(s).last()?.weight;
            let value = analytics::bmi(weight, s.height_cm?)?;
            Some((value, analytics::BmiCategory::classify(value)))
        })
    }

    pub fn export_backup(&self) -> Result<String> {
        self.read(storage::export_backup_string)
    }

    /// Merge a backup. On any error the current state stays untouched.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub fn import_backup(&self, raw: &str) -> TrackerResult<AchievementUpdate> {
        self.mutate(|s, now| {
            let mut next = storage::import_backup(s, raw)?;
            let update = next.recalc_achievements(now);
            *s = next;
            Ok(update)
        })
    }

    fn coach_request(&self, mode: ChatMode) -> ChatRequest {
        let today = self.today();
        self.read(|s| {
            let mut messages = vec![ChatTurn {
                role: Role::System,
                content: system_prompt(s.language).to_string(),
            }];
            if mode == ChatMode::Chat {
                messages.extend(recent_history(&s.chat, HISTORY_LIMIT));
            }
            ChatRequest {
                language: s.language,
                mode,
                summary: compact_summary(s, today),
                messages,
            }
        })
    }

    fn push_chat(&self, sender: Sender, text: String) -> TrackerResult<()> {
        self.mutate(|s, now| {
            let ts = now.timestamp_millis();
            let message = ChatMessage {
                id: format!("{ts}-{}", s.chat.len()),
                sender,
                text,
                created_at: ts,
            };
            s.add_chat(message, now);
            Ok(())
        })
    }

    /// Send a user message and store the coach's answer.
    #[instrument(skip(self, text))]
    pub fn send_chat(&self, text: &str) -> TrackerResult<CoachReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TrackerError::InvalidInput("empty chat message".into()));
        }
        self.push_chat(Sender::User, text.to_string())?;
        let reply = self.coach.reply(self.coach_request(ChatMode::Chat));
        self.push_chat(Sender::Bot, reply.text.clone())?;
        Ok(reply)
    }

    pub fn greeting(&self) -> TrackerResult<CoachReply> {
        let reply = self.coach.reply(self.coach_request(ChatMode::Greeting));
        self.push_chat(Sender::Bot, reply.text.clone())?;
        Ok(reply)
    }
}

/// Handle to the background repair sweep. Dropping it stops the sweep.
pub struct RepairSweep {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RepairSweep {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // the thread may already have exited
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("repair sweep thread panicked");
            }
        }
    }
}

impl Drop for RepairSweep {
    fn drop(&mut self) {
        self.shutdown();
    }
}
