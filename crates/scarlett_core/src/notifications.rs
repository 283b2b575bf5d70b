use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimum delay for seconds-based triggers.
pub const MIN_RELATIVE_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Reminders,
    Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    At(DateTime<Local>),
    AfterSeconds(u64),
}

/// How one-shot notifications are expressed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerStrategy {
    AbsoluteDate,
    /// Some Android skins drop date triggers; a delay in seconds survives.
    RelativeSeconds,
}

impl TriggerStrategy {
    pub fn trigger_for(self, when: DateTime<Local>, now: DateTime<Local>) -> Trigger {
        match self {
            TriggerStrategy::AbsoluteDate => Trigger::At(when),
            TriggerStrategy::RelativeSeconds => {
                let seconds = (when - now).num_seconds().max(0) as u64;
                Trigger::AfterSeconds(seconds.max(MIN_RELATIVE_SECONDS))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub brand: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn new(manufacturer: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            ..Self::default()
        }
    }
}

pub type DeviceClassifier = fn(&DeviceInfo) -> TriggerStrategy;

/// Xiaomi, Redmi and POCO devices get seconds-based triggers.
pub fn classify_device(device: &DeviceInfo) -> TriggerStrategy {
    let hay = format!("{} {} {}", device.manufacturer, device.brand, device.model).to_lowercase();
    if ["xiaomi", "redmi", "poco"].iter().any(|vendor| hay.contains(vendor)) {
        TriggerStrategy::RelativeSeconds
    } else {
        TriggerStrategy::AbsoluteDate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub trigger: Trigger,
    pub channel: Channel,
    /// Set for user reminders so delivery can reschedule the next one.
    pub reminder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub request: NotificationRequest,
}

/// Platform notification adapters implement this trait.
pub trait NotificationService: Send + Sync {
    /// Current permission state; never prompts.
    fn permission_granted(&self) -> bool;
    fn request_permission(&self) -> bool;
    /// Returns the platform id, or `None` when the request was rejected.
    fn schedule(&self, request: NotificationRequest) -> Option<String>;
    fn cancel(&self, id: &str);
    fn list_scheduled(&self) -> Vec<ScheduledNotification>;
}

/// Process-local notification table.
#[derive(Debug)]
pub struct InMemoryNotifications {
    granted: AtomicBool,
    grant_on_request: AtomicBool,
    failing: AtomicBool,
    next_id: AtomicU64,
    schedule_calls: AtomicU64,
    scheduled: Mutex<Vec<ScheduledNotification>>,
}

impl Default for InMemoryNotifications {
    fn default() -> Self {
        Self {
            granted: AtomicBool::new(false),
            grant_on_request: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            schedule_calls: AtomicU64::new(0),
            scheduled: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granted() -> Self {
        let service = Self::default();
        service.granted.store(true, Ordering::SeqCst);
        service
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Make later permission prompts fail.
    pub fn deny_requests(&self) {
        self.grant_on_request.store(false, Ordering::SeqCst);
    }

    /// Make later `schedule` calls return `None`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `schedule` calls that produced an id.
    pub fn schedule_calls(&self) -> u64 {
        self.schedule_calls.load(Ordering::SeqCst)
    }

    /// Drop every pending notification, as an OS cleanup or reinstall does.
    pub fn clear(&self) {
        self.scheduled.lock().clear();
    }
}

impl NotificationService for InMemoryNotifications {
    fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_permission(&self) -> bool {
        if self.grant_on_request.load(Ordering::SeqCst) {
            self.granted.store(true, Ordering::SeqCst);
        }
        self.permission_granted()
    }

    fn schedule(&self, request: NotificationRequest) -> Option<String> {
        if !self.permission_granted() || self.failing.load(Ordering::SeqCst) {
            return None;
        }
        let id = format!("n{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(%id, title = %request.title, trigger = ?request.trigger, "notification scheduled");
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.scheduled.lock().push(ScheduledNotification {
            id: id.clone(),
            request,
        });
        Some(id)
    }

    fn cancel(&self, id: &str) {
        self.scheduled.lock().retain(|n| n.id != id);
    }

    fn list_scheduled(&self) -> Vec<ScheduledNotification> {
        self.scheduled.lock().clone()
    }
}
