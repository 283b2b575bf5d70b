pub mod achievements;
pub mod analytics;
pub mod clock;
pub mod coach;
pub mod cycle;
pub mod day;
pub mod error;
pub mod events;
pub mod features;
pub mod notifications;
pub mod reminders;
pub mod service;
pub mod state;
pub mod storage;
pub mod time;

pub use crate::error::{TrackerError, TrackerResult};
pub use crate::service::{TrackerService, TrackerServiceBuilder, WeekStatus};
pub use crate::state::AppState;
