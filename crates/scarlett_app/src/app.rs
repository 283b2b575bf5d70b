use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use scarlett_core::{
    coach::{Coach, DEFAULT_CHAT_TIMEOUT},
    day::{DrinkFlag, DrinkKind, PillSlot},
    features,
    notifications::{
        DeviceInfo, InMemoryNotifications, NotificationRequest, NotificationService,
        ScheduledNotification,
    },
    state::Language,
    time::parse_decimal,
    TrackerService,
};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) state_dir: PathBuf,
    pub(crate) device_manufacturer: String,
    pub(crate) chat_timeout: Duration,
    pub(crate) language: Option<Language>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("SCARLETT_STATE_DIR") {
            if !dir.trim().is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }
        if let Ok(manufacturer) = std::env::var("SCARLETT_DEVICE_MANUFACTURER") {
            config.device_manufacturer = manufacturer.trim().to_string();
        }
        if let Ok(timeout) = std::env::var("SCARLETT_CHAT_TIMEOUT_SECS") {
            if let Ok(value) = timeout.trim().parse::<u64>() {
                if value > 0 {
                    config.chat_timeout = Duration::from_secs(value);
                }
            }
        }
        if let Ok(code) = std::env::var("SCARLETT_LANGUAGE") {
            config.language = Language::parse(code.trim());
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let state_dir = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".scarlett"))
            .unwrap_or_else(|| PathBuf::from(".scarlett"));
        Self {
            state_dir,
            device_manufacturer: String::new(),
            chat_timeout: DEFAULT_CHAT_TIMEOUT,
            language: None,
        }
    }
}

/// Notification table that also writes every request to the log, so the CLI
/// shows what a phone would have scheduled.
struct LoggedNotifications {
    inner: InMemoryNotifications,
}

impl NotificationService for LoggedNotifications {
    fn permission_granted(&self) -> bool {
        self.inner.permission_granted()
    }

    fn request_permission(&self) -> bool {
        self.inner.request_permission()
    }

    fn schedule(&self, request: NotificationRequest) -> Option<String> {
        let title = request.title.clone();
        let trigger = request.trigger;
        let id = self.inner.schedule(request);
        info!(?id, %title, ?trigger, "notification");
        id
    }

    fn cancel(&self, id: &str) {
        debug!(id, "notification cancelled");
        self.inner.cancel(id);
    }

    fn list_scheduled(&self) -> Vec<ScheduledNotification> {
        self.inner.list_scheduled()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Pill(PillSlot),
    Drink(DrinkKind, i32),
    Flag(DrinkFlag),
    Weight(f64),
    CycleStart,
    CycleEnd,
    RemindSeed,
    RemindAdd { label: String, time: String },
    RemindTime { id: String, time: String },
    RemindToggle { id: String, enabled: bool },
    Repair,
    Week,
    Export(PathBuf),
    Import(PathBuf),
    Chat(String),
}

const USAGE: &str = "usage: scarlett <status | pill morning|evening | water +1|-1 | coffee +1|-1 | \
flag slimCoffee|gingerGarlicTea|waterCure|sport | weight <kg> | cycle start|end | remind-seed | \
remind-add <label> <time> | remind-time <id> <time> | remind-toggle <id> on|off | repair | week | \
export <file> | import <file> | chat <text>>";

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let Some(name) = args.next() else {
            return Ok(Command::Status);
        };
        let rest: Vec<&str> = args.collect();
        let arg = |i: usize| rest.get(i).copied().ok_or_else(|| anyhow!(USAGE));

        let command = match name {
            "status" => Command::Status,
            "pill" => match arg(0)? {
                "morning" => Command::Pill(PillSlot::Morning),
                "evening" => Command::Pill(PillSlot::Evening),
                other => bail!("unknown pill slot `{other}`"),
            },
            "water" | "coffee" => {
                let kind = if name == "water" {
                    DrinkKind::Water
                } else {
                    DrinkKind::Coffee
                };
                let delta: i32 = arg(0)?
                    .parse()
                    .with_context(|| format!("`{name}` expects +1 or -1"))?;
                Command::Drink(kind, delta)
            }
            "flag" => {
                let flag = arg(0)?;
                Command::Flag(DrinkFlag::parse(flag).ok_or_else(|| anyhow!("unknown flag `{flag}`"))?)
            }
            "weight" => {
                let raw = arg(0)?;
                Command::Weight(parse_decimal(raw).ok_or_else(|| anyhow!("not a weight: `{raw}`"))?)
            }
            "cycle" => match arg(0)? {
                "start" => Command::CycleStart,
                "end" => Command::CycleEnd,
                other => bail!("unknown cycle action `{other}`"),
            },
            "remind-seed" => Command::RemindSeed,
            "remind-add" => Command::RemindAdd {
                label: arg(0)?.to_string(),
                time: arg(1)?.to_string(),
            },
            "remind-time" => Command::RemindTime {
                id: arg(0)?.to_string(),
                time: arg(1)?.to_string(),
            },
            "remind-toggle" => Command::RemindToggle {
                id: arg(0)?.to_string(),
                enabled: match arg(1)? {
                    "on" => true,
                    "off" => false,
                    other => bail!("expected on or off, got `{other}`"),
                },
            },
            "repair" => Command::Repair,
            "week" => Command::Week,
            "export" => Command::Export(PathBuf::from(arg(0)?)),
            "import" => Command::Import(PathBuf::from(arg(0)?)),
            "chat" => {
                let text = rest.join(" ");
                if text.trim().is_empty() {
                    bail!(USAGE);
                }
                Command::Chat(text)
            }
            _ => bail!(USAGE),
        };
        Ok(command)
    }
}

fn build_service(config: &AppConfig) -> Result<TrackerService> {
    let notifications = Arc::new(LoggedNotifications {
        inner: InMemoryNotifications::granted(),
    });
    TrackerService::builder()
        .with_state_dir(&config.state_dir)
        .with_notification_service(notifications)
        .with_device(DeviceInfo::new(config.device_manufacturer.clone()))
        .with_coach(Coach::offline().with_timeout(config.chat_timeout))
        .build()
        .context("failed to initialize tracker service")
}

pub fn run(config: AppConfig, args: Vec<String>) -> Result<()> {
    let command = Command::parse(&args)?;
    info!(state_dir = %config.state_dir.display(), ?command, "starting");
    let service = build_service(&config)?;
    if let Some(language) = config.language {
        if service.read(|s| s.language) != language {
            service.set_language(language)?;
        }
    }
    for line in execute(&service, command)? {
        println!("{line}");
    }
    Ok(())
}

/// Apply `command` and return the lines to print.
pub fn execute(service: &TrackerService, command: Command) -> Result<Vec<String>> {
    let today = service.today();
    let mut out = Vec::new();
    match command {
        Command::Status => out.extend(status_lines(service)),
        Command::Pill(slot) => {
            let earned = service.toggle_pill(today, slot)?;
            out.push(format!("pill {slot:?} toggled (+{earned} XP)"));
        }
        Command::Drink(kind, delta) => {
            let count = service.increment_drink(today, kind, delta)?;
            out.push(format!("{kind:?}: {count}"));
        }
        Command::Flag(flag) => {
            let earned = service.toggle_flag(today, flag)?;
            let on = service.read(|s| s.day(today).is_some_and(|d| d.drinks.flag(flag)));
            out.push(format!("{} {} (+{earned} XP)", flag.as_str(), if on { "on" } else { "off" }));
        }
        Command::Weight(kg) => {
            service.set_weight(today, kg)?;
            out.push(format!("weight {kg:.1} kg"));
        }
        Command::CycleStart => {
            let started = service.start_cycle(today)?;
            out.push(if started { "cycle started".into() } else { "a cycle is already open".into() });
        }
        Command::CycleEnd => {
            let ended = service.end_cycle(today)?;
            out.push(if ended { "cycle ended".into() } else { "no open cycle".into() });
        }
        Command::RemindSeed => {
            let seeded = service.seed_default_reminders()?;
            out.push(if seeded { "default reminders added".into() } else { "already seeded".into() });
        }
        Command::RemindAdd { label, time } => {
            let reminder = service.add_custom_reminder(&label, &time)?;
            out.push(format!("{} at {}", reminder.id, reminder.time));
        }
        Command::RemindTime { id, time } => {
            if service.update_reminder_time(&id, &time)? {
                out.push(format!("{id} moved to {time}"));
            } else {
                out.push(format!("`{time}` is not a time; {id} unchanged"));
            }
        }
        Command::RemindToggle { id, enabled } => {
            service.set_reminder_enabled(&id, enabled)?;
            out.push(format!("{id} {}", if enabled { "on" } else { "off" }));
        }
        Command::Repair => {
            let repaired = service.repair_reminders()?;
            out.push(format!("{repaired} reminders rescheduled"));
        }
        Command::Week => {
            let status = service.week_status();
            out.push(format!(
                "{} ({}): {} {}%",
                status.week.week_key, status.event_id, status.title, status.progress.percent
            ));
            if let Some(check) = service.check_weekly_event()? {
                if let Some(xp) = check.awarded {
                    out.push(format!("completed, +{xp} XP"));
                }
            }
        }
        Command::Export(path) => {
            let backup = service.export_backup()?;
            fs::write(&path, backup).with_context(|| format!("writing {}", path.display()))?;
            out.push(format!("exported to {}", path.display()));
        }
        Command::Import(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let update = service.import_backup(&raw)?;
            out.push(format!(
                "imported {}; {} new achievements",
                path.display(),
                update.newly_unlocked.len()
            ));
        }
        Command::Chat(text) => {
            let reply = service.send_chat(&text)?;
            out.push(reply.text);
        }
    }
    Ok(out)
}

fn status_lines(service: &TrackerService) -> Vec<String> {
    let now = service.now();
    let today = now.date_naive();
    let stats = service.extended_stats();
    let outlook = service.cycle_outlook();
    let week = service.week_status();
    let mut lines = service.read(|s| {
        let cup = s.water_cup_ml;
        let level = s.level();
        let mut lines = vec![format!(
            "{} | level {} | {} XP",
            now.format("%Y-%m-%d %H:%M"),
            level,
            s.xp
        )];
        let unlocked = features::unlocked_features(level).count();
        lines.push(match features::next_unlock(level) {
            Some(next) => format!(
                "features {unlocked}/{} | next: {} at level {}",
                features::FEATURES.len(),
                next.title(s.language),
                next.level
            ),
            None => format!("features {unlocked}/{} | all unlocked", features::FEATURES.len()),
        });
        match s.day(today) {
            Some(day) => {
                lines.push(format!(
                    "pills {}/{} | water {} ml of {} ml | coffee {}",
                    u8::from(day.pills.morning),
                    u8::from(day.pills.evening),
                    day.water_intake_ml(cup),
                    day.water_goal_ml(),
                    day.drinks.coffee
                ));
                if let Some(weight) = day.weight {
                    lines.push(format!("weight {weight:.1} kg"));
                }
            }
            None => lines.push("nothing logged today".into()),
        }
        lines
    });
    if let Some(next) = outlook.next_start {
        lines.push(format!(
            "next period {next} (avg {:.0} days)",
            outlook.average_length_days
        ));
    }
    lines.push(format!("week {}: {} {}%", week.week.week_key, week.title, week.progress.percent));
    if let Some(eta) = service.goal_eta() {
        lines.push(format!("goal in {} days ({})", eta.days, eta.date));
    }
    if let Ok(json) = serde_json::to_string(&stats) {
        lines.push(json);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(&[]).unwrap(), Command::Status);
        assert_eq!(
            Command::parse(&args(&["water", "+1"])).unwrap(),
            Command::Drink(DrinkKind::Water, 1)
        );
        assert_eq!(
            Command::parse(&args(&["weight", "71,5"])).unwrap(),
            Command::Weight(71.5)
        );
        assert_eq!(
            Command::parse(&args(&["remind-toggle", "water_daily", "off"])).unwrap(),
            Command::RemindToggle {
                id: "water_daily".into(),
                enabled: false
            }
        );
        assert_eq!(
            Command::parse(&args(&["chat", "hello", "coach"])).unwrap(),
            Command::Chat("hello coach".into())
        );
        assert!(Command::parse(&args(&["pill", "noon"])).is_err());
        assert!(Command::parse(&args(&["flag", "tea"])).is_err());
        assert!(Command::parse(&args(&["dance"])).is_err());
    }

    #[test]
    fn commands_run_against_a_state_dir() {
        let temp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            state_dir: temp.path().to_path_buf(),
            ..AppConfig::default()
        };
        let service = build_service(&config).unwrap();
        execute(&service, Command::Pill(PillSlot::Morning)).unwrap();
        execute(&service, Command::RemindSeed).unwrap();
        let out = execute(&service, Command::RemindToggle {
            id: "water_daily".into(),
            enabled: true,
        })
        .unwrap();
        assert_eq!(out, ["water_daily on"]);

        let backup = temp.path().join("backup.json");
        execute(&service, Command::Export(backup.clone())).unwrap();
        assert!(backup.exists());
        let status = execute(&service, Command::Status).unwrap();
        assert!(status[1].starts_with("features 0/27 | next: Zielgewicht at level 5"));

        let reloaded = build_service(&config).unwrap();
        assert!(reloaded.read(|s| s.reminder("water_daily").unwrap().enabled));
    }
}
