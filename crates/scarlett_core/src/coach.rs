//! Chat coach: a remote completion endpoint with a local fallback.
//!
//! The remote call runs on a helper thread and is abandoned after the
//! configured timeout. Any failure is answered locally; the user never sees
//! an error from the coach.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    analytics::{extended_stats, weight_series, linear_trend, DEFAULT_TREND_WINDOW},
    state::{AppState, ChatMessage, Language, Sender},
    time::to_date_key,
};

pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(8);
pub const HISTORY_LIMIT: usize = 12;

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("coach endpoint not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("empty answer")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Greeting,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub language: Language,
    pub mode: ChatMode,
    pub summary: Value,
    pub messages: Vec<ChatTurn>,
}

/// Remote completion endpoint, implemented by the host.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String, CoachError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoachReply {
    pub text: String,
    pub source: ReplySource,
}

pub struct Coach {
    client: Option<Arc<dyn CompletionClient>>,
    timeout: Duration,
}

impl Coach {
    /// A coach that always answers locally.
    pub fn offline() -> Self {
        Self {
            client: None,
            timeout: DEFAULT_CHAT_TIMEOUT,
        }
    }

    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reply(&self, request: ChatRequest) -> CoachReply {
        match self.ask_remote(&request) {
            Ok(text) => CoachReply {
                text,
                source: ReplySource::Remote,
            },
            Err(err) => {
                warn!(%err, mode = ?request.mode, "coach falling back to local answer");
                CoachReply {
                    text: local_answer(&request),
                    source: ReplySource::Local,
                }
            }
        }
    }

    /// Runs the client on its own thread. On timeout the thread is left to
    /// finish on its own and its late answer is dropped; clients should carry
    /// their own transport timeout so it does not linger.
    fn ask_remote(&self, request: &ChatRequest) -> Result<String, CoachError> {
        let client = self.client.clone().ok_or(CoachError::NotConfigured)?;
        let (tx, rx) = mpsc::channel();
        let owned = request.clone();
        let worker = thread::spawn(move || {
            // the receiver may be gone after a timeout
            let _ = tx.send(client.complete(&owned));
        });
        let answer = rx
            .recv_timeout(self.timeout)
            .map_err(|_| CoachError::Timeout(self.timeout))?;
        // the answer is sent last, so this returns right away
        let _ = worker.join();
        let text = answer?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CoachError::Empty);
        }
        debug!(chars = text.len(), "coach answered remotely");
        Ok(text.to_string())
    }
}

pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::De => "Du bist ein freundlicher Gesundheitscoach. Antworte kurz und hilfreich auf Deutsch.",
        Language::En => "You are a friendly health coach. Respond briefly and helpfully in English.",
        Language::Pl => "Jesteś przyjaznym trenerem zdrowia. Odpowiadaj krótko i pomocnie po polsku.",
    }
}

/// Compact snapshot sent along with every request.
pub fn compact_summary(state: &AppState, today: NaiveDate) -> Value {
    let stats = extended_stats(state);
    let trend = linear_trend(&weight_series(state), DEFAULT_TREND_WINDOW);
    let day = state.day(today);
    json!({
        "date": to_date_key(today),
        "level": state.level(),
        "xp": state.xp,
        "today": day.map(|d| json!({
            "pillsMorning": d.pills.morning,
            "pillsEvening": d.pills.evening,
            "waterCups": d.drinks.water,
            "waterIntakeMl": d.water_intake_ml(state.water_cup_ml),
            "waterGoalMl": d.water_goal_ml(),
            "coffee": d.drinks.coffee,
            "sport": d.drinks.sport,
            "weight": d.weight,
        })),
        "weightTrendPerDay": trend.slope_per_day,
        "complianceRate": stats.compliance_rate,
        "bestPerfectStreak": stats.best_perfect_streak,
        "goal": state.goal.as_ref().map(|g| json!({
            "targetWeight": g.target_weight,
            "targetDate": to_date_key(g.target_date),
        })),
    })
}

/// The last `limit` chat messages as request turns, oldest first.
pub fn recent_history(chat: &[ChatMessage], limit: usize) -> Vec<ChatTurn> {
    chat[chat.len().saturating_sub(limit)..]
        .iter()
        .map(|m| ChatTurn {
            role: match m.sender {
                Sender::User => Role::User,
                Sender::Bot => Role::Assistant,
            },
            content: m.text.clone(),
        })
        .collect()
}

fn local_answer(request: &ChatRequest) -> String {
    match request.mode {
        ChatMode::Greeting => local_greeting(request.language, &request.summary),
        ChatMode::Chat => {
            let last = request
                .messages
                .iter()
                .rev()
                .find(|t| t.role == Role::User)
                .map(|t| t.content.as_str())
                .unwrap_or_default();
            local_reply(request.language, last)
        }
    }
}

pub fn local_greeting(language: Language, summary: &Value) -> String {
    let level = summary.get("level").and_then(Value::as_u64).unwrap_or(1);
    let pills_done = summary
        .pointer("/today/pillsMorning")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        && summary
            .pointer("/today/pillsEvening")
            .and_then(Value::as_bool)
            .unwrap_or(false);
    match (language, pills_done) {
        (Language::De, true) => format!("Hallo! Level {level} und beide Tabletten erledigt. Stark!"),
        (Language::De, false) => format!("Hallo! Du bist auf Level {level}. Denk heute an deine Tabletten und dein Wasser."),
        (Language::En, true) => format!("Hi! Level {level} and both pills done. Great job!"),
        (Language::En, false) => format!("Hi! You are at level {level}. Remember your pills and water today."),
        (Language::Pl, true) => format!("Cześć! Poziom {level} i obie tabletki zaliczone. Świetnie!"),
        (Language::Pl, false) => format!("Cześć! Jesteś na poziomie {level}. Pamiętaj dziś o tabletkach i wodzie."),
    }
}

#[derive(Clone, Copy)]
enum Topic {
    Water,
    Weight,
    Pills,
    Coffee,
    Sport,
    Other,
}

fn topic_of(text: &str) -> Topic {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if has(&["water", "wasser", "woda", "wody", "trink", "drink"]) {
        Topic::Water
    } else if has(&["weight", "gewicht", "waga", "wiegen", "kg"]) {
        Topic::Weight
    } else if has(&["pill", "tablet", "tabletk"]) {
        Topic::Pills
    } else if has(&["coffee", "kaffee", "kawa"]) {
        Topic::Coffee
    } else if has(&["sport", "training", "workout", "ćwicz"]) {
        Topic::Sport
    } else {
        Topic::Other
    }
}

pub fn local_reply(language: Language, text: &str) -> String {
    let answer = match (topic_of(text), language) {
        (Topic::Water, Language::De) => "Verteile dein Wasser über den Tag, ein Glas zu jeder Mahlzeit hilft.",
        (Topic::Water, Language::En) => "Spread your water over the day; a glass with every meal helps.",
        (Topic::Water, Language::Pl) => "Rozłóż wodę na cały dzień, szklanka do każdego posiłku pomaga.",
        (Topic::Weight, Language::De) => "Wiege dich morgens nach dem Aufstehen, dann sind die Werte vergleichbar.",
        (Topic::Weight, Language::En) => "Weigh yourself in the morning after getting up so values are comparable.",
        (Topic::Weight, Language::Pl) => "Waż się rano po wstaniu, wtedy wyniki są porównywalne.",
        (Topic::Pills, Language::De) => "Erinnerungen helfen, die Tabletten zur gleichen Zeit zu nehmen.",
        (Topic::Pills, Language::En) => "Reminders help you take your pills at the same time every day.",
        (Topic::Pills, Language::Pl) => "Przypomnienia pomagają brać tabletki o tej samej porze.",
        (Topic::Coffee, Language::De) => "Bis zu drei Tassen am Tag sind für die meisten unproblematisch.",
        (Topic::Coffee, Language::En) => "Up to three cups a day is fine for most people.",
        (Topic::Coffee, Language::Pl) => "Do trzech filiżanek dziennie to dla większości w porządku.",
        (Topic::Sport, Language::De) => "Schon 20 Minuten Bewegung zählen. Denk an das Extra-Wasser!",
        (Topic::Sport, Language::En) => "Even 20 minutes of movement counts. Remember the extra water!",
        (Topic::Sport, Language::Pl) => "Nawet 20 minut ruchu się liczy. Pamiętaj o dodatkowej wodzie!",
        (Topic::Other, Language::De) => "Ich bin gerade offline, aber bleib dran: kleine Schritte zählen.",
        (Topic::Other, Language::En) => "I'm offline right now, but keep going: small steps count.",
        (Topic::Other, Language::Pl) => "Jestem teraz offline, ale nie poddawaj się: małe kroki się liczą.",
    };
    answer.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl CompletionClient for Echo {
        fn complete(&self, request: &ChatRequest) -> Result<String, CoachError> {
            Ok(format!("echo {}", request.messages.len()))
        }
    }

    struct Slow;

    impl CompletionClient for Slow {
        fn complete(&self, _request: &ChatRequest) -> Result<String, CoachError> {
            thread::sleep(Duration::from_millis(500));
            Ok("too late".into())
        }
    }

    struct Broken;

    impl CompletionClient for Broken {
        fn complete(&self, _request: &ChatRequest) -> Result<String, CoachError> {
            Err(CoachError::Request("503".into()))
        }
    }

    fn request(mode: ChatMode, text: &str) -> ChatRequest {
        ChatRequest {
            language: Language::En,
            mode,
            summary: json!({"level": 4}),
            messages: vec![ChatTurn {
                role: Role::User,
                content: text.into(),
            }],
        }
    }

    #[test]
    fn remote_answer_is_used_when_available() {
        let coach = Coach::new(Arc::new(Echo), Duration::from_secs(1));
        let reply = coach.reply(request(ChatMode::Chat, "hi"));
        assert_eq!(reply.source, ReplySource::Remote);
        assert_eq!(reply.text, "echo 1");
    }

    #[test]
    fn slow_endpoint_times_out_to_local() {
        let coach = Coach::new(Arc::new(Slow), Duration::from_millis(20));
        let reply = coach.reply(request(ChatMode::Chat, "how much water?"));
        assert_eq!(reply.source, ReplySource::Local);
        assert!(reply.text.contains("water"));
    }

    #[test]
    fn failures_and_offline_answer_locally() {
        let broken = Coach::new(Arc::new(Broken), Duration::from_secs(1));
        assert_eq!(broken.reply(request(ChatMode::Greeting, "")).source, ReplySource::Local);
        let greeting = Coach::offline().reply(request(ChatMode::Greeting, ""));
        assert_eq!(greeting.text, "Hi! You are at level 4. Remember your pills and water today.");
    }

    #[test]
    fn history_keeps_the_tail() {
        let chat: Vec<_> = (0..20)
            .map(|i| ChatMessage {
                id: i.to_string(),
                sender: if i % 2 == 0 { Sender::User } else { Sender::Bot },
                text: format!("m{i}"),
                created_at: i,
            })
            .collect();
        let turns = recent_history(&chat, HISTORY_LIMIT);
        assert_eq!(turns.len(), HISTORY_LIMIT);
        assert_eq!(turns[0].content, "m8");
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn summary_has_level_and_today() {
        let mut state = AppState::default();
        state.xp = 250;
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        state.ensure_day(today).drinks.water = 3;
        let summary = compact_summary(&state, today);
        assert_eq!(summary["level"], 3);
        assert_eq!(summary["today"]["waterCups"], 3);
        assert_eq!(summary["today"]["waterIntakeMl"], 750);
        assert!(summary["goal"].is_null());
    }
}
