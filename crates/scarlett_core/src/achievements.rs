//! Achievement catalog and the unlock pass run after every mutation.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::{
    analytics::best_perfect_streak,
    day::DayRecord,
    features::Theme,
    state::{AppState, Language, Sender, XpSource},
};

pub const COMBO_BONUS_XP: u64 = 50;

pub struct Achievement {
    pub id: &'static str,
    title: [&'static str; 2],
    pub xp: u64,
    unlocked: fn(&AppState) -> bool,
}

impl Achievement {
    pub fn title(&self, language: Language) -> &'static str {
        language.pick(self.title[0], self.title[1])
    }

    pub fn is_met(&self, state: &AppState) -> bool {
        (self.unlocked)(state)
    }
}

fn days_where(state: &AppState, pred: impl Fn(&DayRecord) -> bool) -> usize {
    state.days.values().filter(|d| pred(*d)).count()
}

pub static ACHIEVEMENTS: [Achievement; 17] = [
    Achievement {
        id: "first_pill",
        title: ["Erste Tablette", "First pill"],
        xp: 20,
        unlocked: |s| days_where(s, |d| d.pills.morning || d.pills.evening) >= 1,
    },
    Achievement {
        id: "pill_week",
        title: ["Pillen-Woche", "Pill week"],
        xp: 50,
        unlocked: |s| days_where(s, DayRecord::both_pills) >= 7,
    },
    Achievement {
        id: "first_weight",
        title: ["Erste Messung", "First weigh-in"],
        xp: 20,
        unlocked: |s| days_where(s, DayRecord::has_weight) >= 1,
    },
    Achievement {
        id: "weigh_ten",
        title: ["Zehnmal gewogen", "Ten weigh-ins"],
        xp: 60,
        unlocked: |s| days_where(s, DayRecord::has_weight) >= 10,
    },
    Achievement {
        id: "hydration_hero",
        title: ["Hydration-Held", "Hydration hero"],
        xp: 50,
        unlocked: |s| days_where(s, |d| d.water_goal_met(s.water_cup_ml)) >= 5,
    },
    Achievement {
        id: "water_cure_first",
        title: ["Erste Wasserkur", "First water cure"],
        xp: 20,
        unlocked: |s| days_where(s, |d| d.drinks.water_cure) >= 1,
    },
    Achievement {
        id: "sport_starter",
        title: ["Sport-Starter", "Sport starter"],
        xp: 40,
        unlocked: |s| days_where(s, |d| d.drinks.sport) >= 3,
    },
    Achievement {
        id: "tea_time",
        title: ["Teezeit", "Tea time"],
        xp: 30,
        unlocked: |s| days_where(s, |d| d.drinks.ginger_garlic_tea) >= 3,
    },
    Achievement {
        id: "goal_setter",
        title: ["Ziel gesetzt", "Goal setter"],
        xp: 30,
        unlocked: |s| s.goal.is_some(),
    },
    Achievement {
        id: "reminder_rookie",
        title: ["Erinnerungs-Neuling", "Reminder rookie"],
        xp: 20,
        unlocked: |s| !s.reminders.is_empty(),
    },
    Achievement {
        id: "reminder_pro",
        title: ["Erinnerungs-Profi", "Reminder pro"],
        xp: 40,
        unlocked: |s| s.reminders.len() >= 5,
    },
    Achievement {
        id: "chatterbox",
        title: ["Plaudertasche", "Chatterbox"],
        xp: 30,
        unlocked: |s| s.chat.iter().filter(|m| m.sender == Sender::User).count() >= 10,
    },
    Achievement {
        id: "collector",
        title: ["Sammlerin", "Collector"],
        xp: 30,
        unlocked: |s| s.saved.len() >= 3,
    },
    Achievement {
        id: "polyglot",
        title: ["Polyglott", "Polyglot"],
        xp: 10,
        unlocked: |s| s.language != Language::De,
    },
    Achievement {
        id: "stylist",
        title: ["Stylistin", "Stylist"],
        xp: 10,
        unlocked: |s| s.theme != Theme::PinkDefault,
    },
    Achievement {
        id: "perfect_day",
        title: ["Perfekter Tag", "Perfect day"],
        xp: 50,
        unlocked: |s| days_where(s, |d| d.is_perfect(s.water_cup_ml)) >= 1,
    },
    Achievement {
        id: "perfect_streak_3",
        title: ["Perfekte Serie", "Perfect streak"],
        xp: 100,
        unlocked: |s| best_perfect_streak(s) >= 3,
    },
];

pub fn find_achievement(id: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|a| a.id == id)
}

/// Ids whose condition currently holds, in catalog order.
pub fn compute_achievements(state: &AppState) -> Vec<&'static str> {
    ACHIEVEMENTS
        .iter()
        .filter(|a| a.is_met(state))
        .map(|a| a.id)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUpdate {
    pub newly_unlocked: Vec<&'static str>,
    pub xp_awarded: u64,
    pub combo_bonus: u64,
}

/// Unlock every achievement whose condition now holds and pay its reward.
///
/// Unlocks are never taken back, even when the condition stops holding.
pub fn apply(state: &mut AppState, now: DateTime<Local>) -> AchievementUpdate {
    let newly_unlocked: Vec<&'static str> = compute_achievements(state)
        .into_iter()
        .filter(|id| !state.achievements_unlocked.contains(*id))
        .collect();
    if newly_unlocked.is_empty() {
        return AchievementUpdate::default();
    }

    let mut xp_awarded = 0;
    for id in &newly_unlocked {
        state.achievements_unlocked.insert((*id).to_string());
        let reward = find_achievement(id).map_or(0, |a| a.xp);
        state.award_xp(reward, XpSource::Achievement, *id, now);
        xp_awarded += reward;
    }

    let count = newly_unlocked.len() as u64;
    let combo_bonus = if count >= 2 { (count - 1) * COMBO_BONUS_XP } else { 0 };
    state.award_xp(
        combo_bonus,
        XpSource::Combo,
        format!("{count} unlocks combo"),
        now,
    );

    info!(unlocked = ?newly_unlocked, xp_awarded, combo_bonus, "achievements unlocked");
    AchievementUpdate {
        newly_unlocked,
        xp_awarded,
        combo_bonus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::PillSlot;
    use crate::state::Goal;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().unwrap()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn catalog_ids_are_unique() {
        let mut ids: Vec<_> = ACHIEVEMENTS.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ACHIEVEMENTS.len());
    }

    #[test]
    fn single_unlock_pays_reward_without_combo() {
        let mut state = AppState::default();
        state.toggle_pill(d(1), PillSlot::Morning, now());
        assert!(state.achievements_unlocked.contains("first_pill"));
        // 15 habit + 20 achievement
        assert_eq!(state.xp, 35);
        assert!(state.xp_log.iter().all(|e| e.source != XpSource::Combo));
    }

    #[test]
    fn simultaneous_unlocks_pay_a_combo() {
        let mut state = AppState::default();
        state.goal = Some(Goal::new(60.0, d(30), 70.0, d(1)).unwrap());
        state.language = Language::En;
        let update = apply(&mut state, now());
        assert_eq!(update.newly_unlocked, ["goal_setter", "polyglot"]);
        assert_eq!(update.xp_awarded, 40);
        assert_eq!(update.combo_bonus, 50);
        assert_eq!(state.xp, 90);
        let combo: Vec<_> = state
            .xp_log
            .iter()
            .filter(|e| e.source == XpSource::Combo)
            .collect();
        assert_eq!(combo.len(), 1);
        assert_eq!(combo[0].amount, 50);
    }

    #[test]
    fn combo_grows_with_each_extra_unlock() {
        let mut state = AppState::default();
        state.language = Language::En;
        state.theme = Theme::PinkVibrant;
        state.reminders = crate::reminders::default_reminders();
        let update = apply(&mut state, now());
        assert_eq!(update.newly_unlocked.len(), 4);
        assert_eq!(update.combo_bonus, 150);
        assert_eq!(state.xp, 10 + 10 + 20 + 40 + 150);
    }

    #[test]
    fn unlocks_are_never_revoked_or_repaid() {
        let mut state = AppState::default();
        state.set_language(Language::Pl, now());
        let xp = state.xp;
        state.set_language(Language::De, now());
        state.set_language(Language::En, now());
        assert!(state.achievements_unlocked.contains("polyglot"));
        assert_eq!(state.xp, xp);
        assert_eq!(apply(&mut state, now()), AchievementUpdate::default());
    }
}
