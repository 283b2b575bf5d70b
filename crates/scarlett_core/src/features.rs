//! Level-gated features and themes.

use serde::{Deserialize, Serialize};

use crate::state::Language;

pub const VIP_CHAT_LEVEL: u32 = 50;
pub const GOLDEN_THEME_LEVEL: u32 = 75;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    PinkDefault,
    PinkPastel,
    PinkVibrant,
    GoldenPink,
}

impl Theme {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "pink_default" => Some(Theme::PinkDefault),
            "pink_pastel" => Some(Theme::PinkPastel),
            "pink_vibrant" => Some(Theme::PinkVibrant),
            "golden_pink" => Some(Theme::GoldenPink),
            _ => None,
        }
    }

    pub fn required_level(self) -> u32 {
        match self {
            Theme::GoldenPink => GOLDEN_THEME_LEVEL,
            _ => 1,
        }
    }
}

pub fn theme_unlocked(theme: Theme, level: u32) -> bool {
    level >= theme.required_level()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
    pub id: &'static str,
    pub level: u32,
    title: [&'static str; 3],
}

impl Feature {
    pub fn title(&self, language: Language) -> &'static str {
        match language {
            Language::De => self.title[0],
            Language::En => self.title[1],
            Language::Pl => self.title[2],
        }
    }
}

const fn feature(id: &'static str, level: u32, title: [&'static str; 3]) -> Feature {
    Feature { id, level, title }
}

/// Ordered by unlock level.
pub static FEATURES: [Feature; 27] = [
    feature("goal", 5, ["Zielgewicht", "Target weight", "Waga docelowa"]),
    feature("analysis", 10, ["Analyse", "Analysis", "Analiza"]),
    feature("bmi", 10, ["BMI", "BMI", "BMI"]),
    feature("gallery", 15, ["Gewichts-Galerie", "Weight photo gallery", "Galeria zdjęć wagi"]),
    feature("trend_eta", 20, ["Trend + ETA", "Trend + ETA", "Trend + ETA"]),
    feature("correlations", 30, ["Korrelationen", "Correlations", "Korelacje"]),
    feature("photo_compare", 32, ["Foto-Vergleich (A/B)", "Photo compare (A/B)", "Porównanie zdjęć (A/B)"]),
    feature("export_csv", 34, ["CSV-Export", "Export CSV", "Eksport CSV"]),
    feature("early_weigh", 35, ["Frühwiege-Tipps", "Early-weigh tips", "Wczesne ważenie"]),
    feature("kpi_widgets", 38, ["Zusätzliche KPIs", "Extra KPIs", "Dodatkowe KPI"]),
    feature("advanced_trend", 40, ["Erweiterter Trend", "Advanced trend", "Zaawansowany trend"]),
    feature("quick_add", 42, ["Schnell-Hinzufügen", "Quick-add shortcuts", "Skróty szybkiego dodawania"]),
    feature("smart_goal_reminders", 45, ["Intelligente Ziel-Reminder", "Smart goal reminders", "Sprytne przypomnienia celu"]),
    feature("vip_chat", VIP_CHAT_LEVEL, ["VIP-Chat", "VIP chat", "VIP czat"]),
    feature("saved_tags_plus", 52, ["Gespeicherte Tipps: Tags+", "Saved tips: tags+", "Zapisane porady: tagi+"]),
    feature("ai_insights_plus", 55, ["KI-Insights +", "AI insights +", "Wskazówki AI +"]),
    feature("reminder_packs", 58, ["Reminder-Pakete", "Reminder packs", "Pakiety przypomnień"]),
    feature("hydration_tips", 60, ["Hydration-Coaching", "Hydration coaching", "Coach nawodnienia"]),
    feature("water_smart", 62, ["Smartes Wasserziel", "Smart water target", "Sprytny cel wody"]),
    feature("streak_badges", 65, ["Streak-Badges", "Streak badges", "Odznaki serii"]),
    feature("mini_challenges", 68, ["Mini-Challenges", "Mini challenges", "Mini-wyzwania"]),
    feature("custom_events", 70, ["Eigene Wochenziele", "Custom weekly goals", "Własne cele tygodniowe"]),
    feature("gallery_duo", 72, ["Galerie Duo-Ansicht", "Gallery duo view", "Galeria duo"]),
    feature("plateau_coach", 74, ["Plateau-Coach +", "Plateau coach +", "Trener plateau +"]),
    feature("golden_theme", GOLDEN_THEME_LEVEL, ["Theme Golden Pink", "Golden Pink Theme", "Motyw Golden Pink"]),
    feature("weekly_digest", 90, ["Wochendigest", "Weekly digest", "Tygodniowy skrót"]),
    feature("legend_badge", 100, ["Legenden-Badge", "Legend badge", "Odznaka Legendy"]),
];

pub fn unlocked_features(level: u32) -> impl Iterator<Item = &'static Feature> {
    FEATURES.iter().filter(move |f| level >= f.level)
}

pub fn is_unlocked(feature_id: &str, level: u32) -> bool {
    FEATURES
        .iter()
        .any(|f| f.id == feature_id && level >= f.level)
}

/// The next feature still locked at `level`, if any.
pub fn next_unlock(level: u32) -> Option<&'static Feature> {
    FEATURES.iter().find(|f| f.level > level)
}

/// Features that become available when moving from `from` to `to`.
pub fn newly_unlocked(from: u32, to: u32) -> Vec<&'static Feature> {
    FEATURES
        .iter()
        .filter(|f| f.level > from && f.level <= to)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_sorted_by_level() {
        assert!(FEATURES.windows(2).all(|w| w[0].level <= w[1].level));
    }

    #[test]
    fn unlocks_follow_level() {
        assert_eq!(unlocked_features(1).count(), 0);
        let at_ten: Vec<_> = unlocked_features(10).map(|f| f.id).collect();
        assert_eq!(at_ten, ["goal", "analysis", "bmi"]);
        assert!(is_unlocked("vip_chat", 50));
        assert!(!is_unlocked("vip_chat", 49));
        assert!(!is_unlocked("does_not_exist", 100));
        assert_eq!(next_unlock(10).map(|f| f.id), Some("gallery"));
        assert_eq!(next_unlock(100), None);
    }

    #[test]
    fn level_up_reports_the_crossed_features() {
        let crossed: Vec<_> = newly_unlocked(9, 15).into_iter().map(|f| f.id).collect();
        assert_eq!(crossed, ["analysis", "bmi", "gallery"]);
        assert!(newly_unlocked(15, 15).is_empty());
    }

    #[test]
    fn golden_theme_needs_level_75() {
        assert!(!theme_unlocked(Theme::GoldenPink, 74));
        assert!(theme_unlocked(Theme::GoldenPink, 75));
        assert!(theme_unlocked(Theme::PinkVibrant, 1));
        assert_eq!(Theme::parse("golden_pink"), Some(Theme::GoldenPink));
        assert_eq!(Theme::parse("neon"), None);
    }
}
