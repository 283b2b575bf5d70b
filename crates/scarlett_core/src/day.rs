//! Per-day habit record.
//!
//! A [`DayRecord`] is created with zero defaults the first time a day key is
//! touched and is never removed. Its activity log is append-only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize};

use crate::time::to_date_key;

pub const PILL_XP: u64 = 15;
pub const FLAG_XP: u64 = 10;
pub const DEFAULT_CUP_ML: u32 = 250;
pub const MAX_CUP_ML: u32 = 1000;
pub const DEFAULT_WATER_GOAL_ML: u32 = 2000;
pub const WATER_CURE_ML: u32 = 1000;
pub const SPORT_BONUS_ML: u32 = 500;
pub const ML_PER_KG: f64 = 35.0;
pub const MAX_PHOTOS_PER_DAY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PillSlot {
    Morning,
    Evening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DrinkKind {
    Water,
    Coffee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DrinkFlag {
    SlimCoffee,
    GingerGarlicTea,
    WaterCure,
    Sport,
}

impl DrinkFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            DrinkFlag::SlimCoffee => "slimCoffee",
            DrinkFlag::GingerGarlicTea => "gingerGarlicTea",
            DrinkFlag::WaterCure => "waterCure",
            DrinkFlag::Sport => "sport",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "slimCoffee" => Some(DrinkFlag::SlimCoffee),
            "gingerGarlicTea" => Some(DrinkFlag::GingerGarlicTea),
            "waterCure" => Some(DrinkFlag::WaterCure),
            "sport" => Some(DrinkFlag::Sport),
            _ => None,
        }
    }
}

/// Discrete trackable action, used to pay habit XP at most once per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HabitKey {
    Pill(PillSlot),
    Flag(DrinkFlag),
}

impl HabitKey {
    pub fn as_str(self) -> &'static str {
        match self {
            HabitKey::Pill(PillSlot::Morning) => "pills_morning",
            HabitKey::Pill(PillSlot::Evening) => "pills_evening",
            HabitKey::Flag(flag) => flag.as_str(),
        }
    }

    pub fn reward(self) -> u64 {
        match self {
            HabitKey::Pill(_) => PILL_XP,
            HabitKey::Flag(_) => FLAG_XP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pills {
    pub morning: bool,
    pub evening: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Drinks {
    pub water: u32,
    pub coffee: u32,
    pub slim_coffee: bool,
    pub ginger_garlic_tea: bool,
    pub water_cure: bool,
    pub sport: bool,
}

impl Drinks {
    fn flag_mut(&mut self, flag: DrinkFlag) -> &mut bool {
        match flag {
            DrinkFlag::SlimCoffee => &mut self.slim_coffee,
            DrinkFlag::GingerGarlicTea => &mut self.ginger_garlic_tea,
            DrinkFlag::WaterCure => &mut self.water_cure,
            DrinkFlag::Sport => &mut self.sport,
        }
    }

    pub fn flag(&self, flag: DrinkFlag) -> bool {
        match flag {
            DrinkFlag::SlimCoffee => self.slim_coffee,
            DrinkFlag::GingerGarlicTea => self.ginger_garlic_tea,
            DrinkFlag::WaterCure => self.water_cure,
            DrinkFlag::Sport => self.sport,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub ts: i64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ActivityValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMeta {
    pub uri: String,
    pub thumb_uri: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayRecord {
    pub date: String,
    pub pills: Pills,
    pub drinks: Drinks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_time: Option<i64>,
    #[serde(deserialize_with = "habit_flags")]
    pub xp_today: BTreeSet<String>,
    pub activity_log: Vec<ActivityEntry>,
    pub photos: Vec<PhotoMeta>,
}

impl DayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self::for_key(&to_date_key(date))
    }

    pub fn for_key(key: &str) -> Self {
        Self {
            date: key.to_string(),
            ..Self::default()
        }
    }

    pub fn log(&mut self, ts: i64, action: impl Into<String>, value: Option<ActivityValue>) {
        self.activity_log.push(ActivityEntry {
            ts,
            action: action.into(),
            value,
            note: None,
        });
    }

    /// Flip a pill and return the habit XP earned by this flip.
    pub fn toggle_pill(&mut self, slot: PillSlot, ts: i64) -> u64 {
        let taken = match slot {
            PillSlot::Morning => &mut self.pills.morning,
            PillSlot::Evening => &mut self.pills.evening,
        };
        *taken = !*taken;
        let now = *taken;
        let action = match slot {
            PillSlot::Morning => "pill_morning",
            PillSlot::Evening => "pill_evening",
        };
        self.log(ts, action, Some(ActivityValue::Flag(now)));
        self.award_once(HabitKey::Pill(slot), now)
    }

    /// Flip a drink/sport flag and return the habit XP earned by this flip.
    pub fn toggle_flag(&mut self, flag: DrinkFlag, ts: i64) -> u64 {
        let slot = self.drinks.flag_mut(flag);
        *slot = !*slot;
        let now = *slot;
        self.log(ts, format!("flag_{}", flag.as_str()), Some(ActivityValue::Flag(now)));
        self.award_once(HabitKey::Flag(flag), now)
    }

    fn award_once(&mut self, key: HabitKey, switched_on: bool) -> u64 {
        if switched_on && self.xp_today.insert(key.as_str().to_string()) {
            key.reward()
        } else {
            0
        }
    }

    pub fn increment_drink(&mut self, kind: DrinkKind, delta: i32, ts: i64) -> u32 {
        let counter = match kind {
            DrinkKind::Water => &mut self.drinks.water,
            DrinkKind::Coffee => &mut self.drinks.coffee,
        };
        *counter = if delta < 0 {
            counter.saturating_sub(delta.unsigned_abs())
        } else {
            counter.saturating_add(delta as u32)
        };
        let value = *counter;
        let action = match kind {
            DrinkKind::Water => "drink_water",
            DrinkKind::Coffee => "drink_coffee",
        };
        self.log(ts, action, Some(ActivityValue::Number(value as f64)));
        value
    }

    pub fn both_pills(&self) -> bool {
        self.pills.morning && self.pills.evening
    }

    pub fn has_weight(&self) -> bool {
        self.weight.is_some()
    }

    /// True once anything at all was logged for the day.
    pub fn has_activity(&self) -> bool {
        !self.activity_log.is_empty()
    }

    pub fn water_intake_ml(&self, cup_ml: u32) -> u32 {
        let cure = if self.drinks.water_cure { WATER_CURE_ML } else { 0 };
        self.drinks.water.saturating_mul(cup_ml).saturating_add(cure)
    }

    pub fn water_goal_ml(&self) -> u32 {
        let base = match self.weight {
            Some(kg) if kg > 0.0 => (kg * ML_PER_KG).round().min(u32::MAX as f64) as u32,
            _ => DEFAULT_WATER_GOAL_ML,
        };
        let sport = if self.drinks.sport { SPORT_BONUS_ML } else { 0 };
        base.saturating_add(sport)
    }

    pub fn water_goal_met(&self, cup_ml: u32) -> bool {
        self.water_intake_ml(cup_ml) >= self.water_goal_ml()
    }

    /// Both pills, water goal and a weigh-in on the same day.
    pub fn is_perfect(&self, cup_ml: u32) -> bool {
        self.both_pills() && self.water_goal_met(cup_ml) && self.has_weight()
    }

    /// Local hour of the weigh-in, if one was logged.
    pub fn weigh_in_hour(&self) -> Option<u32> {
        let ts = self.weight_time?;
        Local
            .timestamp_millis_opt(ts)
            .single()
            .map(|dt| dt.hour())
    }
}

fn habit_flags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flags {
        List(Vec<String>),
        Map(BTreeMap<String, bool>),
    }

    Ok(match Option::<Flags>::deserialize(deserializer)? {
        Some(Flags::List(list)) => list.into_iter().collect(),
        Some(Flags::Map(map)) => map
            .into_iter()
            .filter_map(|(key, paid)| paid.then_some(key))
            .collect(),
        None => BTreeSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DayRecord {
        DayRecord::for_key("2024-05-01")
    }

    #[test]
    fn pill_xp_is_paid_once_per_day() {
        let mut d = day();
        assert_eq!(d.toggle_pill(PillSlot::Morning, 1), PILL_XP);
        assert_eq!(d.toggle_pill(PillSlot::Morning, 2), 0);
        assert!(!d.pills.morning);
        assert_eq!(d.toggle_pill(PillSlot::Morning, 3), 0);
        assert!(d.pills.morning);
        assert_eq!(d.activity_log.len(), 3);
        assert_eq!(d.toggle_pill(PillSlot::Evening, 4), PILL_XP);
    }

    #[test]
    fn flag_xp_is_paid_once_per_flag() {
        let mut d = day();
        assert_eq!(d.toggle_flag(DrinkFlag::Sport, 1), FLAG_XP);
        assert_eq!(d.toggle_flag(DrinkFlag::Sport, 2), 0);
        assert_eq!(d.toggle_flag(DrinkFlag::Sport, 3), 0);
        assert_eq!(d.toggle_flag(DrinkFlag::WaterCure, 4), FLAG_XP);
        assert!(d.xp_today.contains("sport"));
        assert_eq!(d.activity_log[0].action, "flag_sport");
    }

    #[test]
    fn drink_counts_never_go_negative() {
        let mut d = day();
        assert_eq!(d.increment_drink(DrinkKind::Coffee, -1, 1), 0);
        assert_eq!(d.increment_drink(DrinkKind::Water, 1, 2), 1);
        assert_eq!(d.increment_drink(DrinkKind::Water, 1, 3), 2);
        assert_eq!(d.increment_drink(DrinkKind::Water, -1, 4), 1);
    }

    #[test]
    fn water_goal_boundary() {
        let mut d = day();
        d.weight = Some(60.0);
        assert_eq!(d.water_goal_ml(), 2100);
        d.drinks.water = 7;
        assert_eq!(d.water_intake_ml(300), 2100);
        assert!(d.water_goal_met(300));
        assert!(!d.water_goal_met(299));

        d.drinks.water = 2099;
        assert!(!d.water_goal_met(1));
        d.drinks.water = 2100;
        assert!(d.water_goal_met(1));

        d.drinks.sport = true;
        assert_eq!(d.water_goal_ml(), 2600);
        assert!(!d.water_goal_met(1));
        d.drinks.water = 2600;
        assert!(d.water_goal_met(1));
        d.drinks.water = 7;
        d.drinks.water_cure = true;
        assert!(d.water_goal_met(300));
    }

    #[test]
    fn huge_weight_saturates_the_goal() {
        let mut d = day();
        d.weight = Some(1e12);
        d.drinks.sport = true;
        assert_eq!(d.water_goal_ml(), u32::MAX);
        assert!(!d.water_goal_met(DEFAULT_CUP_ML));
    }

    #[test]
    fn default_goal_without_weight() {
        let d = day();
        assert_eq!(d.water_goal_ml(), DEFAULT_WATER_GOAL_ML);
        assert!(!d.water_goal_met(DEFAULT_CUP_ML));
    }

    #[test]
    fn legacy_flag_maps_are_accepted() {
        let raw = r#"{"date":"2024-05-01","pills":{"morning":true},"xpToday":{"pills_morning":true,"sport":false}}"#;
        let d: DayRecord = serde_json::from_str(raw).unwrap();
        assert!(d.pills.morning);
        assert!(!d.pills.evening);
        assert!(d.xp_today.contains("pills_morning"));
        assert!(!d.xp_today.contains("sport"));
        assert!(d.activity_log.is_empty());
        assert_eq!(d.drinks, Drinks::default());
    }
}
