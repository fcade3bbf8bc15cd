use serde::{Deserialize, Serialize};

use crate::config::CapacityParams;

/// Physiological/context signals sampled at session start. Out-of-range
/// values are clamped, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySignals {
    pub hours_slept: f64,
    pub hour_of_day: u32,
    /// Sessions completed recently enough to still weigh on the learner.
    pub recent_sessions: u32,
    pub items_completed_today: u32,
}

impl Default for CapacitySignals {
    fn default() -> Self {
        Self {
            hours_slept: 7.5,
            hour_of_day: 10,
            recent_sessions: 0,
            items_completed_today: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum WarningLevel {
    #[default]
    None,
    Moderate,
    High,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveCapacity {
    pub base_capacity: u32,
    pub circadian_modifier: f64,
    pub sleep_modifier: f64,
    pub fatigue_modifier: f64,
    pub effective_capacity: u32,
    pub percentage_used: f64,
    pub can_learn_new: bool,
    pub warning_level: WarningLevel,
}

/// Converts learner signals into an effective item budget. Pure and total:
/// every input maps through a clamped curve, and the result is always a
/// constructible session (effective_capacity >= 1).
pub fn compute_capacity(signals: &CapacitySignals, params: &CapacityParams) -> CognitiveCapacity {
    let sleep_modifier = sleep_curve(signals.hours_slept, params);
    let circadian_modifier = circadian_curve(signals.hour_of_day % 24, params);
    let fatigue_modifier = fatigue_curve(signals.recent_sessions, params);

    let base = params.base_capacity.max(1);
    let raw = base as f64 * sleep_modifier * circadian_modifier * fatigue_modifier;
    let ceiling = (base as f64 * 1.5).round() as u32;
    let effective_capacity = (raw.round() as u32).clamp(1, ceiling.max(1));

    let percentage_used =
        (signals.items_completed_today as f64 / effective_capacity as f64).clamp(0.0, 1.0);
    let warning_level = warning_for(percentage_used, params);
    let can_learn_new = percentage_used < params.new_item_cutoff;

    CognitiveCapacity {
        base_capacity: base,
        circadian_modifier,
        sleep_modifier,
        fatigue_modifier,
        effective_capacity,
        percentage_used,
        can_learn_new,
        warning_level,
    }
}

pub fn warning_for(percentage_used: f64, params: &CapacityParams) -> WarningLevel {
    if percentage_used >= params.high_warning_threshold {
        WarningLevel::High
    } else if percentage_used >= params.moderate_warning_threshold {
        WarningLevel::Moderate
    } else {
        WarningLevel::None
    }
}

/// Piecewise-linear sleep curve: bottoms out below `sleep_floor_hours`,
/// climbs to the ceiling at `sleep_optimal_hours`, holds through a two-hour
/// plateau, then decays mildly for oversleep.
fn sleep_curve(hours_slept: f64, params: &CapacityParams) -> f64 {
    let hours = hours_slept.clamp(0.0, 16.0);
    let floor = params.modifier_floor;
    let ceiling = params.modifier_ceiling;

    let value = if hours <= params.sleep_floor_hours {
        floor
    } else if hours < params.sleep_optimal_hours {
        let span = params.sleep_optimal_hours - params.sleep_floor_hours;
        floor + (ceiling - floor) * (hours - params.sleep_floor_hours) / span
    } else if hours <= params.sleep_optimal_hours + 2.0 {
        ceiling
    } else {
        ceiling - 0.1 * (hours - params.sleep_optimal_hours - 2.0)
    };

    value.clamp(floor, ceiling)
}

/// Hour-of-day curve: mid-morning peak, post-lunch dip, mild early-evening
/// recovery, steep late-night decline.
fn circadian_curve(hour: u32, params: &CapacityParams) -> f64 {
    let value: f64 = match hour {
        0..=4 => 0.60,
        5..=6 => 0.75,
        7..=8 => 1.00,
        9..=11 => 1.15,
        12 => 1.00,
        13..=14 => 0.85,
        15..=16 => 0.95,
        17..=19 => 1.05,
        20..=21 => 0.90,
        _ => 0.70,
    };
    value.clamp(params.modifier_floor, params.modifier_ceiling)
}

fn fatigue_curve(recent_sessions: u32, params: &CapacityParams) -> f64 {
    (1.0 - params.fatigue_per_session * recent_sessions as f64)
        .clamp(params.modifier_floor, params.modifier_ceiling)
}
