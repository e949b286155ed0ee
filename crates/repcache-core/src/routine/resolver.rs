//! Pure date logic deciding which cycle and sub-cycle are current.

use chrono::NaiveDate;

use crate::models::{Macrocycle, Mesocycle, Microcycle};

/// How far back a finished training day still makes its microcycle relevant.
const RECENT_WINDOW_DAYS: i64 = 7;

/// First cycle whose status puts it in effect. Only one is expected, but if
/// several match the first one in plan order wins.
pub fn find_active_cycle(macrocycle: &Macrocycle) -> Option<&Mesocycle> {
    macrocycle.mesocycles.iter().find(|m| m.status.is_current())
}

/// A microcycle is relevant once it has started (some day on or before
/// `today`) and it is either still running (some day on or after `today`) or
/// finished within the trailing window.
pub fn is_relevant(micro: &Microcycle, today: NaiveDate) -> bool {
    let mut started = false;
    let mut upcoming = false;
    let mut recent = false;

    for date in micro.dates() {
        let days_ago = (today - date).num_days();
        if days_ago >= 0 {
            started = true;
        }
        if days_ago <= 0 {
            upcoming = true;
        }
        if (0..=RECENT_WINDOW_DAYS).contains(&days_ago) {
            recent = true;
        }
    }

    started && (upcoming || recent)
}

/// The last relevant microcycle in plan order, or the first one if none is.
pub fn default_micro_index(micros: &[Microcycle], today: NaiveDate) -> usize {
    micros
        .iter()
        .enumerate()
        .filter(|(_, micro)| is_relevant(micro, today))
        .map(|(index, _)| index)
        .last()
        .unwrap_or(0)
}

/// Use the remembered selection when it still points at a microcycle,
/// otherwise fall back to the date-based default.
pub fn initial_micro_index(micros: &[Microcycle], today: NaiveDate, remembered: Option<usize>) -> usize {
    match remembered {
        Some(index) if index < micros.len() => index,
        _ => default_micro_index(micros, today),
    }
}
