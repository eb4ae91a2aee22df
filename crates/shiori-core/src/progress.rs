use crate::itinerary::{DaySchedule, ItineraryDocument, TouristSpot};
use crate::phase::PlanningPhase;

/// Floor reported for every phase past `initial` that has no finer
/// signal yet.
const COLLECTING_FLOOR: f64 = 10.0;
/// Points distributed evenly across days once a skeleton exists.
const DAY_BUDGET: f64 = 90.0;

/// Weighted field completeness of a single spot, in `[0, 1]`.
///
/// Existence plus name plus description make up roughly 70% of the
/// weight, timing 20%, and location/cost/category the remaining 10%.
pub fn spot_completeness(spot: &TouristSpot) -> f64 {
    let mut score: f64 = 0.20;
    if !spot.name.trim().is_empty() {
        score += 0.25;
    }
    if !spot.description.trim().is_empty() {
        score += 0.25;
    }
    if spot.scheduled_time.is_some() {
        score += 0.10;
    }
    if spot.duration.is_some() {
        score += 0.10;
    }
    if spot.location.is_some() {
        score += 0.04;
    }
    if spot.estimated_cost.is_some() {
        score += 0.03;
    }
    if spot.category.is_some() {
        score += 0.03;
    }
    score.min(1.0)
}

/// Mean spot completeness for a day; 0 when the day has no spots yet.
pub fn day_completeness(day: &DaySchedule) -> f64 {
    if day.spots.is_empty() {
        return 0.0;
    }
    day.spots.iter().map(spot_completeness).sum::<f64>() / day.spots.len() as f64
}

/// Continuous 0-100 completion estimate from the current phase and the
/// partial document, computed purely client-side.
///
/// Days are weighted equally regardless of complexity. In `skeleton`
/// each day can earn at most half of its budget; in `detailing` every
/// day is granted its full skeleton half up front (skeleton is assumed
/// done by then) plus a detailing half weighted by actual completeness.
/// The detailing formula is intentionally not clamped and can exceed
/// 100 when skeleton data was still thin; callers clamp for display.
pub fn calculate_itinerary_progress(
    itinerary: Option<&ItineraryDocument>,
    phase: PlanningPhase,
) -> f64 {
    match phase {
        PlanningPhase::Initial => 0.0,
        PlanningPhase::CollectingBasic | PlanningPhase::CollectingDetailed => COLLECTING_FLOOR,
        PlanningPhase::Completed => 100.0,
        PlanningPhase::Skeleton | PlanningPhase::Detailing => {
            let Some(itinerary) = itinerary else {
                return COLLECTING_FLOOR;
            };
            let total_days = itinerary.total_days();
            if total_days == 0 {
                return COLLECTING_FLOOR;
            }
            let per_day = DAY_BUDGET / total_days as f64;

            let detail_credit: f64 = itinerary
                .schedule
                .iter()
                .map(|day| per_day * 0.5 * day_completeness(day))
                .sum();

            match phase {
                PlanningPhase::Skeleton => COLLECTING_FLOOR + detail_credit,
                _ => {
                    let skeleton_credit = itinerary.schedule.len() as f64 * per_day * 0.5;
                    COLLECTING_FLOOR + skeleton_credit + detail_credit
                }
            }
        }
    }
}
