use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::itinerary::{
    generate_itinerary_id, generate_spot_id, now_millis, DaySchedule, DayStatus,
    ItineraryDocument, ItineraryStatus, Location, TouristSpot,
};
use crate::phase::PlanningPhase;

/// Shown when an LLM reply consisted of nothing but the JSON block.
const FALLBACK_MESSAGE: &str = "Itinerary updated.";

/// Outcome of splitting a raw LLM reply into prose and structured data.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub message: String,
    pub itinerary_data: Option<Value>,
}

/// Partial itinerary as emitted by the model. Every field is optional;
/// unknown fields (including any `id` the model invents) are ignored,
/// which is what guarantees document identity is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<DayUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItineraryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PlanningPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayUpdate {
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spots: Option<Vec<SpotUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DayStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Split a raw model reply into a human-readable message and the first
/// fenced JSON block, if any.
///
/// Only the first ```json block is consumed; later blocks stay in the
/// message untouched. Malformed JSON is a soft failure: the original
/// text is kept in full and `itinerary_data` is `None`. This function
/// never fails.
pub fn parse_ai_response(raw: &str) -> ParsedResponse {
    let Some((start, end, inner)) = find_json_block(raw) else {
        return ParsedResponse {
            message: raw.trim().to_string(),
            itinerary_data: None,
        };
    };

    match serde_json::from_str::<Value>(inner) {
        Ok(value) => {
            let mut message = String::with_capacity(raw.len() - (end - start));
            message.push_str(&raw[..start]);
            message.push_str(&raw[end..]);
            let message = message.trim().to_string();
            ParsedResponse {
                message: if message.is_empty() {
                    FALLBACK_MESSAGE.to_string()
                } else {
                    message
                },
                itinerary_data: Some(value),
            }
        }
        Err(e) => {
            debug!("Ignoring malformed JSON block in model reply: {}", e);
            ParsedResponse {
                message: raw.trim().to_string(),
                itinerary_data: None,
            }
        }
    }
}

/// Locate the first ```json fence. Returns the byte range of the whole
/// block (fences included) plus the inner content.
fn find_json_block(raw: &str) -> Option<(usize, usize, &str)> {
    let start = raw.find("```json")?;
    let inner_start = start + "```json".len();
    let rel_close = raw[inner_start..].find("```")?;
    let inner_end = inner_start + rel_close;
    let end = inner_end + "```".len();
    Some((start, end, raw[inner_start..inner_end].trim()))
}

/// Soft conversion of an extracted JSON block into an update. Valid
/// JSON that is not itinerary-shaped degrades to `None` rather than
/// failing the request.
pub fn itinerary_update_from_value(value: Value) -> Option<ItineraryUpdate> {
    serde_json::from_value(value).ok()
}

/// Merge a partial update into the accumulated document.
///
/// Pure with respect to its inputs. Top-level scalars from `updates`
/// win; `id` and `created_at` are never overwritten; `updated_at` is
/// strictly greater than the previous value on every call. Days are
/// matched by `day`, spots by identity or position within the day, and
/// an absent `updates.schedule` leaves the existing schedule verbatim.
pub fn merge_itinerary_data(
    current: Option<&ItineraryDocument>,
    updates: &ItineraryUpdate,
) -> ItineraryDocument {
    let now = now_millis();

    let Some(current) = current else {
        return ItineraryDocument {
            id: generate_itinerary_id(),
            title: updates.title.clone().unwrap_or_default(),
            destination: updates.destination.clone().unwrap_or_default(),
            schedule: sorted_schedule(
                updates
                    .schedule
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|du| merge_day(None, du))
                    .collect(),
            ),
            start_date: updates.start_date.clone(),
            end_date: updates.end_date.clone(),
            duration: updates.duration,
            summary: updates.summary.clone(),
            total_budget: updates.total_budget,
            currency: updates.currency.clone(),
            status: updates.status.unwrap_or(ItineraryStatus::Draft),
            created_at: now,
            updated_at: now,
            phase: updates.phase,
            current_day: updates.current_day,
        };
    };

    let mut merged = current.clone();

    if let Some(title) = &updates.title {
        merged.title = title.clone();
    }
    if let Some(destination) = &updates.destination {
        merged.destination = destination.clone();
    }
    if updates.start_date.is_some() {
        merged.start_date = updates.start_date.clone();
    }
    if updates.end_date.is_some() {
        merged.end_date = updates.end_date.clone();
    }
    if updates.duration.is_some() {
        merged.duration = updates.duration;
    }
    if updates.summary.is_some() {
        merged.summary = updates.summary.clone();
    }
    if updates.total_budget.is_some() {
        merged.total_budget = updates.total_budget;
    }
    if updates.currency.is_some() {
        merged.currency = updates.currency.clone();
    }
    if let Some(status) = updates.status {
        merged.status = status;
    }
    if updates.phase.is_some() {
        merged.phase = updates.phase;
    }
    if updates.current_day.is_some() {
        merged.current_day = updates.current_day;
    }

    if let Some(day_updates) = &updates.schedule {
        let mut schedule = merged.schedule.clone();
        for du in day_updates {
            match schedule.iter_mut().find(|d| d.day == du.day) {
                Some(existing) => *existing = merge_day(Some(existing), du),
                None => schedule.push(merge_day(None, du)),
            }
        }
        merged.schedule = sorted_schedule(schedule);
    }

    // Strictly monotonic even when two merges land in the same
    // millisecond.
    merged.updated_at = now.max(current.updated_at + 1);
    merged
}

fn merge_day(existing: Option<&DaySchedule>, update: &DayUpdate) -> DaySchedule {
    let spots = match &update.spots {
        Some(incoming) => incoming
            .iter()
            .enumerate()
            .map(|(i, su)| {
                let positional = existing.and_then(|d| d.spots.get(i));
                merge_spot(positional, su)
            })
            .collect(),
        None => existing.map(|d| d.spots.clone()).unwrap_or_default(),
    };

    DaySchedule {
        day: update.day,
        spots,
        date: update
            .date
            .clone()
            .or_else(|| existing.and_then(|d| d.date.clone())),
        title: update
            .title
            .clone()
            .or_else(|| existing.and_then(|d| d.title.clone())),
        theme: update
            .theme
            .clone()
            .or_else(|| existing.and_then(|d| d.theme.clone())),
        total_distance: update
            .total_distance
            .or_else(|| existing.and_then(|d| d.total_distance)),
        total_cost: update
            .total_cost
            .or_else(|| existing.and_then(|d| d.total_cost)),
        status: update
            .status
            .or_else(|| existing.map(|d| d.status))
            .unwrap_or_default(),
    }
}

/// Identity rules: an incoming spot with a non-empty id keeps it
/// unchanged; a spot without one inherits the id of the spot it
/// replaces at the same position, and only truly new spots get a
/// freshly generated id.
fn merge_spot(positional: Option<&TouristSpot>, update: &SpotUpdate) -> TouristSpot {
    let id = match update.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => positional
            .map(|s| s.id.clone())
            .unwrap_or_else(generate_spot_id),
    };

    TouristSpot {
        id,
        name: update
            .name
            .clone()
            .or_else(|| positional.map(|s| s.name.clone()))
            .unwrap_or_default(),
        description: update
            .description
            .clone()
            .or_else(|| positional.map(|s| s.description.clone()))
            .unwrap_or_default(),
        scheduled_time: update
            .scheduled_time
            .clone()
            .or_else(|| positional.and_then(|s| s.scheduled_time.clone())),
        duration: update
            .duration
            .or_else(|| positional.and_then(|s| s.duration)),
        location: update
            .location
            .clone()
            .or_else(|| positional.and_then(|s| s.location.clone())),
        estimated_cost: update
            .estimated_cost
            .or_else(|| positional.and_then(|s| s.estimated_cost)),
        category: update
            .category
            .clone()
            .or_else(|| positional.and_then(|s| s.category.clone())),
    }
}

fn sorted_schedule(mut schedule: Vec<DaySchedule>) -> Vec<DaySchedule> {
    schedule.sort_by_key(|d| d.day);
    schedule
}
