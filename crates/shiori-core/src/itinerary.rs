use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::phase::PlanningPhase;

/// Root aggregate for a travel itinerary under construction.
///
/// Field names are camelCase on the wire to match the JSON the consumer
/// frontend and the LLM prompts already use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryDocument {
    pub id: String,
    pub title: String,
    pub destination: String,
    #[serde(default)]
    pub schedule: Vec<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Trip length in days. When absent, `schedule.len()` is the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub status: ItineraryStatus,
    /// Epoch milliseconds.
    pub created_at: u64,
    /// Epoch milliseconds, strictly increasing across merges.
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PlanningPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItineraryStatus {
    Draft,
    Completed,
    Archived,
}

impl Default for ItineraryStatus {
    fn default() -> Self {
        ItineraryStatus::Draft
    }
}

/// One day of the trip. `day` is 1-based and unique within a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day: u32,
    #[serde(default)]
    pub spots: Vec<TouristSpot>,
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
    /// UI/progress hint only, never consulted for control flow.
    #[serde(default)]
    pub status: DayStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Draft,
    Skeleton,
    Detailed,
    Completed,
}

impl Default for DayStatus {
    fn default() -> Self {
        DayStatus::Draft
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouristSpot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `HH:mm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Ephemeral description of one day-detailing job. Created fresh from
/// the current skeleton for every batch run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayDetailTask {
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub priority: u32,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn generate_itinerary_id() -> String {
    format!("itinerary-{}", now_millis())
}

/// Spot ids carry a random suffix so that spots generated within the
/// same millisecond stay unique.
pub fn generate_spot_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("spot-{}-{}", now_millis(), suffix)
}

impl ItineraryDocument {
    /// Trip length used for progress math: explicit `duration` when
    /// positive, otherwise however many days the schedule holds.
    pub fn total_days(&self) -> u32 {
        match self.duration {
            Some(d) if d > 0 => d,
            _ => self.schedule.len() as u32,
        }
    }

    pub fn day(&self, day: u32) -> Option<&DaySchedule> {
        self.schedule.iter().find(|d| d.day == day)
    }
}
