use serde::{Deserialize, Serialize};

use crate::itinerary::{now_millis, ItineraryDocument};

/// Aggregate batch bookkeeping attached to `progress` and `done`
/// chunks. `progress_rate` counts attempted-and-succeeded days; the
/// final `done` chunk always reports 100 with failures visible in
/// `error_days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed_days: Vec<u32>,
    pub processing_days: Vec<u32>,
    pub error_days: Vec<u32>,
    pub total_days: u32,
    pub progress_rate: u32,
}

impl BatchProgress {
    pub fn rate(completed: usize, total: usize) -> u32 {
        if total == 0 {
            return 0;
        }
        ((completed as f64 / total as f64) * 100.0).round() as u32
    }
}

/// One event on the multiplexed batch-detailing stream.
///
/// Per-day ordering is guaranteed (`day_start` then `message`* then an
/// optional `itinerary` then `day_complete` or `day_error`); chunks of
/// different days interleave freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MultiStreamChunk {
    DayStart {
        day: u32,
        timestamp: u64,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day: Option<u32>,
        content: String,
        timestamp: u64,
    },
    Itinerary {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day: Option<u32>,
        itinerary: ItineraryDocument,
        timestamp: u64,
    },
    DayComplete {
        day: u32,
        timestamp: u64,
    },
    DayError {
        day: u32,
        error: String,
        timestamp: u64,
    },
    Progress {
        progress: BatchProgress,
        timestamp: u64,
    },
    Done {
        progress: BatchProgress,
        timestamp: u64,
    },
    Error {
        error: String,
        timestamp: u64,
    },
}

impl MultiStreamChunk {
    pub fn day_start(day: u32) -> Self {
        MultiStreamChunk::DayStart {
            day,
            timestamp: now_millis(),
        }
    }

    pub fn message(day: Option<u32>, content: impl Into<String>) -> Self {
        MultiStreamChunk::Message {
            day,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn itinerary(day: Option<u32>, itinerary: ItineraryDocument) -> Self {
        MultiStreamChunk::Itinerary {
            day,
            itinerary,
            timestamp: now_millis(),
        }
    }

    pub fn day_complete(day: u32) -> Self {
        MultiStreamChunk::DayComplete {
            day,
            timestamp: now_millis(),
        }
    }

    pub fn day_error(day: u32, error: impl Into<String>) -> Self {
        MultiStreamChunk::DayError {
            day,
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn progress(progress: BatchProgress) -> Self {
        MultiStreamChunk::Progress {
            progress,
            timestamp: now_millis(),
        }
    }

    pub fn done(progress: BatchProgress) -> Self {
        MultiStreamChunk::Done {
            progress,
            timestamp: now_millis(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        MultiStreamChunk::Error {
            error: error.into(),
            timestamp: now_millis(),
        }
    }
}
