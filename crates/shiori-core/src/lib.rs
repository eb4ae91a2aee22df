pub mod chunk;
pub mod itinerary;
pub mod merge;
pub mod phase;
pub mod progress;

pub use chunk::{BatchProgress, MultiStreamChunk};
pub use itinerary::{
    generate_itinerary_id, generate_spot_id, now_millis, DaySchedule, DayDetailTask, DayStatus,
    ItineraryDocument, ItineraryStatus, Location, TouristSpot,
};
pub use merge::{
    itinerary_update_from_value, merge_itinerary_data, parse_ai_response, DayUpdate,
    ItineraryUpdate, ParsedResponse, SpotUpdate,
};
pub use phase::{PhaseState, PlanningPhase};
pub use progress::{calculate_itinerary_progress, day_completeness, spot_completeness};
