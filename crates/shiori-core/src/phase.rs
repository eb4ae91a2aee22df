use serde::{Deserialize, Serialize};

/// The planning phases an itinerary build walks through, strictly in
/// order. Transitions happen only on an explicit proceed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningPhase {
    Initial,
    CollectingBasic,
    CollectingDetailed,
    Skeleton,
    Detailing,
    Completed,
}

impl PlanningPhase {
    /// Advisory checklist of what a caller should have gathered before
    /// proceeding out of this phase. The state machine itself never
    /// validates against it.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            PlanningPhase::Initial => &[],
            PlanningPhase::CollectingBasic => &["destination", "duration"],
            PlanningPhase::CollectingDetailed => &["interests", "budget"],
            PlanningPhase::Skeleton => &["schedule"],
            PlanningPhase::Detailing => &[],
            PlanningPhase::Completed => &[],
        }
    }
}

/// Current position in the build: the phase plus, while detailing, the
/// day being worked on.
///
/// Invariant: `current_detailing_day` is `Some` exactly when the phase
/// is `Detailing`, and then lies in `[1, total_days]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: PlanningPhase,
    pub current_detailing_day: Option<u32>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            phase: PlanningPhase::Initial,
            current_detailing_day: None,
        }
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self) -> bool {
        self.phase == PlanningPhase::Completed
    }

    /// Advance one step. Within `Detailing` this moves to the next day
    /// until `total_days` is reached, after which the build completes.
    /// `Completed` is terminal; proceeding there is a no-op.
    pub fn proceed(&mut self, total_days: u32) {
        match self.phase {
            PlanningPhase::Initial => self.phase = PlanningPhase::CollectingBasic,
            PlanningPhase::CollectingBasic => self.phase = PlanningPhase::CollectingDetailed,
            PlanningPhase::CollectingDetailed => self.phase = PlanningPhase::Skeleton,
            PlanningPhase::Skeleton => {
                if total_days == 0 {
                    self.phase = PlanningPhase::Completed;
                } else {
                    self.phase = PlanningPhase::Detailing;
                    self.current_detailing_day = Some(1);
                }
            }
            PlanningPhase::Detailing => {
                let day = self.current_detailing_day.unwrap_or(1);
                if day < total_days {
                    self.current_detailing_day = Some(day + 1);
                } else {
                    self.phase = PlanningPhase::Completed;
                    self.current_detailing_day = None;
                }
            }
            PlanningPhase::Completed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_forward_walk() {
        let mut state = PhaseState::new();
        let total_days = 3;

        state.proceed(total_days);
        assert_eq!(state.phase, PlanningPhase::CollectingBasic);
        state.proceed(total_days);
        assert_eq!(state.phase, PlanningPhase::CollectingDetailed);
        state.proceed(total_days);
        assert_eq!(state.phase, PlanningPhase::Skeleton);
        assert_eq!(state.current_detailing_day, None);

        state.proceed(total_days);
        assert_eq!(state.phase, PlanningPhase::Detailing);
        assert_eq!(state.current_detailing_day, Some(1));

        state.proceed(total_days);
        assert_eq!(state.current_detailing_day, Some(2));
        state.proceed(total_days);
        assert_eq!(state.current_detailing_day, Some(3));

        state.proceed(total_days);
        assert_eq!(state.phase, PlanningPhase::Completed);
        assert_eq!(state.current_detailing_day, None);
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut state = PhaseState {
            phase: PlanningPhase::Completed,
            current_detailing_day: None,
        };
        state.proceed(5);
        assert_eq!(state.phase, PlanningPhase::Completed);
        assert_eq!(state.current_detailing_day, None);
    }

    #[test]
    fn test_zero_day_trip_skips_detailing() {
        let mut state = PhaseState {
            phase: PlanningPhase::Skeleton,
            current_detailing_day: None,
        };
        state.proceed(0);
        assert_eq!(state.phase, PlanningPhase::Completed);
    }

    #[test]
    fn test_wire_names_are_snake_case() {
        let json = serde_json::to_string(&PlanningPhase::CollectingBasic).unwrap();
        assert_eq!(json, "\"collecting_basic\"");
        let back: PlanningPhase = serde_json::from_str("\"detailing\"").unwrap();
        assert_eq!(back, PlanningPhase::Detailing);
    }
}
