//! Production status state machine
//!
//! The pipeline's stage progression is modeled as a first-class enum with a
//! single transition function, so ordering rules can be tested without any
//! worker runtime attached. Statuses advance monotonically; FAILED and
//! CANCELLED are terminal from any non-terminal state.

use serde::{Deserialize, Serialize};

/// Stage a production is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionStatus {
    Pending,
    Script,
    Voice,
    Music,
    Analyzing,
    Aligning,
    Mixing,
    Measuring,
    Adjusting,
    Completed,
    Failed,
    Cancelled,
}

impl ProductionStatus {
    /// Ordinal used to enforce monotonic advancement.
    fn rank(&self) -> u8 {
        match self {
            ProductionStatus::Pending => 0,
            ProductionStatus::Script => 1,
            ProductionStatus::Voice => 2,
            ProductionStatus::Music => 3,
            ProductionStatus::Analyzing => 4,
            ProductionStatus::Aligning => 5,
            ProductionStatus::Mixing => 6,
            ProductionStatus::Measuring => 7,
            ProductionStatus::Adjusting => 8,
            ProductionStatus::Completed => 9,
            // Terminal failure states sit outside the ordering
            ProductionStatus::Failed => 10,
            ProductionStatus::Cancelled => 10,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProductionStatus::Completed | ProductionStatus::Failed | ProductionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Pending => "PENDING",
            ProductionStatus::Script => "SCRIPT",
            ProductionStatus::Voice => "VOICE",
            ProductionStatus::Music => "MUSIC",
            ProductionStatus::Analyzing => "ANALYZING",
            ProductionStatus::Aligning => "ALIGNING",
            ProductionStatus::Mixing => "MIXING",
            ProductionStatus::Measuring => "MEASURING",
            ProductionStatus::Adjusting => "ADJUSTING",
            ProductionStatus::Completed => "COMPLETED",
            ProductionStatus::Failed => "FAILED",
            ProductionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ProductionStatus::Pending),
            "SCRIPT" => Some(ProductionStatus::Script),
            "VOICE" => Some(ProductionStatus::Voice),
            "MUSIC" => Some(ProductionStatus::Music),
            "ANALYZING" => Some(ProductionStatus::Analyzing),
            "ALIGNING" => Some(ProductionStatus::Aligning),
            "MIXING" => Some(ProductionStatus::Mixing),
            "MEASURING" => Some(ProductionStatus::Measuring),
            "ADJUSTING" => Some(ProductionStatus::Adjusting),
            "COMPLETED" => Some(ProductionStatus::Completed),
            "FAILED" => Some(ProductionStatus::Failed),
            "CANCELLED" => Some(ProductionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that move a production between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    ScriptReady,
    VoiceReady,
    MusicReady,
    AnalysisStarted,
    AlignmentStarted,
    MixStarted,
    MeasurementStarted,
    AdjustmentStarted,
    Finalized,
    Failed,
    Cancelled,
}

impl StageEvent {
    fn target(&self) -> ProductionStatus {
        match self {
            StageEvent::ScriptReady => ProductionStatus::Script,
            StageEvent::VoiceReady => ProductionStatus::Voice,
            StageEvent::MusicReady => ProductionStatus::Music,
            StageEvent::AnalysisStarted => ProductionStatus::Analyzing,
            StageEvent::AlignmentStarted => ProductionStatus::Aligning,
            StageEvent::MixStarted => ProductionStatus::Mixing,
            StageEvent::MeasurementStarted => ProductionStatus::Measuring,
            StageEvent::AdjustmentStarted => ProductionStatus::Adjusting,
            StageEvent::Finalized => ProductionStatus::Completed,
            StageEvent::Failed => ProductionStatus::Failed,
            StageEvent::Cancelled => ProductionStatus::Cancelled,
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: ProductionStatus,
    pub event: StageEvent,
}

/// The single transition function `(state, event) -> state`.
///
/// Rules:
/// - Terminal states accept no events.
/// - Failed / Cancelled are reachable from any non-terminal state.
/// - Stage events may skip forward (the mixing job moves Analyzing to
///   Mixing directly when analysis fails) but never backward.
pub fn advance(
    from: ProductionStatus,
    event: StageEvent,
) -> std::result::Result<ProductionStatus, TransitionError> {
    if from.is_terminal() {
        return Err(TransitionError { from, event });
    }
    let to = event.target();
    match event {
        StageEvent::Failed | StageEvent::Cancelled => Ok(to),
        _ => {
            if to.rank() > from.rank() {
                Ok(to)
            } else {
                Err(TransitionError { from, event })
            }
        }
    }
}
