use std::fmt;

/// Rotation operations the coordinator runs on its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Switch,
    Clear,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Switch => "switch",
            Self::Clear => "clear",
        })
    }
}

/// How a rotation operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Switch finished; this many photos landed in the gallery.
    Switched(usize),
    /// Clear finished; this many photos went back to the library.
    ClearedBack(usize),
    /// Clear found no gallery directory.
    GalleryMissing,
    /// The cancellation flag stopped the operation early.
    Cancelled,
    /// The operation aborted with an error.
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switched(n) => write!(f, "Switched {n} photos"),
            Self::ClearedBack(n) => write!(f, "Moved {n} photos back"),
            Self::GalleryMissing => f.write_str("Gallery directory does not exist"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Failed(msg) => write!(f, "Error: {msg}"),
        }
    }
}

/// Notifications published to subscribers of the rotation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationEvent {
    Started(Operation),
    Finished {
        operation: Operation,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Working,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Ready",
            Self::Working => "Working...",
        })
    }
}

/// Point-in-time view of the engine for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: OperationState,
    pub last_outcome: Option<Outcome>,
    pub viewed: usize,
}
