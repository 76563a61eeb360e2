//! Recording state machine states

use serde::{Deserialize, Serialize};

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Encoder running, elapsed counter advancing
    Recording,
    /// Encoder paused, elapsed counter frozen
    Paused,
    /// Artifact assembled and held until discard
    Stopped,
}

/// Operations that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
    Discard,
}

impl RecordingState {
    /// Target state of `transition`, or `None` if it is not legal from here
    pub fn next(self, transition: Transition) -> Option<RecordingState> {
        use RecordingState::*;
        match (self, transition) {
            (Idle, Transition::Start) => Some(Recording),
            (Recording, Transition::Pause) => Some(Paused),
            (Paused, Transition::Resume) => Some(Recording),
            (Recording | Paused, Transition::Stop) => Some(Stopped),
            (Stopped, Transition::Discard) => Some(Idle),
            _ => None,
        }
    }

    /// Encoder is live (recording or paused)
    pub fn is_active(self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::Paused)
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
            RecordingState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert_eq!(RecordingState::Idle.next(Transition::Start), Some(RecordingState::Recording));
        assert_eq!(RecordingState::Recording.next(Transition::Pause), Some(RecordingState::Paused));
        assert_eq!(RecordingState::Paused.next(Transition::Resume), Some(RecordingState::Recording));
        assert_eq!(RecordingState::Paused.next(Transition::Stop), Some(RecordingState::Stopped));
        assert_eq!(RecordingState::Stopped.next(Transition::Discard), Some(RecordingState::Idle));
    }

    #[test]
    fn test_everything_else_is_rejected() {
        let states = [
            RecordingState::Idle,
            RecordingState::Recording,
            RecordingState::Paused,
            RecordingState::Stopped,
        ];
        let transitions = [
            Transition::Start,
            Transition::Pause,
            Transition::Resume,
            Transition::Stop,
            Transition::Discard,
        ];

        let legal = states
            .iter()
            .flat_map(|s| transitions.iter().map(move |t| s.next(*t)))
            .filter(Option::is_some)
            .count();
        assert_eq!(legal, 6);

        assert_eq!(RecordingState::Stopped.next(Transition::Start), None);
        assert_eq!(RecordingState::Idle.next(Transition::Stop), None);
        assert_eq!(RecordingState::Recording.next(Transition::Resume), None);
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&RecordingState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
