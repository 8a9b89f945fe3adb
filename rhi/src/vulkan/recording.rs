#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordingEvent {
    Start,
    End,
}

impl RecordingState {
    pub fn next(self, event: RecordingEvent) -> Option<RecordingState> {
        match (self, event) {
            (RecordingState::Idle, RecordingEvent::Start) => Some(RecordingState::Recording),
            (RecordingState::Recording, RecordingEvent::End) => Some(RecordingState::Idle),
            (RecordingState::Recording, RecordingEvent::Start)
            | (RecordingState::Idle, RecordingEvent::End) => None,
        }
    }

    pub fn is_recording(self) -> bool {
        self == RecordingState::Recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use RecordingEvent::*;
        use RecordingState::*;

        assert_eq!(Idle.next(Start), Some(Recording));
        assert_eq!(Recording.next(Start), None);
        assert_eq!(Recording.next(End), Some(Idle));
        assert_eq!(Idle.next(End), None);
        assert!(!RecordingState::default().is_recording());
    }
}
