//! Server status messages and the progress they stand for.
//!
//! The recognition service reports its current pipeline stage as free text.
//! The table below is ordered by stage; only the two sentinels end a job.

/// Status text signalling that the MusicXML document can be downloaded.
pub const READY_MESSAGE: &str = "File is ready";

/// Status text signalling that the server gave up on the job.
pub const FAILED_MESSAGE: &str = "Failed";

/// Known stages, in the order the service walks through them.
pub const STAGES: &[(&str, u8)] = &[
    ("Extracting staffline and symbols", 5),
    ("Extracting layers of different symbols", 10),
    ("Extracting noteheads", 15),
    ("Analyzing notehead bboxes", 20),
    ("Instantiating notes", 25),
    ("Grouping noteheads", 30),
    ("Extracting symbols", 35),
    ("Extracting rhythm types", 40),
    ("Building MusicXML document", 75),
    (READY_MESSAGE, 100),
];

/// Progress percentage for a status message, if the message is a known stage.
pub fn progress_for(message: &str) -> Option<u8> {
    STAGES
        .iter()
        .find(|(stage, _)| *stage == message)
        .map(|(_, percent)| *percent)
}

/// What a status message means for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Keep polling.
    InProgress,
    /// Terminal success.
    Ready,
    /// Terminal failure.
    Failed,
}

impl StatusKind {
    pub fn classify(message: &str) -> Self {
        match message {
            READY_MESSAGE => StatusKind::Ready,
            FAILED_MESSAGE => StatusKind::Failed,
            _ => StatusKind::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, StatusKind::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_stages_map_to_fixed_percent() {
        assert_eq!(progress_for("Extracting staffline and symbols"), Some(5));
        assert_eq!(progress_for("Building MusicXML document"), Some(75));
        assert_eq!(progress_for(READY_MESSAGE), Some(100));
    }

    #[test]
    fn unknown_and_failed_messages_are_unmapped() {
        assert_eq!(progress_for("Queued"), None);
        assert_eq!(progress_for(""), None);
        assert_eq!(progress_for(FAILED_MESSAGE), None);
        // Matching is exact.
        assert_eq!(progress_for("extracting noteheads"), None);
    }

    #[test]
    fn stages_are_strictly_increasing_and_end_at_100() {
        let percents: Vec<u8> = STAGES.iter().map(|(_, p)| *p).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
        // Only the ready sentinel reaches 100.
        assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    }

    #[test]
    fn classify_sentinels() {
        assert_eq!(StatusKind::classify(READY_MESSAGE), StatusKind::Ready);
        assert_eq!(StatusKind::classify(FAILED_MESSAGE), StatusKind::Failed);
        assert_eq!(
            StatusKind::classify("Grouping noteheads"),
            StatusKind::InProgress
        );
        assert!(StatusKind::Failed.is_terminal());
        assert!(!StatusKind::InProgress.is_terminal());
    }
}
