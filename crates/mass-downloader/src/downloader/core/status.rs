//! Per-artifact download status

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single artifact (one waveform interval or one station's metadata)
///
/// Transitions are monotonic within a run: an artifact leaves `None` exactly
/// once, and the only move out of a settled state is `Downloaded` into
/// `Ignore` (filtering after the fact). `Exists` and `DownloadFailed` are
/// final. Nothing ever returns to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not decided yet, or resolved to a path and waiting to be fetched
    #[default]
    None,
    /// Present on disk before this run started
    Exists,
    /// Fetched during this run
    Downloaded,
    /// Excluded by policy (duplicate, too close, sanitized away)
    Ignore,
    /// Transfer failed; not retried within the run
    DownloadFailed,
}

impl Status {
    /// Artifact is backed by a file on disk
    pub fn has_data(self) -> bool {
        matches!(self, Status::Exists | Status::Downloaded)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    pub fn can_transition_to(self, next: Status) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Status::None) => false,
            (Status::None, _) => true,
            (Status::Downloaded, Status::Ignore) => true,
            _ => false,
        }
    }

    /// Apply a transition, returning whether it was accepted
    pub fn transition(&mut self, next: Status) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::None => "none",
            Status::Exists => "exists",
            Status::Downloaded => "downloaded",
            Status::Ignore => "ignore",
            Status::DownloadFailed => "download_failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_moves_anywhere_but_back() {
        for next in [Status::Exists, Status::Downloaded, Status::Ignore, Status::DownloadFailed] {
            let mut status = Status::None;
            assert!(status.transition(next));
            assert_eq!(status, next);
            assert!(!status.transition(Status::None));
        }
    }

    #[test]
    fn test_only_downloaded_moves_to_ignore() {
        let mut status = Status::Downloaded;
        assert!(!status.transition(Status::DownloadFailed));
        assert!(!status.transition(Status::Exists));
        assert!(status.transition(Status::Ignore));

        for settled in [Status::Exists, Status::DownloadFailed] {
            let mut status = settled;
            assert!(!status.transition(Status::Ignore));
            assert_eq!(status, settled);
        }

        let mut ignored = Status::Ignore;
        assert!(!ignored.transition(Status::Downloaded));
        assert_eq!(ignored, Status::Ignore);
    }

    #[test]
    fn test_has_data() {
        assert!(Status::Exists.has_data());
        assert!(Status::Downloaded.has_data());
        assert!(!Status::DownloadFailed.has_data());
        assert!(!Status::None.has_data());
    }
}
