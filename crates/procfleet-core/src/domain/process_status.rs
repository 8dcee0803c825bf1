//! Exit status of a supervised process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// How a process ended (or paused), as reported by its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "lowercase")]
pub enum ProcessStatus {
    /// The process exited with the given code.
    Exited(i32),
    /// The process was terminated by the given signal.
    Signaled(i32),
    /// The process was stopped (paused) by the given signal.
    Stopped(i32),
}

impl ProcessStatus {
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    #[must_use]
    pub const fn is_exited(self) -> bool {
        matches!(self, Self::Exited(_))
    }

    /// Exit code, if the process exited normally.
    #[must_use]
    pub const fn exit_status(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_signaled(self) -> bool {
        matches!(self, Self::Signaled(_))
    }

    /// Terminating signal, if the process was killed by one.
    #[must_use]
    pub const fn term_sig(self) -> Option<i32> {
        match self {
            Self::Signaled(sig) => Some(sig),
            _ => None,
        }
    }

    /// True only for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Self::Signaled(sig);
            }
            if let Some(sig) = status.stopped_signal() {
                return Self::Stopped(sig);
            }
        }
        Self::Exited(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(sig) => write!(f, "terminated by signal {sig}"),
            Self::Stopped(sig) => write!(f, "stopped by signal {sig}"),
        }
    }
}

/// Exit statuses reported by a process server but not yet claimed by the
/// supervisor of that process.
///
/// A backend reports every process that ended since the previous call, so
/// one supervisor's wait can observe the exit of another. Statuses land
/// here and each supervisor claims its own.
#[derive(Debug, Default)]
pub struct ExitStatusBook {
    unclaimed: Mutex<HashMap<String, ProcessStatus>>,
}

impl ExitStatusBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every status in `statuses`. A later report for the same
    /// process replaces the earlier one.
    pub fn record(&self, statuses: HashMap<String, ProcessStatus>) {
        if statuses.is_empty() {
            return;
        }
        self.unclaimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(statuses);
    }

    /// Remove and return the status of `process`.
    pub fn claim(&self, process: &str) -> Option<ProcessStatus> {
        self.unclaimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process)
    }

    pub fn len(&self) -> usize {
        self.unclaimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_queries() {
        let ok = ProcessStatus::Exited(0);
        assert!(ok.is_exited() && ok.success());
        assert_eq!(ok.exit_status(), Some(0));
        assert_eq!(ok.term_sig(), None);

        let failed = ProcessStatus::Exited(3);
        assert!(!failed.success());

        let killed = ProcessStatus::Signaled(9);
        assert!(killed.is_signaled() && !killed.success());
        assert_eq!(killed.term_sig(), Some(9));
        assert_eq!(killed.exit_status(), None);

        assert!(ProcessStatus::Stopped(19).is_stopped());
    }

    #[cfg(unix)]
    #[test]
    fn converts_from_std_exit_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(ProcessStatus::from(std::process::ExitStatus::from_raw(0)), ProcessStatus::Exited(0));
        assert_eq!(ProcessStatus::from(std::process::ExitStatus::from_raw(9)), ProcessStatus::Signaled(9));
    }

    #[test]
    fn book_hands_each_status_out_once() {
        let book = ExitStatusBook::new();
        book.record(HashMap::from([
            ("a".to_owned(), ProcessStatus::Exited(3)),
            ("b".to_owned(), ProcessStatus::Signaled(15)),
        ]));
        assert_eq!(book.len(), 2);

        assert_eq!(book.claim("b"), Some(ProcessStatus::Signaled(15)));
        assert_eq!(book.claim("b"), None);
        assert_eq!(book.claim("missing"), None);

        book.record(HashMap::from([("a".to_owned(), ProcessStatus::Exited(0))]));
        assert_eq!(book.claim("a"), Some(ProcessStatus::Exited(0)));
        assert!(book.is_empty());
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_string(&ProcessStatus::Signaled(15)).unwrap();
        assert_eq!(json, r#"{"status":"signaled","code":15}"#);
    }
}
