use parking_lot::RwLock;
use tracing::{error, info, warn};
use types::{Notification, Severity};

/// Sink for user-facing run notes (relaxations, class additions, outcome).
pub trait NoteSink: Send + Sync {
    fn log_note(&self, severity: Severity, subject: &str, message: &str);
}

fn trace_note(severity: Severity, subject: &str, message: &str) {
    match severity {
        Severity::Error => error!(subject, "{message}"),
        Severity::Warning => warn!(subject, "{message}"),
        Severity::Info | Severity::Success => info!(subject, %severity, "{message}"),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotes;

impl NoteSink for TracingNotes {
    fn log_note(&self, severity: Severity, subject: &str, message: &str) {
        trace_note(severity, subject, message);
    }
}

/// Keeps notifications in memory for the API and mirrors them to tracing.
#[derive(Default)]
pub struct NoteBook {
    rows: RwLock<Vec<Notification>>,
}

impl NoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.rows.read().clone()
    }

    /// Returns unread rows and marks them read.
    pub fn take_unread(&self) -> Vec<Notification> {
        let mut rows = self.rows.write();
        let mut out = Vec::new();
        for n in rows.iter_mut().filter(|n| n.unread) {
            out.push(n.clone());
            n.unread = false;
        }
        out
    }
}

impl NoteSink for NoteBook {
    fn log_note(&self, severity: Severity, subject: &str, message: &str) {
        trace_note(severity, subject, message);
        self.rows.write().push(Notification {
            severity,
            subject: subject.to_string(),
            message: message.to_string(),
            unread: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_unread_marks_rows_read() {
        let book = NoteBook::new();
        book.log_note(Severity::Info, "Scheduler", "relaxed");
        book.log_note(Severity::Success, "Scheduler", "done");

        let first = book.take_unread();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|n| n.unread));
        assert!(book.take_unread().is_empty());

        book.log_note(Severity::Error, "Scheduler", "failed");
        let second = book.take_unread();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].severity, Severity::Error);
        assert_eq!(book.all().len(), 3);
    }
}
