use log::{debug, info};

/// A user-annotated interval within a recording, in whole seconds relative to
/// session start. Immutable once completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationMark {
    pub start: u64,
    pub end: u64,
    pub note: Option<String>,
}

/// Outcome of a mark toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkToggle {
    Started,
    Completed,
    /// Zero or negative length, nothing stored.
    Discarded,
}

#[derive(Debug, Clone)]
struct PendingMark {
    start: u64,
    note: Option<String>,
}

/// Append-only mark storage for one session. Marks land in author order,
/// which keeps the sequence monotonically non-decreasing by construction.
#[derive(Debug, Default)]
pub(crate) struct MarkLedger {
    pending: Option<PendingMark>,
    completed: Vec<DurationMark>,
}

impl MarkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a mark if none is pending, otherwise complete the pending one at
    /// `elapsed_secs`. A completed mark with `end <= start` is silently
    /// discarded rather than stored.
    pub fn toggle(&mut self, elapsed_secs: u64, note: Option<String>) -> MarkToggle {
        match self.pending.take() {
            None => {
                debug!("Mark opened at {}s", elapsed_secs);
                self.pending = Some(PendingMark {
                    start: elapsed_secs,
                    note,
                });
                MarkToggle::Started
            }
            Some(pending) => {
                if elapsed_secs <= pending.start {
                    info!(
                        "Discarding zero-length mark at {}s (opened at {}s)",
                        elapsed_secs, pending.start
                    );
                    return MarkToggle::Discarded;
                }
                self.completed.push(DurationMark {
                    start: pending.start,
                    end: elapsed_secs,
                    note: note.or(pending.note),
                });
                MarkToggle::Completed
            }
        }
    }

    /// Close a still-pending mark at stop time, with the same discard rule as
    /// manual toggling.
    pub fn finish_pending(&mut self, elapsed_secs: u64) {
        if self.has_pending() {
            self.toggle(elapsed_secs, None);
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn completed(&self) -> &[DurationMark] {
        &self.completed
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.completed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_opens_then_completes() {
        let mut ledger = MarkLedger::new();
        assert_eq!(ledger.toggle(3, None), MarkToggle::Started);
        assert!(ledger.has_pending());
        assert_eq!(ledger.toggle(8, Some("demo".to_string())), MarkToggle::Completed);

        assert_eq!(
            ledger.completed(),
            &[DurationMark {
                start: 3,
                end: 8,
                note: Some("demo".to_string()),
            }]
        );
    }

    #[test]
    fn zero_length_marks_are_discarded() {
        let mut ledger = MarkLedger::new();
        ledger.toggle(5, None);
        // Same second: end == start.
        assert_eq!(ledger.toggle(5, None), MarkToggle::Discarded);
        assert!(ledger.completed().is_empty());
        assert!(!ledger.has_pending());
    }

    #[test]
    fn finish_pending_applies_the_discard_rule() {
        let mut ledger = MarkLedger::new();
        ledger.toggle(2, Some("kept".to_string()));
        ledger.finish_pending(6);
        assert_eq!(ledger.completed().len(), 1);
        assert_eq!(ledger.completed()[0].end, 6);

        ledger.toggle(7, None);
        ledger.finish_pending(7);
        assert_eq!(ledger.completed().len(), 1);
    }

    #[test]
    fn marks_stay_in_author_order() {
        let mut ledger = MarkLedger::new();
        ledger.toggle(1, None);
        ledger.toggle(4, None);
        ledger.toggle(4, None);
        ledger.toggle(9, None);

        let starts: Vec<u64> = ledger.completed().iter().map(|m| m.start).collect();
        assert_eq!(starts, vec![1, 4]);
        let ends: Vec<u64> = ledger.completed().iter().map(|m| m.end).collect();
        assert!(ends.windows(2).all(|w| w[0] <= w[1]));
    }
}
