//! Continuous tracking: a forward-only milestone cursor fed by polling.

use std::io;
use std::path::Path;
use std::time::Duration;

use super::completion::{CompletionState, CompletionTracker, FlagRules};
use super::tail::{read_last_line, read_lines_from};
use crate::errors::{Result, TflowError};

/// Something the cursor noticed while consuming new log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Line(String),
    Milestone { index: usize, name: String },
    Failed(String),
    Complete,
}

/// Progress through one log. The milestone index only moves forward and
/// never passes the milestone count; after a failure nothing moves.
#[derive(Debug, Clone)]
pub struct ProgressCursor {
    next_milestone: usize,
    lines_processed: usize,
    last_line: Option<String>,
    state: CompletionState,
}

impl Default for ProgressCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCursor {
    pub fn new() -> Self {
        Self {
            next_milestone: 0,
            lines_processed: 0,
            last_line: None,
            state: CompletionState::Running,
        }
    }

    /// Number of milestones consumed so far.
    pub fn milestones_seen(&self) -> usize {
        self.next_milestone
    }

    pub fn lines_processed(&self) -> usize {
        self.lines_processed
    }

    pub fn state(&self) -> CompletionState {
        self.state
    }

    pub fn is_finished(&self, rules: &FlagRules) -> bool {
        matches!(
            self.state,
            CompletionState::Failed | CompletionState::Complete
        ) || (!rules.milestones.is_empty() && self.next_milestone >= rules.milestones.len())
    }

    /// Consume lines appended since the last call.
    pub fn ingest(&mut self, lines: &[String], rules: &FlagRules) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        if self.is_finished(rules) {
            return events;
        }

        for line in lines {
            self.lines_processed += 1;
            events.push(TrackEvent::Line(line.clone()));

            if rules.is_failure(line) {
                self.state = CompletionState::Failed;
                events.push(TrackEvent::Failed(line.clone()));
                break;
            }

            // Only the next expected milestone can match, at most once per line.
            if let Some(expected) = rules.milestones.get(self.next_milestone)
                && line.contains(expected.as_str())
            {
                events.push(TrackEvent::Milestone {
                    index: self.next_milestone,
                    name: expected.clone(),
                });
                self.next_milestone += 1;
                tracing::debug!("milestone {} reached: {}", self.next_milestone, expected);
            }

            let all_seen =
                !rules.milestones.is_empty() && self.next_milestone == rules.milestones.len();
            if rules.is_terminal(line) || all_seen {
                self.state = CompletionState::Complete;
                events.push(TrackEvent::Complete);
                break;
            }
        }

        events
    }

    /// One tick. Re-reads from the cursor only when the final line changed.
    pub fn poll(&mut self, log: &Path, rules: &FlagRules) -> io::Result<Vec<TrackEvent>> {
        if !log.is_file() {
            return Ok(Vec::new());
        }
        let current = read_last_line(log)?;
        if current.is_none() || current == self.last_line {
            return Ok(Vec::new());
        }
        let lines = read_lines_from(log, self.lines_processed)?;
        self.last_line = current;
        Ok(self.ingest(&lines, rules))
    }
}

/// Poll `tracker`'s log every `interval` until it fails, completes, or
/// every milestone has been seen. `on_event` sees each event as it happens.
///
/// The final answer re-checks the tail window, so a failure line anywhere
/// in it still wins over a completed cursor.
pub async fn follow<F>(
    tracker: &CompletionTracker,
    interval: Duration,
    mut on_event: F,
) -> Result<CompletionState>
where
    F: FnMut(&TrackEvent),
{
    let rules = tracker.rules();
    let mut cursor = ProgressCursor::new();

    loop {
        let events = cursor
            .poll(tracker.log_file(), rules)
            .map_err(|e| TflowError::io(tracker.log_file(), e))?;
        for event in &events {
            on_event(event);
        }
        if cursor.is_finished(rules) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                return Err(TflowError::Interrupted {
                    action: format!("Tracking {}", tracker.segment()),
                });
            }
        }
    }

    if cursor.state() == CompletionState::Failed {
        return Ok(CompletionState::Failed);
    }
    match tracker.inspect()?.state {
        CompletionState::Failed => Ok(CompletionState::Failed),
        _ => Ok(CompletionState::Complete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentDescriptor;
    use std::io::Write;
    use tempfile::tempdir;

    fn rules() -> FlagRules {
        FlagRules::new(
            vec!["Started".into(), "Step1".into(), "Done".into()],
            vec![],
            vec!["Traceback".into()],
        )
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn milestones_match_in_declared_order_only() {
        let rules = rules();
        let mut cursor = ProgressCursor::new();
        cursor.ingest(&lines(&["Step1", "Started"]), &rules);
        // Step1 came before Started, so only Started counted
        assert_eq!(cursor.milestones_seen(), 1);
        cursor.ingest(&lines(&["Started again", "Step1"]), &rules);
        assert_eq!(cursor.milestones_seen(), 2);
        assert_eq!(cursor.state(), CompletionState::Running);
    }

    #[test]
    fn cursor_is_monotonic_and_bounded() {
        let rules = rules();
        let feed = [
            "Step1", "Started", "Started", "noise", "Done", "Step1", "Step1", "Done", "Done",
        ];
        let mut cursor = ProgressCursor::new();
        let mut previous = 0;
        for line in feed {
            cursor.ingest(&lines(&[line]), &rules);
            assert!(cursor.milestones_seen() >= previous);
            assert!(cursor.milestones_seen() <= rules.milestones.len());
            previous = cursor.milestones_seen();
        }
        assert_eq!(cursor.state(), CompletionState::Complete);
    }

    #[test]
    fn failure_freezes_the_cursor() {
        let rules = rules();
        let mut cursor = ProgressCursor::new();
        let events = cursor.ingest(&lines(&["Started", "Traceback", "Step1"]), &rules);
        assert!(events.contains(&TrackEvent::Failed("Traceback".into())));
        assert_eq!(cursor.state(), CompletionState::Failed);
        assert_eq!(cursor.milestones_seen(), 1);
        assert_eq!(cursor.lines_processed(), 2);

        assert!(cursor.ingest(&lines(&["Step1", "Done"]), &rules).is_empty());
        assert_eq!(cursor.milestones_seen(), 1);
    }

    #[test]
    fn terminal_flag_completes_without_all_milestones() {
        let rules = FlagRules::new(
            vec!["Started".into(), "Done".into()],
            vec!["Job Complete".into()],
            vec![],
        );
        let mut cursor = ProgressCursor::new();
        let events = cursor.ingest(&lines(&["Trinity Job Complete"]), &rules);
        assert_eq!(events.last(), Some(&TrackEvent::Complete));
        assert_eq!(cursor.milestones_seen(), 0);
    }

    #[test]
    fn poll_skips_when_last_line_unchanged() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("Foo.out");
        std::fs::write(&log, "Started\n").unwrap();
        let rules = rules();
        let mut cursor = ProgressCursor::new();

        assert_eq!(cursor.poll(&log, &rules).unwrap().len(), 2);
        assert!(cursor.poll(&log, &rules).unwrap().is_empty());

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "Step1").unwrap();
        let events = cursor.poll(&log, &rules).unwrap();
        assert_eq!(events[0], TrackEvent::Line("Step1".into()));
        assert_eq!(cursor.milestones_seen(), 2);
        assert_eq!(rules.milestone_percent(cursor.milestones_seen()), 66);
    }

    #[test]
    fn poll_on_missing_log_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut cursor = ProgressCursor::new();
        assert!(
            cursor
                .poll(&dir.path().join("absent.out"), &rules())
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn follow_returns_when_log_completes() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("Foo.out");
        std::fs::write(&log, "Started\nStep1\n").unwrap();
        let descriptor = SegmentDescriptor::new("Foo")
            .with_milestones(["Started", "Step1", "Done"])
            .with_failure_flags(["Traceback"]);
        let tracker = CompletionTracker::new(&descriptor, &log, 15);

        let writer_log = log.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_log)
                .unwrap();
            writeln!(file, "Done").unwrap();
        });

        let mut seen = Vec::new();
        let state = follow(&tracker, Duration::from_millis(10), |event| {
            if let TrackEvent::Milestone { name, .. } = event {
                seen.push(name.clone());
            }
        })
        .await
        .unwrap();
        writer.await.unwrap();

        assert_eq!(state, CompletionState::Complete);
        assert_eq!(seen, vec!["Started", "Step1", "Done"]);
    }

    #[tokio::test]
    async fn follow_reports_failure() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("Foo.out");
        std::fs::write(&log, "Started\nTraceback (most recent call last):\n").unwrap();
        let descriptor = SegmentDescriptor::new("Foo")
            .with_milestones(["Started", "Step1", "Done"])
            .with_failure_flags(["Traceback"]);
        let tracker = CompletionTracker::new(&descriptor, &log, 15);

        let state = follow(&tracker, Duration::from_millis(10), |_| {})
            .await
            .unwrap();
        assert_eq!(state, CompletionState::Failed);
    }
}
