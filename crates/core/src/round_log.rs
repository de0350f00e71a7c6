use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Actor, ApproverId, Document, LogEntry, LogKind};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut now) => *now += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut now) => *now = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Read-side view over a document's append-only action log.
///
/// Iteration order is timestamp ascending with ties broken by `seq`, which is
/// the insertion order assigned when the entry was appended.
#[derive(Clone, Copy, Debug)]
pub struct RoundLog<'a> {
    entries: &'a [LogEntry],
}

impl<'a> RoundLog<'a> {
    pub fn new(entries: &'a [LogEntry]) -> Self {
        Self { entries }
    }

    pub fn of(document: &'a Document) -> Self {
        Self::new(&document.log)
    }

    /// Full log, for history display.
    pub fn history(&self) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.ordered().into_iter()
    }

    /// Entries strictly after `round_start`, optionally limited to one actor.
    pub fn entries_since(
        &self,
        round_start: DateTime<Utc>,
        actor: Option<&'a ApproverId>,
    ) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.ordered().into_iter().filter(move |entry| {
            entry.timestamp > round_start
                && actor.map_or(true, |actor| entry.actor.approver() == Some(actor))
        })
    }

    /// Latest approve/reject entry by `approver` after `round_start`.
    pub fn latest_decision(
        &self,
        round_start: DateTime<Utc>,
        approver: &'a ApproverId,
    ) -> Option<&'a LogEntry> {
        self.entries_since(round_start, Some(approver))
            .filter(|entry| entry.kind.decision().is_some())
            .last()
    }

    /// Timestamp of the most recent submit/resubmit system entry.
    pub fn latest_round_opening(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|entry| entry.actor == Actor::System && entry.kind.opens_round())
            .map(|entry| entry.timestamp)
            .max()
    }

    /// One-based round number; zero for a log with no submission yet.
    pub fn round_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.actor == Actor::System && entry.kind.opens_round())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ordered(&self) -> Vec<&'a LogEntry> {
        let mut ordered: Vec<&LogEntry> = self.entries.iter().collect();
        ordered.sort_by(|left, right| {
            left.timestamp.cmp(&right.timestamp).then_with(|| left.seq.cmp(&right.seq))
        });
        ordered
    }
}

/// Builds the next entry for `document`, keeping timestamps strictly
/// increasing so an entry never lands on or before the current round boundary.
pub fn next_entry(
    document: Option<&Document>,
    now: DateTime<Utc>,
    actor: Actor,
    kind: LogKind,
    comment: impl Into<String>,
) -> LogEntry {
    let seq = document.map_or(1, Document::next_seq);
    let floor = document.and_then(Document::latest_timestamp);
    LogEntry { seq, actor, kind, comment: comment.into(), timestamp: monotonic_after(now, floor) }
}

pub fn monotonic_after(now: DateTime<Utc>, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match floor {
        Some(floor) if now <= floor => floor + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{monotonic_after, Clock, ManualClock, RoundLog};
    use crate::domain::{Actor, ApproverId, LogEntry, LogKind};

    fn entry(seq: u64, actor: Actor, kind: LogKind, offset_secs: i64) -> LogEntry {
        LogEntry {
            seq,
            actor,
            kind,
            comment: String::new(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    fn faculty() -> ApproverId {
        ApproverId::new("faculty@dts.com")
    }

    #[test]
    fn history_orders_by_timestamp_then_insertion() {
        let log = vec![
            entry(3, Actor::Approver(faculty()), LogKind::Commented, 10),
            entry(1, Actor::System, LogKind::Submitted, 0),
            entry(2, Actor::Approver(faculty()), LogKind::Approved, 10),
        ];

        let seqs: Vec<u64> = RoundLog::new(&log).history().map(|entry| entry.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn entries_at_round_start_belong_to_previous_round() {
        let log = vec![
            entry(1, Actor::System, LogKind::Submitted, 0),
            entry(2, Actor::Approver(faculty()), LogKind::Rejected, 5),
            entry(3, Actor::System, LogKind::Resubmitted, 20),
            entry(4, Actor::Approver(faculty()), LogKind::Commented, 20),
            entry(5, Actor::Approver(faculty()), LogKind::Commented, 21),
        ];
        let round_start = log[2].timestamp;
        let view = RoundLog::new(&log);

        let current: Vec<u64> =
            view.entries_since(round_start, None).map(|entry| entry.seq).collect();
        assert_eq!(current, vec![5]);

        let faculty = faculty();
        assert!(view.latest_decision(round_start, &faculty).is_none());
        assert_eq!(view.round_count(), 2);
        assert_eq!(view.latest_round_opening(), Some(round_start));
    }

    #[test]
    fn latest_decision_ignores_comments_and_other_actors() {
        let hod = ApproverId::new("dtshod@dts.com");
        let log = vec![
            entry(1, Actor::System, LogKind::Submitted, 0),
            entry(2, Actor::Approver(faculty()), LogKind::Approved, 5),
            entry(3, Actor::Approver(faculty()), LogKind::Commented, 6),
            entry(4, Actor::Approver(hod.clone()), LogKind::Rejected, 7),
        ];
        let view = RoundLog::new(&log);
        let faculty = faculty();

        let decision = view.latest_decision(log[0].timestamp, &faculty).expect("decision");
        assert_eq!(decision.kind, LogKind::Approved);
        assert_eq!(view.latest_decision(log[0].timestamp, &hod).map(|e| e.seq), Some(4));
    }

    #[test]
    fn stamps_stay_strictly_increasing_within_one_tick() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(monotonic_after(now, None), now);
        assert_eq!(monotonic_after(now, Some(now)), now + Duration::microseconds(1));
        let later = now + Duration::seconds(1);
        assert_eq!(monotonic_after(later, Some(now)), later);
    }

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }
}
