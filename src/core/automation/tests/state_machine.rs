use super::fakes::{T0, job};
use crate::core::automation::{JobStatus, can_transition};

const TERMINAL: [JobStatus; 5] = [
    JobStatus::Completed,
    JobStatus::Error,
    JobStatus::Cancelled,
    JobStatus::TimedOut,
    JobStatus::Stopped,
];

#[test]
fn running_can_reach_every_terminal_state() {
    for to in TERMINAL {
        assert!(
            can_transition(JobStatus::Running, to),
            "expected transition running -> {:?} to be allowed",
            to
        );
    }
    assert!(!can_transition(JobStatus::Running, JobStatus::Running));
}

#[test]
fn terminal_states_are_final() {
    for from in TERMINAL {
        for to in TERMINAL.iter().copied().chain([JobStatus::Running]) {
            assert!(
                !can_transition(from, to),
                "expected transition {:?} -> {:?} to be rejected",
                from,
                to
            );
        }
    }
}

#[test]
fn finish_applies_only_once() {
    let mut job = job("a", Some("ABC-123"), T0);
    assert!(job.finish(JobStatus::Cancelled, T0 + 5, Some("Tab closed".into())));
    assert_eq!(job.ended_at, Some(T0 + 5));
    assert_eq!(job.error.as_deref(), Some("Tab closed"));

    assert!(!job.finish(JobStatus::Completed, T0 + 9, None));
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.ended_at, Some(T0 + 5));
    assert_eq!(job.logs.len(), 1);
}
