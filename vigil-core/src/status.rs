//! Task run-status state machine.
//!
//! The run status is the single source of truth for what a scan is doing.
//! Every component mutates it only through [`RunStatus::apply`], a total
//! function over `(status, event)`: pairs outside the legal transition set
//! come back as [`Transition::Ignored`] and must be logged by the caller,
//! never silently treated as a different transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical run-status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    New,
    Requested,
    Running,
    PauseRequested,
    PauseWaiting,
    Paused,
    ResumeRequested,
    ResumeWaiting,
    StopRequested,
    /// Escape hatch for a task stuck behind an unreachable slave: resolves
    /// unconditionally to `Stopped`, abandoning in-flight remote state.
    StopRequestedGiveup,
    StopWaiting,
    Stopped,
    DeleteRequested,
    DeleteWaiting,
    DeleteUltimateRequested,
    DeleteUltimateWaiting,
    Done,
    InternalError,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// User start command.
    Start,
    /// User stop command. `slave_bound` selects the giveup escalation when
    /// the task is already waiting on a slave acknowledgement.
    Stop { slave_bound: bool },
    /// User pause command.
    Pause,
    /// User resume command.
    Resume,
    /// User delete command; the delete itself is deferred until the task
    /// has stopped.
    Delete { ultimate: bool },
    /// Decoder or slave observed the scan actually starting.
    ScanStarted,
    /// Scan ended successfully.
    ScanDone,
    /// Scan ended because it was stopped.
    ScanStopped,
    /// Scanner acknowledged a pause.
    PauseAcknowledged,
    /// Scanner acknowledged a resume.
    ResumeAcknowledged,
    /// A stop command went out to the scanner or slave.
    StopDispatched,
    /// A pause command went out.
    PauseDispatched,
    /// A resume command went out.
    ResumeDispatched,
    /// A delete-preceding stop went out.
    DeleteDispatched,
    /// The slave controller honored a pending giveup.
    GiveupHonored,
    /// Poison: malformed protocol, missing resource, or unexpected state.
    Fault,
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(RunStatus),
    /// The (status, event) pair is outside the legal set; the status is
    /// unchanged and the caller must log the attempt.
    Ignored,
}

impl RunStatus {
    /// The total transition function. Unmatched pairs are no-ops.
    pub fn apply(self, event: StatusEvent) -> Transition {
        use RunStatus::*;
        use StatusEvent::*;

        let next = match (self, event) {
            (New | Stopped | Done, Start) => Requested,

            (
                Requested | Running | PauseRequested | PauseWaiting | Paused | ResumeRequested
                | ResumeWaiting,
                Stop { .. },
            ) => StopRequested,
            // Repeated stop on a slave-bound task already in limbo: force the
            // giveup state so an unreachable slave cannot wedge the task.
            (StopRequested | StopWaiting, Stop { slave_bound: true }) => StopRequestedGiveup,

            (Requested | Running, Pause) => PauseRequested,
            (PauseRequested | Paused, Resume) => ResumeRequested,

            (
                Requested | Running | PauseRequested | PauseWaiting | Paused | ResumeRequested
                | ResumeWaiting | StopRequested | StopWaiting,
                Delete { ultimate: false },
            ) => DeleteRequested,
            (
                Requested | Running | PauseRequested | PauseWaiting | Paused | ResumeRequested
                | ResumeWaiting | StopRequested | StopWaiting,
                Delete { ultimate: true },
            ) => DeleteUltimateRequested,

            (Requested, ScanStarted) => Running,

            (Requested | Running | StopRequested | StopWaiting, ScanDone) => Done,
            (Running | StopRequested | StopWaiting, ScanStopped) => Stopped,

            (Running | PauseRequested | PauseWaiting, PauseAcknowledged) => Paused,
            (Paused | ResumeRequested | ResumeWaiting, ResumeAcknowledged) => Running,

            (StopRequested, StopDispatched) => StopWaiting,
            (PauseRequested, PauseDispatched) => PauseWaiting,
            (ResumeRequested, ResumeDispatched) => ResumeWaiting,
            (DeleteRequested, DeleteDispatched) => DeleteWaiting,
            (DeleteUltimateRequested, DeleteDispatched) => DeleteUltimateWaiting,

            (StopRequestedGiveup, GiveupHonored) => Stopped,

            (
                Requested | Running | PauseRequested | PauseWaiting | Paused | ResumeRequested
                | ResumeWaiting | StopRequested | StopRequestedGiveup | StopWaiting
                | DeleteRequested | DeleteWaiting | DeleteUltimateRequested
                | DeleteUltimateWaiting,
                Fault,
            ) => InternalError,

            _ => return Transition::Ignored,
        };

        Transition::To(next)
    }

    /// True for statuses a scan is actively progressing or winding down in.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            RunStatus::New | RunStatus::Stopped | RunStatus::Done | RunStatus::InternalError
        )
    }

    /// True for statuses no further event can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::InternalError)
    }

    /// True while the task waits for an acknowledgement from the scanner or
    /// the slave.
    pub fn is_in_limbo(self) -> bool {
        matches!(
            self,
            RunStatus::PauseRequested
                | RunStatus::PauseWaiting
                | RunStatus::ResumeRequested
                | RunStatus::ResumeWaiting
                | RunStatus::StopRequested
                | RunStatus::StopWaiting
                | RunStatus::DeleteRequested
                | RunStatus::DeleteWaiting
                | RunStatus::DeleteUltimateRequested
                | RunStatus::DeleteUltimateWaiting
        )
    }

    /// True when a delete has been requested and is waiting for the task to
    /// stop.
    pub fn delete_pending(self) -> Option<bool> {
        match self {
            RunStatus::DeleteRequested | RunStatus::DeleteWaiting => Some(false),
            RunStatus::DeleteUltimateRequested | RunStatus::DeleteUltimateWaiting => Some(true),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::New => "New",
            RunStatus::Requested => "Requested",
            RunStatus::Running => "Running",
            RunStatus::PauseRequested => "Pause Requested",
            RunStatus::PauseWaiting => "Pause Waiting",
            RunStatus::Paused => "Paused",
            RunStatus::ResumeRequested => "Resume Requested",
            RunStatus::ResumeWaiting => "Resume Waiting",
            // The giveup state reads as a plain stop request to clients.
            RunStatus::StopRequested | RunStatus::StopRequestedGiveup => "Stop Requested",
            RunStatus::StopWaiting => "Stop Waiting",
            RunStatus::Stopped => "Stopped",
            RunStatus::DeleteRequested => "Delete Requested",
            RunStatus::DeleteWaiting => "Delete Waiting",
            RunStatus::DeleteUltimateRequested => "Ultimate Delete Requested",
            RunStatus::DeleteUltimateWaiting => "Ultimate Delete Waiting",
            RunStatus::Done => "Done",
            RunStatus::InternalError => "Internal Error",
        };
        write!(f, "{name}")
    }
}

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(RunStatus::New),
            "Requested" => Ok(RunStatus::Requested),
            "Running" => Ok(RunStatus::Running),
            "Pause Requested" => Ok(RunStatus::PauseRequested),
            "Pause Waiting" => Ok(RunStatus::PauseWaiting),
            "Paused" => Ok(RunStatus::Paused),
            "Resume Requested" => Ok(RunStatus::ResumeRequested),
            "Resume Waiting" => Ok(RunStatus::ResumeWaiting),
            "Stop Requested" => Ok(RunStatus::StopRequested),
            "Stop Waiting" => Ok(RunStatus::StopWaiting),
            "Stopped" => Ok(RunStatus::Stopped),
            "Delete Requested" => Ok(RunStatus::DeleteRequested),
            "Delete Waiting" => Ok(RunStatus::DeleteWaiting),
            "Ultimate Delete Requested" => Ok(RunStatus::DeleteUltimateRequested),
            "Ultimate Delete Waiting" => Ok(RunStatus::DeleteUltimateWaiting),
            "Done" => Ok(RunStatus::Done),
            "Internal Error" => Ok(RunStatus::InternalError),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A remote manager reported a status string outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status: {0}")]
pub struct UnknownStatus(pub String);

pub const ALL_STATUSES: [RunStatus; 18] = [
    RunStatus::New,
    RunStatus::Requested,
    RunStatus::Running,
    RunStatus::PauseRequested,
    RunStatus::PauseWaiting,
    RunStatus::Paused,
    RunStatus::ResumeRequested,
    RunStatus::ResumeWaiting,
    RunStatus::StopRequested,
    RunStatus::StopRequestedGiveup,
    RunStatus::StopWaiting,
    RunStatus::Stopped,
    RunStatus::DeleteRequested,
    RunStatus::DeleteWaiting,
    RunStatus::DeleteUltimateRequested,
    RunStatus::DeleteUltimateWaiting,
    RunStatus::Done,
    RunStatus::InternalError,
];

#[cfg(test)]
mod tests {
    use super::RunStatus::*;
    use super::StatusEvent::*;
    use super::*;

    fn assert_to(current: RunStatus, event: StatusEvent, expected: RunStatus) {
        assert_eq!(
            current.apply(event),
            Transition::To(expected),
            "{current:?} x {event:?}"
        );
    }

    fn assert_ignored(current: RunStatus, event: StatusEvent) {
        assert_eq!(
            current.apply(event),
            Transition::Ignored,
            "{current:?} x {event:?}"
        );
    }

    #[test]
    fn start_is_legal_only_from_rest_states() {
        for current in ALL_STATUSES {
            match current {
                New | Stopped | Done => assert_to(current, Start, Requested),
                _ => assert_ignored(current, Start),
            }
        }
    }

    #[test]
    fn stop_reaches_every_interruptible_state() {
        for current in [
            Requested,
            Running,
            PauseRequested,
            PauseWaiting,
            Paused,
            ResumeRequested,
            ResumeWaiting,
        ] {
            assert_to(current, Stop { slave_bound: false }, StopRequested);
            assert_to(current, Stop { slave_bound: true }, StopRequested);
        }
        for current in [New, Stopped, Done, InternalError, StopRequestedGiveup] {
            assert_ignored(current, Stop { slave_bound: false });
        }
    }

    #[test]
    fn repeated_stop_escalates_only_for_slave_tasks() {
        assert_to(
            StopRequested,
            Stop { slave_bound: true },
            StopRequestedGiveup,
        );
        assert_to(StopWaiting, Stop { slave_bound: true }, StopRequestedGiveup);
        assert_ignored(StopRequested, Stop { slave_bound: false });
        assert_ignored(StopWaiting, Stop { slave_bound: false });
    }

    #[test]
    fn giveup_always_resolves_to_stopped() {
        assert_to(StopRequestedGiveup, GiveupHonored, Stopped);
        for current in ALL_STATUSES {
            if current != StopRequestedGiveup {
                assert_ignored(current, GiveupHonored);
            }
        }
    }

    #[test]
    fn pause_and_resume_windows() {
        assert_to(Requested, Pause, PauseRequested);
        assert_to(Running, Pause, PauseRequested);
        assert_ignored(Paused, Pause);
        assert_ignored(Stopped, Pause);

        assert_to(PauseRequested, Resume, ResumeRequested);
        assert_to(Paused, Resume, ResumeRequested);
        assert_ignored(Running, Resume);
        assert_ignored(Done, Resume);
    }

    #[test]
    fn scan_lifecycle_transitions() {
        assert_to(Requested, ScanStarted, Running);
        assert_ignored(Running, ScanStarted);

        assert_to(Running, ScanDone, Done);
        assert_to(StopWaiting, ScanDone, Done);
        assert_to(Running, ScanStopped, Stopped);
        assert_to(StopRequested, ScanStopped, Stopped);
        assert_to(StopWaiting, ScanStopped, Stopped);
        assert_ignored(Paused, ScanStopped);
    }

    #[test]
    fn acknowledgement_toggles() {
        assert_to(Running, PauseAcknowledged, Paused);
        assert_to(PauseRequested, PauseAcknowledged, Paused);
        assert_to(PauseWaiting, PauseAcknowledged, Paused);
        assert_to(Paused, ResumeAcknowledged, Running);
        assert_to(ResumeRequested, ResumeAcknowledged, Running);
        assert_to(ResumeWaiting, ResumeAcknowledged, Running);
        assert_ignored(Stopped, PauseAcknowledged);
    }

    #[test]
    fn dispatch_moves_requested_to_waiting() {
        assert_to(StopRequested, StopDispatched, StopWaiting);
        assert_to(PauseRequested, PauseDispatched, PauseWaiting);
        assert_to(ResumeRequested, ResumeDispatched, ResumeWaiting);
        assert_to(DeleteRequested, DeleteDispatched, DeleteWaiting);
        assert_to(DeleteUltimateRequested, DeleteDispatched, DeleteUltimateWaiting);
        assert_ignored(Running, StopDispatched);
    }

    #[test]
    fn delete_is_deferred_from_active_states() {
        assert_to(Running, Delete { ultimate: false }, DeleteRequested);
        assert_to(
            StopWaiting,
            Delete { ultimate: true },
            DeleteUltimateRequested,
        );
        // Rest-state deletes are carried out directly by the caller, not via
        // a transition.
        assert_ignored(Stopped, Delete { ultimate: false });
        assert_ignored(Done, Delete { ultimate: true });
        assert_ignored(New, Delete { ultimate: false });
    }

    #[test]
    fn fault_poisons_only_live_states() {
        for current in ALL_STATUSES {
            match current {
                New | Stopped | Done | InternalError => assert_ignored(current, Fault),
                _ => assert_to(current, Fault, InternalError),
            }
        }
    }

    #[test]
    fn invalid_pairs_leave_status_unchanged() {
        // A sample of nonsensical pairs; Ignored means the caller keeps the
        // current status.
        assert_ignored(Done, ScanDone);
        assert_ignored(InternalError, Start);
        assert_ignored(New, ScanStarted);
        assert_ignored(Stopped, ScanStopped);
    }

    #[test]
    fn remote_vocabulary_round_trips() {
        for status in ALL_STATUSES {
            if status == StopRequestedGiveup {
                // Renders as "Stop Requested" on purpose.
                assert_eq!(status.to_string().parse::<RunStatus>(), Ok(StopRequested));
                continue;
            }
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
        assert!("Exploded".parse::<RunStatus>().is_err());
    }
}
