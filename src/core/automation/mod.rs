pub mod browser;
pub mod coordinator;
pub mod driver;
pub mod gate;
pub mod host;
pub mod locate;
pub mod messages;
pub mod organization;
pub mod page;
pub mod poll;
pub mod reporting;
pub mod steps;
pub mod trigger;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorDeps};
pub use driver::{DriverDeps, PageDriver};
pub use host::{DriverHost, PageFactory};
pub use messages::CoordinatorSender;
pub use trigger::{TriggerDeps, TriggerRequest, TriggerUi};
pub use types::JobStatus;

/// Jobs start `running` and end in exactly one terminal state.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    match from {
        JobStatus::Running => matches!(
            to,
            JobStatus::Completed
                | JobStatus::Error
                | JobStatus::Cancelled
                | JobStatus::TimedOut
                | JobStatus::Stopped
        ),
        JobStatus::Completed
        | JobStatus::Error
        | JobStatus::Cancelled
        | JobStatus::TimedOut
        | JobStatus::Stopped => false,
    }
}

#[cfg(test)]
mod tests;
