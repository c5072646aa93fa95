pub mod automations;
pub mod bridge;
pub mod messages;
pub mod trigger;
