pub mod api;
pub mod automation;
pub mod clock;
pub mod config;
pub mod lifecycle;
pub mod store;
pub mod terminal;
pub mod vault;
