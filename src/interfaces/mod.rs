pub mod bridge;
pub mod services;
pub mod web;
