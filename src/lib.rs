// Library entry point for spaces-vm
// Exposes modules for testing

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod membership;
pub mod models;
pub mod reminders;
pub mod store;
