//! subscription-service: keeps local subscription records consistent with
//! the third-party subscription-billing provider.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod sync;

pub use startup::{AppState, Application};
