//! Payment settlement and driver wallet ledger for the ride-booking backend.

pub mod api;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod money;
pub mod payments;
pub mod services;
pub mod workers;
