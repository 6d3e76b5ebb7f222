//! Database-coordinated distributed job scheduler.
//!
//! Two cooperating process roles — [`scheduler::Scheduler`] and
//! [`worker::Worker`] — coordinate solely through the shared Postgres
//! schema in `migrations/`. Neither talks to the other directly; see
//! `repository` for the coordination protocol's full read/write surface.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod repository;
pub mod schedule;
pub mod scheduler;
pub mod worker;
