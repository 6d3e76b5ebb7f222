//! Database access for the five coordination-protocol entities.
//!
//! Every function takes `impl sqlx::PgExecutor<'_>` so callers can pass
//! either a pooled connection or an open transaction — the dispatch cycle
//! needs several of these calls to share one transaction (§5's locking
//! discipline), while claim/heartbeat/report are single-statement and run
//! straight against the pool.

pub mod dispatches;
pub mod jobs;
pub mod logs;
pub mod queries;
pub mod workers;
