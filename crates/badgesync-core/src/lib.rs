//! badgesync-core — scheduled synchronization of badge-access events from a
//! session-based access-control portal into one or more downstream stores.
//!
//! Pipeline: login → drive the portal's step protocol → parse the rendered
//! event table → idempotently upsert into the destination store(s). The
//! [`scheduler::Scheduler`] runs the pipeline on a timer and exposes the
//! manual-trigger/status/interval operations the admin API consumes.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod portal;
pub mod scheduler;
pub mod session;
pub mod writer;

pub use config::{Config, ConflictMode, Credentials, StoreConfig};
pub use error::{Result, SyncError};
pub use orchestrator::{run_sync, SyncContext, SyncResult};
pub use parser::Event;
pub use scheduler::{ScheduleStatus, Scheduler};
pub use writer::WriteResult;
