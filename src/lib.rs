//! Status-resolution client for long-running translation jobs.
//!
//! [`StatusClient`] resolves a job's terminal status over a push channel
//! (server-sent events), falls back to polling with capped exponential backoff
//! when push fails, and bounds every wait with one absolute deadline.

pub mod cli;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod poller;
pub mod reconnect;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod status;
pub mod ui;

pub use client::StatusClient;
pub use config::{ClientConfig, WaitOptions};
pub use error::StatusError;
pub use registry::ResolverHandle;
pub use resolver::{Resolution, ResolutionPath, ResolverState};
pub use source::{HttpStatusSource, MockBackend, StatusSource};
pub use status::{JobId, Status, StatusEvent};
