//! # Taskboard
//!
//! A task-management backend: REST API over an embedded document store,
//! with ownership-aware access control.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum)          api::{auth, tasks, users}
//!        │
//!        ▼
//!   TaskService          validates referenced identities, applies the
//!        │               access policy, expands owner references
//!        ├── tasks::policy   pure allow/deny decisions
//!        ├── tasks::query    raw params -> validated query plan
//!        ▼
//!   TaskStore / UserStore   SQLite-backed collections
//! ```
//!
//! ## Request Flow
//! 1. Bearer token verified by the auth middleware
//! 2. Handler parses and validates the request shape
//! 3. Service runs the policy check / query plan against the stores
//! 4. Result is projected into the response envelope
//!
//! ## Modules
//! - `api`: HTTP transport (routes, auth, handlers, response envelope)
//! - `tasks`: task domain (policy, query composition, store, service)
//! - `identity`: user records and lookup

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod tasks;

pub use config::Config;
pub use error::ApiError;
