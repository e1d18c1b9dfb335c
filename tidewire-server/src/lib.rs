//! # Tidewire Server
//!
//! Relay between web clients and a compute tier that runs backtests,
//! parameter optimizations and walk-forward analyses.
//!
//! ## Overview
//!
//! - **Task publishing**: submissions are validated, stamped and published on
//!   the workflow's task channel with bounded retry
//! - **Event routing**: one subscription over every outcome channel feeds an
//!   in-process listener bus
//! - **Fan-out gateway**: outcomes are pushed to every live WebSocket of the
//!   user that owns them
//! - **Upstream feed**: an optional reconnecting client pulls tasks from
//!   another service and relays them like HTTP submissions
//!
//! The pub/sub backend is Redis; an in-process broker is available for local
//! runs and tests.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
