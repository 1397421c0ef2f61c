//! Uplink failover engine.
//!
//! The control-plane core: a bounded telemetry store, per-class metric
//! collectors, member discovery, the scoring-and-decision engine, and the
//! switching controller that mediates between a route-policy backend and
//! the network stack.
//!
//! All process-wide state lives in the [`store::TelemetryStore`] and the
//! [`controller::Controller`], each constructed explicitly at startup and
//! passed by handle to every consumer.

pub mod collect;
pub mod controller;
pub mod decision;
pub mod discovery;
pub mod route;
pub mod score;
pub mod sink;
pub mod stats;
pub mod store;
