//! Routing engines
//!
//! A routing engine owns the physical ports described by a [`BridgeConfig`]
//! and forwards messages according to a [`Patch`]. The engine runs on a
//! background thread managed by [`lifecycle`].

pub mod activity;
pub mod lifecycle;
pub mod loopback;
pub mod virtual_ports;

pub use activity::{RouteActivity, RouteStats};
pub use lifecycle::RunningEngine;
pub use loopback::{LoopbackDevices, LoopbackEngine};
pub use virtual_ports::VirtualPortEngine;

use crate::error::Result;
use crate::patch::{BridgeConfig, Patch};

/// Routing engine trait - implemented by every backend that can carry a patch
///
/// All methods take `&self`; engines are shared between the caller's thread
/// (configure, quit) and the routing thread (run) through an `Arc`.
pub trait RoutingEngine: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Declare the client name and ports. Called on the caller's thread before
    /// the routing thread starts; failures here are reported synchronously.
    fn configure(&self, config: &BridgeConfig) -> Result<()>;

    /// Create the ports and forward messages until [`quit`](Self::quit).
    /// Blocks the calling thread.
    fn run(&self, patch: Patch) -> Result<()>;

    /// Whether the engine is currently routing
    fn is_active(&self) -> bool;

    /// Request termination. Must be safe to call before `run` has started,
    /// and must not wait for in-flight messages.
    fn quit(&self);

    /// Per-rule forwarding counters, if the engine tracks them
    fn activity(&self) -> Option<&RouteActivity> {
        None
    }
}
