//! Route reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! ManageRouteConfig + node identity + healthchecks
//!     → spec.rs (ManageRoutesSpec: SELF resolved, names bound)
//!     → managed.rs (ManagedRoute: tracked tables, listeners)
//!         → remote.rs (probe set follows current owners)
//!         → reconciler.rs (decide → create / replace / delete / noop)
//!             → RoutingApi
//!
//! Health transition (local or remote)
//!     → managed.rs reevaluate
//!     → fresh snapshot, tracked tables only
//!     → reconciler.rs
//! ```
//!
//! # Design Decisions
//! - Every decision is computed from a snapshot and is idempotent, so
//!   overlapping runs for the same table converge
//! - No retries here; the next poll cycle retries failed actions

pub mod managed;
pub mod reconciler;
pub mod remote;
pub mod spec;

pub use managed::ManagedRoute;
pub use reconciler::{decide, Action, Decision, LocalStatus, Observed, RemoteStatus, RouteReconciler};
pub use remote::{RemoteHealthOrchestrator, RemoteReport};
pub use spec::{ManageRoutesSpec, RouteHooks};
