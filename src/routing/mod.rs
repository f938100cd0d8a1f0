//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route table snapshot (table.rs)
//!     → find.rs (config finder tree → filter)
//!     → filter.rs (keep / drop each table)
//!     → matched tables handed to the reconciler
//!
//! Finder compilation (at startup):
//!     RouteTableFind tree
//!     → build_filter (all errors collected)
//!     → immutable Box<dyn RouteFilter>
//! ```
//!
//! # Design Decisions
//! - Filters compiled at startup, immutable at runtime
//! - Deterministic: same snapshot always yields the same matches
//! - Route lookup is exact CIDR string equality

pub mod cidr;
pub mod filter;
pub mod find;
pub mod table;

pub use filter::{filter_route_tables, route_table_for_subnet, RouteFilter};
pub use find::FindError;
pub use table::{Association, Route, RouteOrigin, RouteState, RouteTable, RouteTarget, Tag};
