//! HTTP side of jsonsvr.
//!
//! `routing` matches request paths against the loaded route table and keeps
//! the active table swappable at runtime. `dispatcher` runs a resolved rule
//! through its stages and produces a transport-neutral response. The axum
//! binding (feature `axum`, on by default) maps that response onto the wire
//! and adds the `/_stop` and `/_reload` system endpoints and access logging.

#[cfg(feature = "axum")]
pub mod adapters;
pub mod dispatcher;
pub mod routing;

#[cfg(feature = "axum")]
pub use adapters::axum::{AxumServiceAdapter, MAX_BODY_BYTES, ServiceReloader};
pub use dispatcher::{
    ExpandedRule, Stage, TerminalAction, content_type_for, dispatch, dispatch_rules,
};
pub use routing::{RouteMatch, RoutePattern, RouteSlot, ServiceRoutes};
