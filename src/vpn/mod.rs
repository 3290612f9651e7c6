//! Tunnel route planning, installation and teardown

pub mod plan;
pub mod report;
pub mod resolver;
pub mod router;
pub mod state;

pub use plan::{RouteSet, Topology};
pub use report::RouteReport;
pub use router::{RouterError, TunnelRouter};
pub use state::SessionRecord;
