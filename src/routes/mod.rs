//! Route table, route parsers, CRUD route synthesis and common routes.

mod common;
mod crud;
mod table;

pub use common::common_routes;
pub use crud::crud_routes;
pub use table::{RouteEntry, RouteParser, RouteTable, VersionedRouteParser};
