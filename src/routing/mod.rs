//! Filesystem routing
//!
//! - `pattern` - file path to method + URL pattern
//! - `table` - immutable route table, lookup and enumeration
//! - `directory` - persisted `wtf_routes` mirror

mod directory;
mod pattern;
mod table;

pub use directory::{RouteDirectory, SqliteRouteDirectory};
pub use pattern::{compile, CompiledRoute, Method, PathPattern, Segment, END_MARKER, SCRIPT_EXTENSION};
pub use table::{Route, RouteEntry, RouteMatch, RouteTable};
