//! Client-side core of a browser-based SQL database GUI.
//!
//! Tracks open workspaces (tabs) and turns user edits into SQL statements
//! executed against a remote endpoint. Unsaved changes are keyed by stable
//! row identity and reconciled with server responses after each save. The
//! presentation layer sits on top and only talks to [`TabStore`],
//! [`SchemaCache`], and the [`SqlExecutor`] seam.

pub mod api;
pub mod config;
pub mod schema;
pub mod sql;
pub mod store;
pub mod tabs;

pub use api::{ApiResult, HttpGateway, MockExecutor, Row, SqlExecutor};
pub use config::Config;
pub use schema::{ColumnInfo, SchemaCache};
pub use sql::{
    build_where_clause, escape_identifier, escape_string_literal, to_sql_literal, FilterCondition,
    FilterLogic, FilterOperator,
};
pub use store::TabStore;
pub use tabs::{ColumnEdit, SqlEditorTab, Tab, TabConfig, TableStructureTab, TableViewTab};
