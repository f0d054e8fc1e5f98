use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::{ApiResult, Row};
use crate::schema::ColumnInfo;
use crate::sql::FilterCondition;

/// Free-form SQL query workspace.
#[derive(Debug, Clone)]
pub struct SqlEditorTab {
    pub key: String,
    pub title: String,
    pub sql: String,
    pub is_loading: bool,
    /// One result per executed statement, in submission order.
    pub results: Vec<ApiResult>,
}

/// Row browser/editor bound to one table.
#[derive(Debug, Clone)]
pub struct TableViewTab {
    pub key: String,
    pub title: String,
    pub table_name: String,
    pub schema_name: Option<String>,
    pub is_loading: bool,
    pub data: Vec<Row>,
    pub columns: Vec<ColumnInfo>,
    /// Declared primary-key column, or `None` when the table has none and
    /// the rowid stands in for it.
    pub primary_key: Option<String>,
    pub error: Option<String>,
    /// Pending uncommitted edits, keyed by rowid. Edits to the same row
    /// merge into one entry.
    pub dirty_changes: BTreeMap<i64, BTreeMap<String, Value>>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub filter_conditions: Vec<FilterCondition>,
}

/// Pending edit to one column definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnEdit {
    pub column_name: Option<String>,
    pub data_type: Option<String>,
}

/// Structure (DDL) editor bound to one table.
#[derive(Debug, Clone)]
pub struct TableStructureTab {
    pub key: String,
    pub title: String,
    pub table_name: String,
    pub schema_name: Option<String>,
    pub is_loading: bool,
    pub columns: Vec<ColumnInfo>,
    pub error: Option<String>,
    /// Pending structural edits, keyed by the current column name.
    pub dirty_structure_changes: BTreeMap<String, ColumnEdit>,
}

/// One open workspace.
#[derive(Debug, Clone)]
pub enum Tab {
    SqlEditor(SqlEditorTab),
    TableView(TableViewTab),
    TableStructure(TableStructureTab),
}

impl Tab {
    pub fn key(&self) -> &str {
        match self {
            Tab::SqlEditor(tab) => &tab.key,
            Tab::TableView(tab) => &tab.key,
            Tab::TableStructure(tab) => &tab.key,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Tab::SqlEditor(tab) => &tab.title,
            Tab::TableView(tab) => &tab.title,
            Tab::TableStructure(tab) => &tab.title,
        }
    }

    pub fn as_table_view(&self) -> Option<&TableViewTab> {
        match self {
            Tab::TableView(tab) => Some(tab),
            _ => None,
        }
    }

    pub fn as_sql_editor(&self) -> Option<&SqlEditorTab> {
        match self {
            Tab::SqlEditor(tab) => Some(tab),
            _ => None,
        }
    }

    pub fn as_table_structure(&self) -> Option<&TableStructureTab> {
        match self {
            Tab::TableStructure(tab) => Some(tab),
            _ => None,
        }
    }
}

/// Requested tab contents; the store assigns the key.
#[derive(Debug, Clone)]
pub enum TabConfig {
    SqlEditor {
        title: String,
        sql: String,
    },
    TableView {
        title: String,
        table_name: String,
        schema_name: Option<String>,
        page_size: usize,
    },
    TableStructure {
        title: String,
        table_name: String,
        schema_name: Option<String>,
    },
}

impl TabConfig {
    pub fn sql_editor(title: impl Into<String>) -> Self {
        TabConfig::SqlEditor {
            title: title.into(),
            sql: String::new(),
        }
    }

    pub fn table_view(table_name: impl Into<String>, page_size: usize) -> Self {
        let table_name = table_name.into();
        TabConfig::TableView {
            title: table_name.clone(),
            table_name,
            schema_name: None,
            page_size,
        }
    }

    pub fn table_structure(table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        TabConfig::TableStructure {
            title: format!("{} (structure)", table_name),
            table_name,
            schema_name: None,
        }
    }

    pub(crate) fn into_tab(self, key: String) -> Tab {
        match self {
            TabConfig::SqlEditor { title, sql } => Tab::SqlEditor(SqlEditorTab {
                key,
                title,
                sql,
                is_loading: false,
                results: Vec::new(),
            }),
            TabConfig::TableView {
                title,
                table_name,
                schema_name,
                page_size,
            } => Tab::TableView(TableViewTab {
                key,
                title,
                table_name,
                schema_name,
                is_loading: false,
                data: Vec::new(),
                columns: Vec::new(),
                primary_key: None,
                error: None,
                dirty_changes: BTreeMap::new(),
                page: 1,
                page_size,
                total: 0,
                filter_conditions: Vec::new(),
            }),
            TabConfig::TableStructure {
                title,
                table_name,
                schema_name,
            } => Tab::TableStructure(TableStructureTab {
                key,
                title,
                table_name,
                schema_name,
                is_loading: false,
                columns: Vec::new(),
                error: None,
                dirty_structure_changes: BTreeMap::new(),
            }),
        }
    }
}

/// Stable row identity: the storage rowid returned alongside every loaded
/// row. Used instead of the primary key so edits to the PK column (or
/// tables without one) still target the right row.
pub fn rowid_of(row: &Row) -> Option<i64> {
    row.get("rowid").and_then(Value::as_i64)
}
