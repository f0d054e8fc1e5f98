use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;
use serde_json::Value;
use tokio::sync::watch;

use crate::api::{ApiResult, SqlExecutor};
use crate::schema::{pragma_table_info_sql, ColumnInfo};
use crate::sql::{build_where_clause, escape_identifier, to_sql_literal, FilterCondition};
use crate::tabs::{ColumnEdit, Tab, TabConfig, TableStructureTab, TableViewTab};

/// Single source of truth for all open workspaces.
///
/// Owns the tab list and the active key. Every load/save/mutate action
/// synthesizes its SQL here and applies the executor's response back to
/// tab state. Actions take `&mut self` and run to completion before the
/// next one can start, so responses always apply in submission order.
pub struct TabStore {
    executor: Arc<dyn SqlExecutor>,
    tabs: Vec<Tab>,
    active_key: Option<String>,
    next_tab_id: u64,
    revision: watch::Sender<u64>,
}

fn first_error(results: &[ApiResult]) -> Option<String> {
    results.iter().find_map(|r| r.error.clone())
}

// Batches of more than one statement run inside an explicit transaction so
// a mid-batch failure cannot leave half the statements applied.
fn batch_sql(statements: &[String]) -> String {
    if statements.len() > 1 {
        format!("BEGIN; {}; COMMIT", statements.join("; "))
    } else {
        statements.join("; ")
    }
}

impl TabStore {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        let (revision, _) = watch::channel(0u64);
        Self {
            executor,
            tabs: Vec::new(),
            active_key: None,
            next_tab_id: 0,
            revision,
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active_key.as_deref()
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        let key = self.active_key.as_deref()?;
        self.tabs.iter().find(|t| t.key() == key)
    }

    pub fn get_tab(&self, key: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.key() == key)
    }

    /// Change notification: the receiver wakes whenever any tab state is
    /// committed. Presentation layers re-read the store on wakeup.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn notify(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Open a new tab, or activate the existing one when a table view or
    /// structure tab for the same (table, schema) is already open. SQL
    /// editor tabs are never deduplicated. Returns the tab's key.
    pub fn add_tab(&mut self, config: TabConfig) -> String {
        let existing = match &config {
            TabConfig::TableView {
                table_name,
                schema_name,
                ..
            } => self.tabs.iter().find(|tab| {
                matches!(tab, Tab::TableView(t)
                    if t.table_name == *table_name && t.schema_name == *schema_name)
            }),
            TabConfig::TableStructure {
                table_name,
                schema_name,
                ..
            } => self.tabs.iter().find(|tab| {
                matches!(tab, Tab::TableStructure(t)
                    if t.table_name == *table_name && t.schema_name == *schema_name)
            }),
            TabConfig::SqlEditor { .. } => None,
        };

        if let Some(tab) = existing {
            let key = tab.key().to_string();
            self.active_key = Some(key.clone());
            self.notify();
            return key;
        }

        self.next_tab_id += 1;
        let key = format!("tab-{}", self.next_tab_id);
        self.tabs.push(config.into_tab(key.clone()));
        self.active_key = Some(key.clone());
        self.notify();
        key
    }

    /// Close a tab, discarding any pending changes it held. Closing the
    /// active tab activates the tab before it (or the new first tab).
    pub fn remove_tab(&mut self, key: &str) {
        let Some(closed_index) = self.tabs.iter().position(|t| t.key() == key) else {
            return;
        };
        self.tabs.remove(closed_index);

        if self.active_key.as_deref() == Some(key) {
            self.active_key = if self.tabs.is_empty() {
                None
            } else {
                let new_index = closed_index.saturating_sub(1).min(self.tabs.len() - 1);
                Some(self.tabs[new_index].key().to_string())
            };
        }
        self.notify();
    }

    pub fn set_active_key(&mut self, key: &str) {
        if self.tabs.iter().any(|t| t.key() == key) {
            self.active_key = Some(key.to_string());
            self.notify();
        }
    }

    fn sql_editor_mut(&mut self, key: &str) -> Option<&mut crate::tabs::SqlEditorTab> {
        self.tabs.iter_mut().find_map(|tab| match tab {
            Tab::SqlEditor(t) if t.key == key => Some(t),
            _ => None,
        })
    }

    fn table_view_mut(&mut self, key: &str) -> Option<&mut TableViewTab> {
        self.tabs.iter_mut().find_map(|tab| match tab {
            Tab::TableView(t) if t.key == key => Some(t),
            _ => None,
        })
    }

    fn table_structure_mut(&mut self, key: &str) -> Option<&mut TableStructureTab> {
        self.tabs.iter_mut().find_map(|tab| match tab {
            Tab::TableStructure(t) if t.key == key => Some(t),
            _ => None,
        })
    }

    fn fail_table_view(&mut self, key: &str, error: String) {
        if let Some(tab) = self.table_view_mut(key) {
            tab.is_loading = false;
            tab.error = Some(error);
        }
        self.notify();
    }

    fn fail_table_structure(&mut self, key: &str, error: String) {
        if let Some(tab) = self.table_structure_mut(key) {
            tab.is_loading = false;
            tab.error = Some(error);
        }
        self.notify();
    }

    async fn rollback_best_effort(&self) {
        let results = self.executor.execute("ROLLBACK").await;
        if let Some(e) = first_error(&results) {
            warn!("rollback after failed batch did not apply: {}", e);
        }
    }

    // ---- SQL editor tabs ----

    pub fn set_sql_text(&mut self, key: &str, sql: impl Into<String>) {
        if let Some(tab) = self.sql_editor_mut(key) {
            tab.sql = sql.into();
            self.notify();
        }
    }

    /// Run the tab's SQL. Transport and statement failures come back as
    /// error results, never as panics or rejections.
    pub async fn execute_sql_for_tab(&mut self, key: &str) {
        let sql = match self.sql_editor_mut(key) {
            Some(tab) if !tab.sql.trim().is_empty() => {
                tab.is_loading = true;
                tab.sql.clone()
            }
            _ => return,
        };
        self.notify();

        let results = self.executor.execute(&sql).await;

        if let Some(tab) = self.sql_editor_mut(key) {
            tab.is_loading = false;
            tab.results = results;
        }
        self.notify();
    }

    // ---- Table view tabs ----

    /// Fetch column metadata and the current page of rows, replacing the
    /// tab's data wholesale. The rowid is always selected alongside `*` so
    /// every row carries its stable identity.
    pub async fn load_table_data(&mut self, key: &str) {
        let (table_name, page, page_size, filters) = match self.table_view_mut(key) {
            Some(tab) => {
                tab.is_loading = true;
                tab.error = None;
                (
                    tab.table_name.clone(),
                    tab.page,
                    tab.page_size,
                    tab.filter_conditions.clone(),
                )
            }
            None => return,
        };
        self.notify();

        let column_results = self.executor.execute(&pragma_table_info_sql(&table_name)).await;
        if let Some(e) = first_error(&column_results) {
            self.fail_table_view(key, e);
            return;
        }

        let columns: Vec<ColumnInfo> = column_results
            .first()
            .and_then(|r| r.rows.as_ref())
            .map(|rows| rows.iter().filter_map(ColumnInfo::from_pragma_row).collect())
            .unwrap_or_default();

        // First column flagged primary; None means callers fall back to
        // the rowid.
        let primary_key = columns
            .iter()
            .find(|c| c.is_primary_key)
            .map(|c| c.column_name.clone());

        let where_clause = build_where_clause(&filters);
        let offset = (page.max(1) - 1) * page_size;
        let data_sql = format!(
            "SELECT rowid, * FROM {}{} LIMIT {} OFFSET {}",
            escape_identifier(&table_name),
            where_clause,
            page_size,
            offset
        );

        let data_results = self.executor.execute(&data_sql).await;
        if let Some(e) = first_error(&data_results) {
            self.fail_table_view(key, e);
            return;
        }

        let data = data_results
            .first()
            .and_then(|r| r.rows.clone())
            .unwrap_or_default();

        if let Some(tab) = self.table_view_mut(key) {
            tab.is_loading = false;
            tab.total = data.len();
            tab.data = data;
            tab.columns = columns;
            tab.primary_key = primary_key;
        }
        self.notify();
    }

    /// Apply a cell edit optimistically and record it in the dirty map,
    /// merging with any earlier edit on the same row.
    pub fn update_cell_value(&mut self, key: &str, rowid: i64, column_name: &str, new_value: Value) {
        let Some(tab) = self.table_view_mut(key) else {
            return;
        };

        if let Some(row) = tab
            .data
            .iter_mut()
            .find(|row| crate::tabs::rowid_of(row) == Some(rowid))
        {
            row.insert(column_name.to_string(), new_value.clone());
        }

        tab.dirty_changes
            .entry(rowid)
            .or_default()
            .insert(column_name.to_string(), new_value);
        self.notify();
    }

    /// Persist every dirty row as one UPDATE targeted by rowid, batched
    /// into a single execution. On failure the dirty map is left intact so
    /// the user can retry; on success it is cleared and the page reloaded,
    /// since the server may have applied defaults or triggers.
    pub async fn save_changes_for_table_tab(&mut self, key: &str) {
        let (table_name, dirty) = match self.table_view_mut(key) {
            Some(tab) if !tab.dirty_changes.is_empty() => {
                tab.is_loading = true;
                (tab.table_name.clone(), tab.dirty_changes.clone())
            }
            _ => return,
        };
        self.notify();

        let table = escape_identifier(&table_name);
        let statements: Vec<String> = dirty
            .iter()
            .map(|(rowid, changes)| {
                let set_clauses: Vec<String> = changes
                    .iter()
                    .map(|(col, value)| {
                        format!("{} = {}", escape_identifier(col), to_sql_literal(value))
                    })
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE rowid = {}",
                    table,
                    set_clauses.join(", "),
                    rowid
                )
            })
            .collect();

        let results = self.executor.execute(&batch_sql(&statements)).await;
        if let Some(e) = first_error(&results) {
            if statements.len() > 1 {
                self.rollback_best_effort().await;
            }
            self.fail_table_view(key, e);
            return;
        }

        if let Some(tab) = self.table_view_mut(key) {
            tab.dirty_changes.clear();
        }
        self.load_table_data(key).await;
    }

    /// Insert one row from the provided field map. Absent fields are
    /// omitted from the statement so column defaults apply.
    pub async fn add_new_row(&mut self, key: &str, row_data: BTreeMap<String, Value>) {
        let table_name = match self.table_view_mut(key) {
            Some(tab) => {
                tab.is_loading = true;
                tab.error = None;
                tab.table_name.clone()
            }
            None => return,
        };
        self.notify();

        if row_data.is_empty() {
            self.fail_table_view(key, "No values provided for new row".to_string());
            return;
        }

        let columns: Vec<String> = row_data.keys().map(|c| escape_identifier(c)).collect();
        let values: Vec<String> = row_data.values().map(to_sql_literal).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            escape_identifier(&table_name),
            columns.join(", "),
            values.join(", ")
        );

        let results = self.executor.execute(&sql).await;
        if let Some(e) = first_error(&results) {
            self.fail_table_view(key, e);
            return;
        }

        self.load_table_data(key).await;
    }

    /// Delete the targeted rows by rowid, one DELETE per row, batched.
    pub async fn delete_rows(&mut self, key: &str, rowids: &[i64]) {
        if rowids.is_empty() {
            return;
        }
        let table_name = match self.table_view_mut(key) {
            Some(tab) => {
                tab.is_loading = true;
                tab.error = None;
                tab.table_name.clone()
            }
            None => return,
        };
        self.notify();

        let table = escape_identifier(&table_name);
        let statements: Vec<String> = rowids
            .iter()
            .map(|rowid| format!("DELETE FROM {} WHERE rowid = {}", table, rowid))
            .collect();

        let results = self.executor.execute(&batch_sql(&statements)).await;
        if let Some(e) = first_error(&results) {
            if statements.len() > 1 {
                self.rollback_best_effort().await;
            }
            self.fail_table_view(key, e);
            return;
        }

        self.load_table_data(key).await;
    }

    /// Replace the tab's filters and reload immediately so filters and
    /// data never diverge.
    pub async fn update_filter_conditions(&mut self, key: &str, conditions: Vec<FilterCondition>) {
        match self.table_view_mut(key) {
            Some(tab) => tab.filter_conditions = conditions,
            None => return,
        }
        self.load_table_data(key).await;
    }

    pub async fn set_page(&mut self, key: &str, page: usize) {
        match self.table_view_mut(key) {
            Some(tab) => tab.page = page.max(1),
            None => return,
        }
        self.load_table_data(key).await;
    }

    /// Changing the page size restarts from the first page.
    pub async fn set_page_size(&mut self, key: &str, page_size: usize) {
        match self.table_view_mut(key) {
            Some(tab) => {
                tab.page_size = page_size.max(1);
                tab.page = 1;
            }
            None => return,
        }
        self.load_table_data(key).await;
    }

    // ---- Table structure tabs ----

    /// Metadata-only fetch of the bound table's column definitions.
    pub async fn load_table_structure(&mut self, key: &str) {
        let table_name = match self.table_structure_mut(key) {
            Some(tab) => {
                tab.is_loading = true;
                tab.error = None;
                tab.table_name.clone()
            }
            None => return,
        };
        self.notify();

        let results = self.executor.execute(&pragma_table_info_sql(&table_name)).await;
        if let Some(e) = first_error(&results) {
            self.fail_table_structure(key, e);
            return;
        }

        let columns: Vec<ColumnInfo> = results
            .first()
            .and_then(|r| r.rows.as_ref())
            .map(|rows| rows.iter().filter_map(ColumnInfo::from_pragma_row).collect())
            .unwrap_or_default();

        if let Some(tab) = self.table_structure_mut(key) {
            tab.is_loading = false;
            tab.columns = columns;
        }
        self.notify();
    }

    /// Record a pending structural edit for one column, merging with any
    /// earlier edit to the same column.
    pub fn stage_structure_change(&mut self, key: &str, column_name: &str, edit: ColumnEdit) {
        let Some(tab) = self.table_structure_mut(key) else {
            return;
        };
        let entry = tab
            .dirty_structure_changes
            .entry(column_name.to_string())
            .or_default();
        if edit.column_name.is_some() {
            entry.column_name = edit.column_name;
        }
        if edit.data_type.is_some() {
            entry.data_type = edit.data_type;
        }
        self.notify();
    }

    /// Apply pending structural edits: RENAME COLUMN for name changes,
    /// ALTER COLUMN TYPE for type changes, one statement per change.
    pub async fn save_structure_changes(&mut self, key: &str) {
        let (table_name, dirty) = match self.table_structure_mut(key) {
            Some(tab) if !tab.dirty_structure_changes.is_empty() => {
                tab.is_loading = true;
                (tab.table_name.clone(), tab.dirty_structure_changes.clone())
            }
            _ => return,
        };
        self.notify();

        let table = escape_identifier(&table_name);
        let mut statements = Vec::new();
        for (column_name, edit) in &dirty {
            let column = escape_identifier(column_name);
            if let Some(new_name) = edit.column_name.as_deref() {
                if new_name != column_name {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        table,
                        column,
                        escape_identifier(new_name)
                    ));
                }
            }
            if let Some(data_type) = edit.data_type.as_deref() {
                if !data_type.is_empty() {
                    statements.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                        table, column, data_type
                    ));
                }
            }
        }

        if !statements.is_empty() {
            let results = self.executor.execute(&batch_sql(&statements)).await;
            if let Some(e) = first_error(&results) {
                if statements.len() > 1 {
                    self.rollback_best_effort().await;
                }
                self.fail_table_structure(key, e);
                return;
            }
        }

        if let Some(tab) = self.table_structure_mut(key) {
            tab.dirty_structure_changes.clear();
        }
        self.load_table_structure(key).await;
    }
}
