use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{Row, SqlExecutor};

/// Immutable snapshot of one column's metadata, replaced wholesale on each
/// refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    /// "YES" | "NO"
    pub is_nullable: String,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub is_primary_key: bool,
}

impl ColumnInfo {
    /// Build from a `PRAGMA table_info` row:
    /// `{ cid, name, type, notnull, dflt_value, pk }`.
    pub fn from_pragma_row(row: &Row) -> Option<Self> {
        let name = row.get("name")?.as_str()?.to_string();
        let data_type = row
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let notnull = row.get("notnull").and_then(Value::as_i64).unwrap_or(0);
        let pk = row.get("pk").and_then(Value::as_i64).unwrap_or(0);
        // Backends are free to serialize a default like `0` as a JSON
        // number rather than its SQL text; keep it either way.
        let column_default = match row.get("dflt_value") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Some(Self {
            column_name: name,
            data_type,
            is_nullable: if notnull == 0 { "YES" } else { "NO" }.to_string(),
            column_default,
            character_maximum_length: None,
            numeric_precision: None,
            is_primary_key: pk == 1,
        })
    }
}

/// `PRAGMA table_info` only accepts single-quoted names for reserved
/// keywords; double quoting does not work there.
pub fn pragma_table_info_sql(table: &str) -> String {
    format!("PRAGMA table_info('{}')", table.replace('\'', "''"))
}

const LIST_TABLES_SQL: &str = "SELECT name as table_name FROM sqlite_master \
     WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// Client-side memoization of table and column metadata.
///
/// One batched round trip at refresh time fills both the column-name map
/// (completion) and the full metadata map (tree display); individual
/// tables fall back to an on-demand fetch if the batch failed or raced.
pub struct SchemaCache {
    executor: Arc<dyn SqlExecutor>,
    tables: Vec<String>,
    schema_map: HashMap<String, Vec<String>>,
    column_info: HashMap<String, Vec<ColumnInfo>>,
    loading: Arc<Mutex<HashSet<String>>>,
}

/// In-flight marker for one table's lazy fetch. Removed on drop, so a
/// fetch future that is cancelled mid-await releases the table instead of
/// blocking every later retry.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    table: String,
}

impl InFlight {
    fn begin(set: &Arc<Mutex<HashSet<String>>>, table: &str) -> Option<Self> {
        if !set.lock().unwrap().insert(table.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            table: table.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.table);
    }
}

impl SchemaCache {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            executor,
            tables: Vec::new(),
            schema_map: HashMap::new(),
            column_info: HashMap::new(),
            loading: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ordered table names from the last refresh.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Ordered column names for one table, for completion.
    pub fn column_names_for_table(&self, table: &str) -> Option<&Vec<String>> {
        self.schema_map.get(table)
    }

    /// Full column metadata for one table. Synchronous cache read.
    pub fn get_columns_for_table(&self, table: &str) -> Option<&Vec<ColumnInfo>> {
        self.column_info.get(table)
    }

    /// Rebuild the whole cache: fetch the table list, then preload every
    /// table's columns in a single UNION ALL query.
    pub async fn refresh_schema(&mut self) {
        let results = self.executor.execute(LIST_TABLES_SQL).await;

        let Some(rows) = results.first().and_then(|r| r.rows.as_ref()) else {
            let detail = results
                .first()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "empty response".to_string());
            warn!("failed to fetch table list: {}", detail);
            self.tables.clear();
            self.schema_map.clear();
            self.column_info.clear();
            return;
        };

        self.tables = rows
            .iter()
            .filter_map(|row| row.get("table_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        self.schema_map.clear();
        self.column_info.clear();

        if self.tables.is_empty() {
            return;
        }

        // One round trip for all tables instead of one per table.
        let batch_sql = self
            .tables
            .iter()
            .map(|table| {
                let escaped = table.replace('\'', "''");
                format!(
                    "SELECT '{}' as table_name, name as column_name, type, \"notnull\" as notnull_flag \
                     FROM pragma_table_info('{}')",
                    escaped, escaped
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");

        let column_results = self.executor.execute(&batch_sql).await;
        let Some(column_rows) = column_results.first().and_then(|r| r.rows.as_ref()) else {
            // Leave both maps empty rather than partially populated; the
            // lazy path fills entries on demand.
            let detail = column_results
                .first()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "empty response".to_string());
            warn!("failed to batch preload columns: {}", detail);
            return;
        };

        for row in column_rows {
            let Some(table) = row.get("table_name").and_then(Value::as_str) else {
                continue;
            };
            let Some(column) = row.get("column_name").and_then(Value::as_str) else {
                continue;
            };
            let data_type = row
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let notnull = row.get("notnull_flag").and_then(Value::as_i64).unwrap_or(0);

            self.schema_map
                .entry(table.to_string())
                .or_default()
                .push(column.to_string());
            self.column_info
                .entry(table.to_string())
                .or_default()
                .push(ColumnInfo {
                    column_name: column.to_string(),
                    data_type,
                    is_nullable: if notnull == 0 { "YES" } else { "NO" }.to_string(),
                    column_default: None,
                    character_maximum_length: None,
                    numeric_precision: None,
                    is_primary_key: false,
                });
        }
    }

    /// Make sure one table's columns are cached, fetching on demand if the
    /// batch preload missed it. Cache hits and tables already being
    /// fetched return without a network call.
    pub async fn ensure_columns_loaded(&mut self, table: &str) {
        if self.column_info.contains_key(table) {
            return;
        }
        let Some(in_flight) = InFlight::begin(&self.loading, table) else {
            return;
        };

        let results = self.executor.execute(&pragma_table_info_sql(table)).await;
        drop(in_flight);

        let Some(rows) = results.first().and_then(|r| r.rows.as_ref()) else {
            let detail = results
                .first()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "empty response".to_string());
            error!("failed to load columns for {}: {}", table, detail);
            return;
        };

        let columns: Vec<ColumnInfo> = rows.iter().filter_map(ColumnInfo::from_pragma_row).collect();
        let names: Vec<String> = columns.iter().map(|c| c.column_name.clone()).collect();

        self.schema_map.insert(table.to_string(), names);
        self.column_info.insert(table.to_string(), columns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExecutor;
    use serde_json::json;

    fn pragma_rows() -> Value {
        json!([
            {"cid": 0, "name": "id", "type": "INTEGER", "notnull": 1, "dflt_value": null, "pk": 1},
            {"cid": 1, "name": "name", "type": "TEXT", "notnull": 0, "dflt_value": "'x'", "pk": 0}
        ])
    }

    #[test]
    fn column_info_from_pragma_row() {
        let rows: Vec<Row> = serde_json::from_value(pragma_rows()).unwrap();
        let col = ColumnInfo::from_pragma_row(&rows[0]).unwrap();
        assert_eq!(col.column_name, "id");
        assert_eq!(col.data_type, "INTEGER");
        assert_eq!(col.is_nullable, "NO");
        assert!(col.is_primary_key);
        assert_eq!(col.column_default, None);

        let col = ColumnInfo::from_pragma_row(&rows[1]).unwrap();
        assert_eq!(col.is_nullable, "YES");
        assert!(!col.is_primary_key);
        assert_eq!(col.column_default.as_deref(), Some("'x'"));
    }

    #[test]
    fn numeric_default_value_is_kept_as_text() {
        let rows: Vec<Row> = serde_json::from_value(json!([
            {"cid": 0, "name": "qty", "type": "INTEGER", "notnull": 1, "dflt_value": 0, "pk": 0}
        ]))
        .unwrap();
        let col = ColumnInfo::from_pragma_row(&rows[0]).unwrap();
        assert_eq!(col.column_default.as_deref(), Some("0"));
    }

    #[test]
    fn pragma_sql_single_quotes_the_name() {
        assert_eq!(pragma_table_info_sql("order"), "PRAGMA table_info('order')");
        assert_eq!(pragma_table_info_sql("o'clock"), "PRAGMA table_info('o''clock')");
    }

    #[tokio::test]
    async fn refresh_populates_both_maps_in_two_round_trips() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_rows(json!([
            {"table_name": "orders"},
            {"table_name": "users"}
        ]));
        executor.push_rows(json!([
            {"table_name": "orders", "column_name": "id", "type": "INTEGER", "notnull_flag": 1},
            {"table_name": "orders", "column_name": "status", "type": "TEXT", "notnull_flag": 0},
            {"table_name": "users", "column_name": "id", "type": "INTEGER", "notnull_flag": 1}
        ]));

        let mut cache = SchemaCache::new(executor.clone());
        cache.refresh_schema().await;

        assert_eq!(cache.tables(), &["orders", "users"]);
        assert_eq!(
            cache.column_names_for_table("orders").unwrap(),
            &["id", "status"]
        );
        let info = cache.get_columns_for_table("orders").unwrap();
        assert_eq!(info[0].is_nullable, "NO");
        assert_eq!(info[1].is_nullable, "YES");
        assert_eq!(executor.executed().len(), 2);

        let batch = &executor.executed()[1];
        assert!(batch.contains("UNION ALL"));
        assert!(batch.contains("pragma_table_info('orders')"));
        assert!(batch.contains("pragma_table_info('users')"));
    }

    #[tokio::test]
    async fn batch_failure_leaves_column_maps_empty() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_rows(json!([{"table_name": "orders"}]));
        executor.push_error("disk I/O error");

        let mut cache = SchemaCache::new(executor.clone());
        cache.refresh_schema().await;

        assert_eq!(cache.tables(), &["orders"]);
        assert!(cache.get_columns_for_table("orders").is_none());
        assert!(cache.column_names_for_table("orders").is_none());
    }

    #[tokio::test]
    async fn ensure_columns_loaded_is_a_cache_hit_after_fetch() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_rows(pragma_rows());

        let mut cache = SchemaCache::new(executor.clone());
        cache.ensure_columns_loaded("orders").await;
        assert_eq!(cache.get_columns_for_table("orders").unwrap().len(), 2);
        assert_eq!(cache.column_names_for_table("orders").unwrap(), &["id", "name"]);

        // Second call must not touch the network.
        cache.ensure_columns_loaded("orders").await;
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_fetch_releases_the_in_flight_marker() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        // First call hangs forever; later calls answer normally.
        struct StallFirstExecutor {
            calls: AtomicUsize,
            inner: MockExecutor,
        }

        #[async_trait::async_trait]
        impl SqlExecutor for StallFirstExecutor {
            async fn execute(&self, sql: &str) -> Vec<crate::api::ApiResult> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                self.inner.execute(sql).await
            }
        }

        let executor = StallFirstExecutor {
            calls: AtomicUsize::new(0),
            inner: MockExecutor::new(),
        };
        executor.inner.push_rows(pragma_rows());
        let mut cache = SchemaCache::new(Arc::new(executor));

        // The timeout drops the fetch mid-await.
        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            cache.ensure_columns_loaded("orders"),
        )
        .await;
        assert!(cache.get_columns_for_table("orders").is_none());

        // The table is not poisoned: the retry fetches and populates.
        cache.ensure_columns_loaded("orders").await;
        assert_eq!(cache.get_columns_for_table("orders").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_lazy_load_is_retryable() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_error("no such table: missing");
        executor.push_rows(pragma_rows());

        let mut cache = SchemaCache::new(executor.clone());
        cache.ensure_columns_loaded("missing").await;
        assert!(cache.get_columns_for_table("missing").is_none());

        cache.ensure_columns_loaded("missing").await;
        assert_eq!(cache.get_columns_for_table("missing").unwrap().len(), 2);
        assert_eq!(executor.executed().len(), 2);
    }
}
