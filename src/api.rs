use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row returned by the backend: column name -> value.
///
/// Rows are schema-dependent and only known at runtime, so they stay
/// dynamic rather than being mapped onto static structs.
pub type Row = serde_json::Map<String, Value>;

/// Result of executing one SQL statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResult {
    /// `None` for non-SELECT statements or failed statements.
    pub rows: Option<Vec<Row>>,
    #[serde(rename = "rowCount", default)]
    pub row_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiResult {
    pub fn success(rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            rows: Some(rows),
            row_count,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            rows: None,
            row_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Executes SQL against the backing database.
///
/// The store and schema cache only ever talk to this seam; the production
/// implementation is [`HttpGateway`].
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one or more `;`-joined statements, returning one result per
    /// statement in submission order. Never fails at the signature level:
    /// transport problems come back as a single result carrying `error`.
    async fn execute(&self, sql: &str) -> Vec<ApiResult>;
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    sql: &'a str,
}

/// HTTP adapter for the remote execution endpoint.
///
/// Posts `{"sql": "..."}` and normalizes whichever response shape the
/// backend happens to produce into a uniform `Vec<ApiResult>`.
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, sql: &str) -> Vec<ApiResult> {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(&ExecuteRequest { sql })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return vec![ApiResult::failure(format!("Request failed: {}", e))],
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            };
            return vec![ApiResult::failure(format!(
                "HTTP Error {}: {}",
                status.as_u16(),
                detail
            ))];
        }

        match response.json::<Value>().await {
            Ok(data) => normalize_response(data),
            Err(e) => vec![ApiResult::failure(format!("Request failed: {}", e))],
        }
    }
}

#[async_trait]
impl SqlExecutor for HttpGateway {
    async fn execute(&self, sql: &str) -> Vec<ApiResult> {
        if sql.trim().is_empty() {
            return vec![ApiResult::failure("No SQL statement provided")];
        }
        self.post(sql).await
    }
}

/// Fold the backend's possible response shapes into `Vec<ApiResult>`.
///
/// The backend is loosely specified and has been observed to return:
/// 1. an array of result objects (`[{rows, rowCount, error}, ..]`),
/// 2. a bare array of row objects,
/// 3. a single result object,
/// 4. a single plain object (treated as one row of one result).
pub fn normalize_response(data: Value) -> Vec<ApiResult> {
    match data {
        Value::Array(items) => {
            let is_result_list = items
                .first()
                .and_then(Value::as_object)
                .map(|obj| obj.contains_key("rows"))
                .unwrap_or(false);

            if is_result_list {
                match serde_json::from_value::<Vec<ApiResult>>(Value::Array(items)) {
                    Ok(results) => results,
                    Err(e) => vec![ApiResult::failure(format!(
                        "Unexpected response format from server: {}",
                        e
                    ))],
                }
            } else {
                let rows: Vec<Row> = items.into_iter().map(coerce_row).collect();
                vec![ApiResult::success(rows)]
            }
        }
        Value::Object(obj) => {
            if obj.contains_key("rows") {
                match serde_json::from_value::<ApiResult>(Value::Object(obj)) {
                    Ok(result) => vec![result],
                    Err(e) => vec![ApiResult::failure(format!(
                        "Unexpected response format from server: {}",
                        e
                    ))],
                }
            } else {
                vec![ApiResult::success(vec![obj])]
            }
        }
        _ => vec![ApiResult::failure("Unexpected response format from server")],
    }
}

// A bare array is expected to hold row objects; anything else is kept
// under a synthetic "value" column rather than dropped.
fn coerce_row(value: Value) -> Row {
    match value {
        Value::Object(obj) => obj,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

/// Scripted [`SqlExecutor`] for tests: replays queued results in order and
/// records every SQL string it was given.
pub struct MockExecutor {
    responses: std::sync::Mutex<std::collections::VecDeque<Vec<ApiResult>>>,
    executed: std::sync::Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            executed: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Queue a single success result whose rows come from a JSON array.
    pub fn push_rows(&self, rows: Value) {
        let rows: Vec<Row> = serde_json::from_value(rows).expect("rows must be a JSON array of objects");
        self.push_results(vec![ApiResult::success(rows)]);
    }

    /// Queue a single failed result.
    pub fn push_error(&self, error: impl Into<String>) {
        self.push_results(vec![ApiResult::failure(error)]);
    }

    /// Queue an exact multi-statement response.
    pub fn push_results(&self, results: Vec<ApiResult>) {
        self.responses.lock().unwrap().push_back(results);
    }

    /// Every SQL string submitted so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlExecutor for MockExecutor {
    async fn execute(&self, sql: &str) -> Vec<ApiResult> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ApiResult::success(Vec::new())])
    }
}
