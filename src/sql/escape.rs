use serde_json::Value;

/// Quote a table or column name for interpolation into generated SQL.
///
/// Double-quoted, with embedded double quotes doubled. Every identifier
/// written into synthesized SQL must go through here so reserved words and
/// special characters survive.
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn escape_string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a dynamic value as a SQL literal.
///
/// `null` -> `NULL`, strings are quoted, booleans map to `1`/`0`, numbers
/// pass through unquoted. Compound JSON values are stored as their JSON
/// text, quoted. All INSERT/UPDATE synthesis uses this one mapping so NULL
/// and type handling never drift between call sites.
pub fn to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => escape_string_literal(s),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => n.to_string(),
        other => escape_string_literal(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_doubles_embedded_quotes() {
        assert_eq!(escape_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(escape_identifier("order"), "\"order\"");
    }

    #[test]
    fn string_literal_doubles_single_quotes() {
        assert_eq!(escape_string_literal("O'Reilly"), "'O''Reilly'");
        assert_eq!(escape_string_literal(""), "''");
    }

    #[test]
    fn literal_mapping() {
        assert_eq!(to_sql_literal(&Value::Null), "NULL");
        assert_eq!(to_sql_literal(&json!(true)), "1");
        assert_eq!(to_sql_literal(&json!(false)), "0");
        assert_eq!(to_sql_literal(&json!("O'Reilly")), "'O''Reilly'");
        assert_eq!(to_sql_literal(&json!(42)), "42");
        assert_eq!(to_sql_literal(&json!(-1.5)), "-1.5");
    }

    #[test]
    fn compound_values_become_quoted_json() {
        assert_eq!(to_sql_literal(&json!(["a"])), "'[\"a\"]'");
    }
}
