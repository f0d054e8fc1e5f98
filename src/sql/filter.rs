use serde::{Deserialize, Serialize};

use super::escape::{escape_identifier, escape_string_literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl FilterOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Gte => ">=",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::NotLike => "NOT LIKE",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
        }
    }

    fn needs_value(&self) -> bool {
        !matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterLogic {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl FilterLogic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterLogic::And => "AND",
            FilterLogic::Or => "OR",
        }
    }
}

/// One structured predicate. `logic` joins this condition to the next one;
/// on the last condition it is unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub id: String,
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
    pub logic: FilterLogic,
}

// Matches the loose numeric check used when deciding whether a filter
// value may be emitted unquoted.
fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok()
}

fn render_value(value: &str) -> String {
    let trimmed = value.trim();
    if is_numeric(trimmed) {
        value.to_string()
    } else {
        escape_string_literal(value)
    }
}

/// Compile filter conditions into a WHERE clause.
///
/// Returns the empty string, or a clause starting with `" WHERE "`.
/// Conditions whose operator requires a value but whose value is blank are
/// silently dropped; a condition's `logic` is only emitted when another
/// surviving condition follows it.
pub fn build_where_clause(conditions: &[FilterCondition]) -> String {
    let valid: Vec<&FilterCondition> = conditions
        .iter()
        .filter(|c| !c.operator.needs_value() || !c.value.trim().is_empty())
        .collect();

    if valid.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = valid
        .iter()
        .enumerate()
        .map(|(index, condition)| {
            let field = escape_identifier(&condition.field);
            let mut clause = match condition.operator {
                FilterOperator::IsNull | FilterOperator::IsNotNull => {
                    format!("{} {}", field, condition.operator.as_sql())
                }
                FilterOperator::In | FilterOperator::NotIn => {
                    let values: Vec<String> = condition
                        .value
                        .split(',')
                        .map(|part| {
                            let trimmed = part.trim();
                            if is_numeric(trimmed) {
                                trimmed.to_string()
                            } else {
                                escape_string_literal(trimmed)
                            }
                        })
                        .collect();
                    format!(
                        "{} {} ({})",
                        field,
                        condition.operator.as_sql(),
                        values.join(", ")
                    )
                }
                FilterOperator::Like | FilterOperator::NotLike => {
                    // Wildcards are the caller's responsibility.
                    format!(
                        "{} {} {}",
                        field,
                        condition.operator.as_sql(),
                        escape_string_literal(&condition.value)
                    )
                }
                _ => format!(
                    "{} {} {}",
                    field,
                    condition.operator.as_sql(),
                    render_value(&condition.value)
                ),
            };

            if index < valid.len() - 1 {
                clause.push(' ');
                clause.push_str(condition.logic.as_sql());
            }

            clause
        })
        .collect();

    format!(" WHERE {}", clauses.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(field: &str, operator: FilterOperator, value: &str, logic: FilterLogic) -> FilterCondition {
        FilterCondition {
            id: format!("f-{}", field),
            field: field.to_string(),
            operator,
            value: value.to_string(),
            logic,
        }
    }

    #[test]
    fn empty_input_yields_empty_clause() {
        assert_eq!(build_where_clause(&[]), "");
    }

    #[test]
    fn incomplete_conditions_are_dropped() {
        let conditions = [cond("name", FilterOperator::Eq, "   ", FilterLogic::And)];
        assert_eq!(build_where_clause(&conditions), "");
    }

    #[test]
    fn null_operators_need_no_value() {
        let conditions = [cond("email", FilterOperator::IsNull, "", FilterLogic::And)];
        assert_eq!(build_where_clause(&conditions), " WHERE \"email\" IS NULL");
    }

    #[test]
    fn composes_with_logic_operators() {
        let conditions = [
            cond("age", FilterOperator::Gt, "18", FilterLogic::And),
            cond("name", FilterOperator::Like, "Bob", FilterLogic::And),
        ];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"age\" > 18 AND \"name\" LIKE 'Bob'"
        );
    }

    #[test]
    fn or_logic_between_conditions() {
        let conditions = [
            cond("status", FilterOperator::Eq, "open", FilterLogic::Or),
            cond("status", FilterOperator::Eq, "pending", FilterLogic::And),
        ];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"status\" = 'open' OR \"status\" = 'pending'"
        );
    }

    #[test]
    fn dropped_trailing_condition_leaves_no_dangling_logic() {
        let conditions = [
            cond("age", FilterOperator::Gte, "21", FilterLogic::And),
            cond("name", FilterOperator::Eq, "", FilterLogic::Or),
        ];
        assert_eq!(build_where_clause(&conditions), " WHERE \"age\" >= 21");
    }

    #[test]
    fn in_operator_splits_and_types_each_part() {
        let conditions = [cond(
            "id",
            FilterOperator::In,
            "1, 2, abc",
            FilterLogic::And,
        )];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"id\" IN (1, 2, 'abc')"
        );
    }

    #[test]
    fn not_in_quotes_strings() {
        let conditions = [cond(
            "status",
            FilterOperator::NotIn,
            "done, won't fix",
            FilterLogic::And,
        )];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"status\" NOT IN ('done', 'won''t fix')"
        );
    }

    #[test]
    fn comparison_quotes_non_numeric_values() {
        let conditions = [cond("status", FilterOperator::Eq, "shipped", FilterLogic::And)];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"status\" = 'shipped'"
        );
    }

    #[test]
    fn field_names_are_escaped() {
        let conditions = [cond("weird\"col", FilterOperator::Eq, "5", FilterLogic::And)];
        assert_eq!(
            build_where_clause(&conditions),
            " WHERE \"weird\"\"col\" = 5"
        );
    }
}
