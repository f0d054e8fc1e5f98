mod escape;
mod filter;

pub use escape::{escape_identifier, escape_string_literal, to_sql_literal};
pub use filter::{build_where_clause, FilterCondition, FilterLogic, FilterOperator};
