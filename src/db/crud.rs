//! Structured CRUD operations.
//!
//! Builds parameterized SQL from JSON filter descriptions. The filter
//! operator set is closed: an unrecognized operator fails the request
//! instead of degrading to an equality match.

use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{AppError, Result};

use super::{Database, QueryResult};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Supported filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    Is,
}

impl FilterOp {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::Ilike => "ILIKE",
            FilterOp::In => "IN",
            FilterOp::Is => "IS",
        }
    }
}

impl FromStr for FilterOp {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "like" => Ok(FilterOp::Like),
            "ilike" => Ok(FilterOp::Ilike),
            "in" => Ok(FilterOp::In),
            "is" => Ok(FilterOp::Is),
            other => Err(AppError::Validation(format!(
                "Unknown filter operator '{other}'. Supported: eq, neq, gt, gte, lt, lte, like, ilike, in, is"
            ))),
        }
    }
}

/// One column filter.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl Filter {
    /// Parse the filters object of a CRUD request. A plain value means
    /// equality; an object maps operator names to values.
    pub fn parse_map(filters: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<Filter>> {
        let mut parsed = Vec::new();
        for (column, value) in filters {
            validate_identifier(column)?;
            match value {
                serde_json::Value::Object(ops) => {
                    for (op, filter_value) in ops {
                        parsed.push(Filter {
                            column: column.clone(),
                            op: op.parse()?,
                            value: filter_value.clone(),
                        });
                    }
                }
                plain => parsed.push(Filter {
                    column: column.clone(),
                    op: FilterOp::Eq,
                    value: plain.clone(),
                }),
            }
        }
        Ok(parsed)
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid identifier: {name}")))
    }
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Renders filters into a WHERE clause, appending bind parameters.
fn render_filters(filters: &[Filter], params: &mut Vec<serde_json::Value>) -> Result<String> {
    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = quote(&filter.column);
        match filter.op {
            FilterOp::Is => {
                // IS takes null / true / false only.
                let literal = match &filter.value {
                    serde_json::Value::Null => "NULL",
                    serde_json::Value::Bool(true) => "TRUE",
                    serde_json::Value::Bool(false) => "FALSE",
                    _ => {
                        return Err(AppError::Validation(
                            "'is' filter requires null, true, or false".to_string(),
                        ));
                    }
                };
                clauses.push(format!("{column} IS {literal}"));
            }
            FilterOp::In => {
                let values = filter.value.as_array().ok_or_else(|| {
                    AppError::Validation("'in' filter requires an array value".to_string())
                })?;
                if values.is_empty() {
                    return Err(AppError::Validation(
                        "'in' filter requires a non-empty array".to_string(),
                    ));
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(value.clone());
                    placeholders.push(format!("${}", params.len()));
                }
                clauses.push(format!("{column} IN ({})", placeholders.join(", ")));
            }
            op => {
                params.push(filter.value.clone());
                clauses.push(format!("{column} {} ${}", op.sql(), params.len()));
            }
        }
    }
    Ok(clauses.join(" AND "))
}

/// Executes CRUD requests against the database backend.
pub struct CrudExecutor {
    db: Arc<dyn Database>,
}

impl CrudExecutor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn select(
        &self,
        table: &str,
        columns: Option<&str>,
        filters: &[Filter],
        order_by: Option<&str>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<QueryResult> {
        validate_identifier(table)?;

        let projection = match columns {
            None | Some("*") => "*".to_string(),
            Some(list) => {
                let mut quoted = Vec::new();
                for column in list.split(',').map(str::trim) {
                    validate_identifier(column)?;
                    quoted.push(quote(column));
                }
                quoted.join(", ")
            }
        };

        let mut params = Vec::new();
        let mut sql = format!("SELECT {projection} FROM {}", quote(table));
        if !filters.is_empty() {
            let clause = render_filters(filters, &mut params)?;
            sql.push_str(&format!(" WHERE {clause}"));
        }
        if let Some(order) = order_by {
            let (column, direction) = match order.strip_prefix('-') {
                Some(column) => (column, "DESC"),
                None => (order, "ASC"),
            };
            validate_identifier(column)?;
            sql.push_str(&format!(" ORDER BY {} {direction}", quote(column)));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        debug!(table, "Executing select");
        self.db.execute(&sql, &params).await
    }

    pub async fn insert(
        &self,
        table: &str,
        data: &serde_json::Value,
        on_conflict: Option<&str>,
    ) -> Result<QueryResult> {
        let (sql, params) = build_insert(table, data, on_conflict, false)?;
        debug!(table, "Executing insert");
        self.db.execute(&sql, &params).await
    }

    pub async fn upsert(
        &self,
        table: &str,
        data: &serde_json::Value,
        on_conflict: Option<&str>,
    ) -> Result<QueryResult> {
        let (sql, params) = build_insert(table, data, on_conflict, true)?;
        debug!(table, "Executing upsert");
        self.db.execute(&sql, &params).await
    }

    pub async fn update(
        &self,
        table: &str,
        data: &serde_json::Value,
        filters: &[Filter],
    ) -> Result<QueryResult> {
        validate_identifier(table)?;
        if filters.is_empty() {
            return Err(AppError::Validation(
                "Filters are required for update operations".to_string(),
            ));
        }
        let object = data.as_object().filter(|o| !o.is_empty()).ok_or_else(|| {
            AppError::Validation("'data' must be a non-empty object".to_string())
        })?;

        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(object.len());
        for (column, value) in object {
            validate_identifier(column)?;
            params.push(value.clone());
            assignments.push(format!("{} = ${}", quote(column), params.len()));
        }
        let clause = render_filters(filters, &mut params)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {clause} RETURNING *",
            quote(table),
            assignments.join(", ")
        );

        debug!(table, "Executing update");
        self.db.execute(&sql, &params).await
    }

    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<QueryResult> {
        validate_identifier(table)?;
        if filters.is_empty() {
            return Err(AppError::Validation(
                "Filters are required for delete operations".to_string(),
            ));
        }

        let mut params = Vec::new();
        let clause = render_filters(filters, &mut params)?;
        let sql = format!("DELETE FROM {} WHERE {clause} RETURNING *", quote(table));

        debug!(table, "Executing delete");
        self.db.execute(&sql, &params).await
    }
}

/// Builds an INSERT statement from one object or a uniform array of objects.
fn build_insert(
    table: &str,
    data: &serde_json::Value,
    on_conflict: Option<&str>,
    do_update: bool,
) -> Result<(String, Vec<serde_json::Value>)> {
    validate_identifier(table)?;

    let rows: Vec<&serde_json::Map<String, serde_json::Value>> = match data {
        serde_json::Value::Object(row) => vec![row],
        serde_json::Value::Array(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                rows.push(item.as_object().ok_or_else(|| {
                    AppError::Validation("'data' array must contain objects".to_string())
                })?);
            }
            rows
        }
        _ => {
            return Err(AppError::Validation(
                "'data' must be an object or an array of objects".to_string(),
            ));
        }
    };

    let first = rows.first().filter(|r| !r.is_empty()).ok_or_else(|| {
        AppError::Validation("'data' must contain at least one non-empty row".to_string())
    })?;

    let columns: Vec<String> = first.keys().cloned().collect();
    for column in &columns {
        validate_identifier(column)?;
    }

    let mut params = Vec::new();
    let mut value_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            params.push(row.get(column).cloned().unwrap_or(serde_json::Value::Null));
            placeholders.push(format!("${}", params.len()));
        }
        value_rows.push(format!("({})", placeholders.join(", ")));
    }

    let quoted_columns: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote(table),
        quoted_columns.join(", "),
        value_rows.join(", ")
    );

    if do_update {
        let conflict = on_conflict.ok_or_else(|| {
            AppError::Validation("'on_conflict' is required for upsert operations".to_string())
        })?;
        validate_identifier(conflict)?;
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != conflict)
            .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote(conflict)));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quote(conflict),
                updates.join(", ")
            ));
        }
    } else if let Some(conflict) = on_conflict {
        validate_identifier(conflict)?;
        sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote(conflict)));
    }

    sql.push_str(" RETURNING *");
    Ok((sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("eq", FilterOp::Eq)]
    #[case("neq", FilterOp::Neq)]
    #[case("gte", FilterOp::Gte)]
    #[case("ilike", FilterOp::Ilike)]
    #[case("in", FilterOp::In)]
    #[case("is", FilterOp::Is)]
    fn test_filter_op_parsing(#[case] input: &str, #[case] expected: FilterOp) {
        assert_eq!(input.parse::<FilterOp>().unwrap(), expected);
    }

    #[rstest]
    #[case("contains")]
    #[case("text_search")]
    #[case("range_gt")]
    #[case("EQ")]
    fn test_unknown_operator_rejected(#[case] input: &str) {
        let err = input.parse::<FilterOp>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_parse_map_plain_value_is_equality() {
        let filters = json!({"id": 42});
        let parsed = Filter::parse_map(filters.as_object().unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].op, FilterOp::Eq);
        assert_eq!(parsed[0].value, json!(42));
    }

    #[test]
    fn test_parse_map_operator_object() {
        let filters = json!({"age": {"gte": 18, "lt": 65}});
        let parsed = Filter::parse_map(filters.as_object().unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().any(|f| f.op == FilterOp::Gte));
        assert!(parsed.iter().any(|f| f.op == FilterOp::Lt));
    }

    #[test]
    fn test_parse_map_rejects_unknown_operator() {
        let filters = json!({"age": {"overlaps": [1, 2]}});
        assert!(Filter::parse_map(filters.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_render_filters_in_expands_placeholders() {
        let filters = vec![Filter {
            column: "status".to_string(),
            op: FilterOp::In,
            value: json!(["active", "pending"]),
        }];
        let mut params = Vec::new();
        let clause = render_filters(&filters, &mut params).unwrap();
        assert_eq!(clause, "\"status\" IN ($1, $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_render_filters_is_null_takes_no_param() {
        let filters = vec![Filter {
            column: "deleted_at".to_string(),
            op: FilterOp::Is,
            value: serde_json::Value::Null,
        }];
        let mut params = Vec::new();
        let clause = render_filters(&filters, &mut params).unwrap();
        assert_eq!(clause, "\"deleted_at\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_insert_single_row() {
        let (sql, params) =
            build_insert("users", &json!({"name": "ada", "age": 36}), None, false).unwrap();
        assert!(sql.starts_with("INSERT INTO \"users\""));
        assert!(sql.contains("VALUES ($1, $2)"));
        assert!(sql.ends_with("RETURNING *"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_build_upsert_requires_on_conflict() {
        let err = build_insert("users", &json!({"name": "ada"}), None, true).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_build_upsert_sets_excluded_columns() {
        let (sql, _) = build_insert(
            "users",
            &json!({"id": 1, "name": "ada"}),
            Some("id"),
            true,
        )
        .unwrap();
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
    }

    #[test]
    fn test_identifier_validation_blocks_injection() {
        assert!(validate_identifier("users; DROP TABLE users").is_err());
        assert!(validate_identifier("users\"").is_err());
        assert!(validate_identifier("valid_table_1").is_ok());
    }
}
