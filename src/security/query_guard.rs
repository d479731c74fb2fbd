//! SQL Query Risk Classifier
//!
//! Pattern-based static analysis of a single SQL statement. Assigns a
//! risk tier and either blocks, warns, or requires explicit
//! confirmation. Purely a function of the query text; no external
//! state, no suspension points.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Risk tier for a SQL statement. Totally ordered by discriminant:
/// Safe < Low < Medium < High < Dangerous.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Dangerous,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Dangerous => "dangerous",
        }
    }
}

/// Outcome of classifying one query string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryValidation {
    pub is_valid: bool,
    pub risk_level: RiskLevel,
    /// Blocking findings; non-empty means the query is invalid
    pub issues: Vec<String>,
    /// Non-blocking findings
    pub warnings: Vec<String>,
    /// Only computed when there are no issues
    pub sanitized_query: Option<String>,
    pub requires_confirmation: bool,
}

const DANGEROUS_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "TRUNCATE",
    "ALTER",
    "CREATE",
    "GRANT",
    "REVOKE",
    "INSERT",
    "UPDATE",
    "REPLACE",
    "MERGE",
    "CALL",
    "EXEC",
    "EXECUTE",
    "SHUTDOWN",
    "KILL",
    "LOAD",
    "OUTFILE",
    "DUMPFILE",
    "LOAD_FILE",
    "BENCHMARK",
    "SLEEP",
];

const PROTECTED_SCHEMAS: &[&str] = &[
    "information_schema",
    "pg_catalog",
    "pg_toast",
    "pg_temp",
    "pg_toast_temp",
    "public.pg_stat",
    "public.pg_settings",
];

const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)(\b(union|or|and)\b.*\b(select|insert|update|delete)\b)",
    r"(?i)(;.*--)|(;.*#)|(;.*/\*)",
    r"(?i)(\bor\b.*=.*\bor\b)|(\band\b.*=.*\band\b)",
    r"(?i)(char\(|ascii\(|substring\(|length\(|version\()",
    r"(?i)(0x[0-9a-f]+)|(\\x[0-9a-f]+)",
    r"(?i)(\bwaitfor\b|\bdelay\b)",
];

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--.*$").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SUBQUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*SELECT\b").unwrap());
static JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bJOIN\b").unwrap());
static PROCEDURE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(CALL|EXEC|EXECUTE)\b").unwrap());

/// SQL query classifier and sanitizer
#[derive(Debug)]
pub struct QueryRiskClassifier {
    injection_patterns: Vec<Regex>,
    keyword_patterns: Vec<(&'static str, Regex)>,
}

impl QueryRiskClassifier {
    pub fn new() -> Self {
        let injection_patterns = INJECTION_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("injection pattern must compile"))
            .collect();
        let keyword_patterns = DANGEROUS_KEYWORDS
            .iter()
            .map(|kw| {
                let pattern = Regex::new(&format!(r"\b{kw}\b")).expect("keyword pattern must compile");
                (*kw, pattern)
            })
            .collect();
        Self {
            injection_patterns,
            keyword_patterns,
        }
    }

    /// Classify one query string.
    ///
    /// With `allow_modifications` set, dangerous operations become
    /// warnings that require explicit confirmation instead of blocking
    /// issues.
    pub fn classify(&self, query: &str, allow_modifications: bool) -> QueryValidation {
        if query.trim().is_empty() {
            return QueryValidation {
                is_valid: false,
                risk_level: RiskLevel::Safe,
                issues: vec!["Query cannot be empty".to_string()],
                warnings: Vec::new(),
                sanitized_query: None,
                requires_confirmation: false,
            };
        }

        let query = query.trim();
        let normalized = normalize(query);
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut risk_level = RiskLevel::Safe;
        let mut requires_confirmation = false;

        let injection_issues = self.check_injection(query, &normalized);
        if !injection_issues.is_empty() {
            issues.extend(injection_issues);
            risk_level = RiskLevel::Dangerous;
        }

        let dangerous_ops = self.check_dangerous_operations(&normalized);
        if !dangerous_ops.is_empty() {
            if allow_modifications {
                warnings.extend(dangerous_ops);
                risk_level = risk_level.max(RiskLevel::High);
                requires_confirmation = true;
            } else {
                issues.extend(dangerous_ops);
                risk_level = RiskLevel::Dangerous;
            }
        }

        let schema_warnings = check_protected_schemas(&normalized);
        if !schema_warnings.is_empty() {
            warnings.extend(schema_warnings);
            risk_level = risk_level.max(RiskLevel::Medium);
        }

        let complexity_warnings = check_complexity(&normalized);
        if !complexity_warnings.is_empty() {
            warnings.extend(complexity_warnings);
            risk_level = risk_level.max(RiskLevel::Low);
        }

        let is_valid = issues.is_empty();
        let sanitized_query = if is_valid { Some(sanitize(query)) } else { None };

        tracing::debug!(
            is_valid,
            risk_level = risk_level.as_str(),
            issues = issues.len(),
            warnings = warnings.len(),
            "query classification completed"
        );

        QueryValidation {
            is_valid,
            risk_level,
            issues,
            warnings,
            sanitized_query,
            requires_confirmation,
        }
    }

    fn check_injection(&self, raw: &str, normalized: &str) -> Vec<String> {
        let mut issues = Vec::new();

        for pattern in &self.injection_patterns {
            if pattern.is_match(normalized) {
                issues.push(format!(
                    "Potential SQL injection detected: {}",
                    pattern.as_str()
                ));
            }
        }

        if normalized.matches('\'').count() % 2 != 0 {
            issues.push("Unmatched single quotes detected".to_string());
        }

        // Checked on the raw text: normalization strips comments, and a
        // query carrying any comment marker is never accepted.
        if raw.contains("--") || raw.contains("/*") {
            issues.push("SQL comments detected - potential injection attempt".to_string());
        }

        issues
    }

    fn check_dangerous_operations(&self, normalized: &str) -> Vec<String> {
        let mut findings = Vec::new();

        for (keyword, pattern) in &self.keyword_patterns {
            if pattern.is_match(normalized) {
                findings.push(format!("Dangerous operation detected: {keyword}"));
            }
        }

        if normalized.trim_end_matches(';').contains(';') {
            findings.push("Multiple SQL statements detected".to_string());
        }

        if PROCEDURE_CALL.is_match(normalized) {
            findings.push("Stored procedure execution detected".to_string());
        }

        findings
    }

    /// Advisory suggestions for making a query safer. No side effects.
    pub fn suggest(&self, query: &str) -> Vec<String> {
        let normalized = normalize(query);
        let mut suggestions = Vec::new();

        if normalized.contains("SELECT") && !normalized.contains("LIMIT") {
            suggestions
                .push("Consider adding a LIMIT clause to prevent large result sets".to_string());
        }

        if (normalized.contains("UPDATE") || normalized.contains("DELETE"))
            && !normalized.contains("WHERE")
        {
            suggestions.push("Add a WHERE clause to limit the scope of the operation".to_string());
        }

        if query.contains('\'') {
            suggestions.push(
                "Consider using parameterized queries instead of string literals".to_string(),
            );
        }

        if normalized.contains("JOIN") || normalized.contains("UNION") {
            suggestions.push("Use EXPLAIN to analyze query performance".to_string());
        }

        suggestions
    }
}

impl Default for QueryRiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn check_protected_schemas(normalized: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    for schema in PROTECTED_SCHEMAS {
        if normalized.contains(&schema.to_uppercase()) {
            warnings.push(format!("Access to protected schema detected: {schema}"));
        }
    }
    warnings
}

fn check_complexity(normalized: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let subquery_count = SUBQUERY.find_iter(normalized).count();
    if subquery_count > 3 {
        warnings.push(format!(
            "High number of subqueries detected: {subquery_count}"
        ));
    }

    let join_count = JOIN.find_iter(normalized).count();
    if join_count > 5 {
        warnings.push(format!("High number of joins detected: {join_count}"));
    }

    if normalized.len() > 5000 {
        warnings.push("Very long query detected - may impact performance".to_string());
    }

    if normalized.contains("FROM")
        && normalized.contains(',')
        && !normalized.contains("WHERE")
        && !normalized.contains("JOIN")
    {
        warnings.push("Potential cartesian product detected - missing WHERE clause".to_string());
    }

    warnings
}

/// Strip comments, collapse whitespace, uppercase. Used only for pattern
/// matching, never returned to the caller as the executable query.
pub fn normalize(query: &str) -> String {
    let without_line = LINE_COMMENT.replace_all(query, "");
    let without_block = BLOCK_COMMENT.replace_all(&without_line, "");
    let collapsed = WHITESPACE.replace_all(&without_block, " ");
    collapsed.trim().to_uppercase()
}

/// Strip comments, collapse whitespace, and end with exactly one
/// semicolon. Idempotent.
pub fn sanitize(query: &str) -> String {
    let without_line = LINE_COMMENT.replace_all(query, "");
    let without_block = BLOCK_COMMENT.replace_all(&without_line, "");
    let collapsed = WHITESPACE.replace_all(&without_block, " ");
    let trimmed = collapsed.trim().trim_end_matches(';').trim_end();
    format!("{trimmed};")
}
