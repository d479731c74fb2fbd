//! Admission Pipeline
//!
//! Composition root gating every inbound tool call: threat scan, then
//! rate limit, then authentication, then (for SQL execution) query risk
//! classification. Rejections short-circuit before any downstream
//! collaborator is invoked.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::security::auth::{AuthContext, Authenticator};
use crate::security::query_guard::{QueryRiskClassifier, QueryValidation};
use crate::security::rate_limit::RateLimiter;
use crate::security::threat::{RequestMeta, ThreatScanner};

/// Outcome of screening a SQL query through the classifier
#[derive(Debug, Clone)]
pub enum QueryAdmission {
    /// Safe to run. `query` is the text to execute (sanitized when
    /// available, otherwise the original).
    Execute {
        query: String,
        validation: QueryValidation,
    },
    /// Risky but allowed; the caller must re-submit with a force flag.
    NeedsConfirmation { validation: QueryValidation },
}

/// The admission pipeline. One instance per process, shared by every
/// request handler.
#[derive(Debug)]
pub struct AdmissionPipeline {
    scanner: ThreatScanner,
    rate_limiter: Arc<RateLimiter>,
    authenticator: Arc<Authenticator>,
    classifier: QueryRiskClassifier,
    query_validation_enabled: bool,
}

impl AdmissionPipeline {
    pub fn new(
        scanner: ThreatScanner,
        rate_limiter: Arc<RateLimiter>,
        authenticator: Arc<Authenticator>,
        classifier: QueryRiskClassifier,
        query_validation_enabled: bool,
    ) -> Self {
        Self {
            scanner,
            rate_limiter,
            authenticator,
            classifier,
            query_validation_enabled,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn classifier(&self) -> &QueryRiskClassifier {
        &self.classifier
    }

    /// Run the request-level checks. The threat scan is observational
    /// and never affects the outcome; a rate-limit rejection aborts the
    /// request before authentication runs.
    pub fn admit(&self, meta: &RequestMeta) -> Result<AuthContext> {
        self.scanner.scan(meta);

        self.rate_limiter
            .check(meta.client_ip)
            .map_err(AppError::from)?;

        Ok(self.authenticator.authenticate(meta))
    }

    /// Screen a SQL query after `admit` has passed. Invalid queries are
    /// rejected with the full issue list; confirmation-required queries
    /// come back as a non-error outcome unless `force_execute` is set.
    pub fn screen_query(&self, query: &str, force_execute: bool) -> Result<QueryAdmission> {
        if !self.query_validation_enabled {
            return Ok(QueryAdmission::Execute {
                query: query.to_string(),
                validation: QueryValidation {
                    is_valid: true,
                    risk_level: crate::security::query_guard::RiskLevel::Safe,
                    issues: Vec::new(),
                    warnings: Vec::new(),
                    sanitized_query: None,
                    requires_confirmation: false,
                },
            });
        }

        let validation = self.classifier.classify(query, true);

        if !validation.is_valid {
            tracing::warn!(
                risk_level = validation.risk_level.as_str(),
                issues = ?validation.issues,
                "query rejected by risk classifier"
            );
            return Err(AppError::QueryRejected {
                issues: validation.issues,
            });
        }

        if validation.requires_confirmation && !force_execute {
            return Ok(QueryAdmission::NeedsConfirmation { validation });
        }

        let query = validation
            .sanitized_query
            .clone()
            .unwrap_or_else(|| query.to_string());
        Ok(QueryAdmission::Execute { query, validation })
    }
}
