//! Security Module
//!
//! The request-admission pipeline and its parts:
//! - Threat scanning (signature-based, observational)
//! - Rate limiting (sliding window with escalating blocks)
//! - Authentication (API key + JWT + service role)
//! - SQL query risk classification
//! - Security middleware and the shared event log

pub mod auth;
pub mod events;
pub mod middleware;
pub mod pipeline;
pub mod query_guard;
pub mod rate_limit;
pub mod threat;


pub use auth::{AuthContext, AuthMethod, Authenticator, Credentials, Permission, PermissionSet};
pub use events::{SecurityEvent, SecurityEventLog, Severity};
pub use pipeline::{AdmissionPipeline, QueryAdmission};
pub use query_guard::{QueryRiskClassifier, QueryValidation, RiskLevel};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use threat::{RequestMeta, ThreatScanner};
