//! Authentication Module
//!
//! Multi-scheme credential resolver: static API key, bearer JWT, and
//! service-role key, tried in that order. Resolution never fails for
//! missing credentials; it produces an unauthenticated context instead.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};
use crate::security::threat::RequestMeta;

/// How a request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    Jwt,
    ServiceRole,
    #[default]
    None,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::ApiKey => write!(f, "api_key"),
            AuthMethod::Jwt => write!(f, "jwt"),
            AuthMethod::ServiceRole => write!(f, "service_role"),
            AuthMethod::None => write!(f, "none"),
        }
    }
}

/// A grantable capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

/// Capability set attached to an auth context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PermissionSet {
    pub read: bool,
    pub write: bool,
    pub admin: bool,
}

impl PermissionSet {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        admin: false,
    };
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        admin: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        admin: false,
    };
    pub const ALL: Self = Self {
        read: true,
        write: true,
        admin: true,
    };

    pub fn contains(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Admin => self.admin,
        }
    }

    /// Fixed role mapping. Unknown roles get nothing.
    pub fn for_role(role: &str) -> Self {
        match role {
            "anon" => Self::READ_ONLY,
            "authenticated" => Self::READ_WRITE,
            "service_role" => Self::ALL,
            _ => Self::NONE,
        }
    }
}

/// Result of authentication for one request. Created fresh per request
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub authenticated: bool,
    pub auth_method: AuthMethod,
    pub permissions: PermissionSet,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthContext {
    /// Explicitly unauthenticated context
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An unauthenticated context grants nothing, whatever its literal
    /// permission set says.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.authenticated && self.permissions.contains(permission)
    }
}

/// Credentials extracted from one request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub jwt_token: Option<String>,
    pub service_key: Option<String>,
}

impl Credentials {
    /// Extract every supported credential location from the request
    /// metadata: X-API-Key header or api_key query parameter, bearer
    /// Authorization or X-JWT-Token header, X-Service-Role-Key header.
    pub fn from_request(meta: &RequestMeta) -> Self {
        let api_key = meta
            .header("x-api-key")
            .map(str::to_string)
            .or_else(|| query_param(&meta.query_string, "api_key"));

        let jwt_token = meta
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")))
            .map(str::to_string)
            .or_else(|| meta.header("x-jwt-token").map(str::to_string));

        let service_key = meta.header("x-service-role-key").map(str::to_string);

        Self {
            api_key,
            jwt_token,
            service_key,
        }
    }
}

fn query_param(query_string: &str, name: &str) -> Option<String> {
    query_string.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name {
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// JWT claims accepted by the gateway. `sub` is required; everything
/// else is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

const TOKEN_CACHE_TTL_SECS: i64 = 5 * 60;
const TOKEN_CACHE_MAX_ENTRIES: usize = 1000;

/// Multi-scheme authenticator with a bounded TTL cache of validated
/// JWT contexts.
#[derive(Debug)]
pub struct Authenticator {
    api_key: String,
    service_role_key: String,
    decoding_key: DecodingKey,
    validation: Validation,
    token_cache: DashMap<String, (AuthContext, DateTime<Utc>)>,
}

impl Authenticator {
    pub fn new(api_key: String, service_role_key: String, jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is optional but enforced when present
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            api_key,
            service_role_key,
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            token_cache: DashMap::new(),
        }
    }

    /// Create a development authenticator
    pub fn development() -> Self {
        Self::new(
            "dev-api-key-change-in-production".to_string(),
            "dev-service-role-key".to_string(),
            "dev-jwt-secret-change-in-production",
        )
    }

    /// Resolve credentials to an auth context. First matching scheme
    /// wins; a failed match falls through to the next scheme; no scheme
    /// matching yields an unauthenticated context, never an error.
    pub fn authenticate(&self, meta: &RequestMeta) -> AuthContext {
        let credentials = Credentials::from_request(meta);

        if let Some(api_key) = &credentials.api_key {
            if let Some(context) = self.authenticate_api_key(api_key) {
                return context;
            }
        }

        if let Some(token) = &credentials.jwt_token {
            if let Some(context) = self.authenticate_jwt(token) {
                return context;
            }
        }

        if let Some(service_key) = &credentials.service_key {
            if let Some(context) = self.authenticate_service_key(service_key) {
                return context;
            }
        }

        tracing::debug!(client_ip = %meta.client_ip, "no valid authentication found");
        AuthContext::anonymous()
    }

    fn authenticate_api_key(&self, api_key: &str) -> Option<AuthContext> {
        if api_key.is_empty() || api_key != self.api_key {
            return None;
        }
        Some(AuthContext {
            subject: Some("api_user".to_string()),
            email: None,
            role: None,
            authenticated: true,
            auth_method: AuthMethod::ApiKey,
            permissions: PermissionSet::READ_WRITE,
            expires_at: None,
        })
    }

    fn authenticate_jwt(&self, token: &str) -> Option<AuthContext> {
        if token.is_empty() {
            return None;
        }

        if let Some(context) = self.cached_context(token) {
            return Some(context);
        }

        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "JWT rejected");
                return None;
            }
        };

        if claims.sub.is_empty() {
            return None;
        }

        let expires_at = claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp as i64, 0).single());
        if let Some(expiry) = expires_at {
            if expiry < Utc::now() {
                tracing::debug!("JWT expired");
                return None;
            }
        }

        let role = claims.role.unwrap_or_else(|| "authenticated".to_string());
        let context = AuthContext {
            subject: Some(claims.sub),
            email: claims.email,
            permissions: PermissionSet::for_role(&role),
            role: Some(role),
            authenticated: true,
            auth_method: AuthMethod::Jwt,
            expires_at,
        };

        self.cache_context(token, context.clone());
        Some(context)
    }

    fn authenticate_service_key(&self, service_key: &str) -> Option<AuthContext> {
        if service_key.is_empty() || service_key != self.service_role_key {
            return None;
        }
        Some(AuthContext {
            subject: Some("service_role".to_string()),
            email: None,
            role: Some("service_role".to_string()),
            authenticated: true,
            auth_method: AuthMethod::ServiceRole,
            permissions: PermissionSet::ALL,
            expires_at: None,
        })
    }

    fn cached_context(&self, token: &str) -> Option<AuthContext> {
        let entry = self.token_cache.get(token)?;
        let (context, cached_at) = entry.value();
        if (Utc::now() - *cached_at).num_seconds() < TOKEN_CACHE_TTL_SECS {
            Some(context.clone())
        } else {
            drop(entry);
            self.token_cache.remove(token);
            None
        }
    }

    fn cache_context(&self, token: &str, context: AuthContext) {
        self.token_cache
            .insert(token.to_string(), (context, Utc::now()));

        // Opportunistic eviction once the cache grows past its bound
        if self.token_cache.len() > TOKEN_CACHE_MAX_ENTRIES {
            let cutoff = Utc::now() - chrono::Duration::seconds(TOKEN_CACHE_TTL_SECS);
            self.token_cache.retain(|_, entry| entry.1 >= cutoff);
        }
    }

    pub fn cache_len(&self) -> usize {
        self.token_cache.len()
    }

    /// Fail unless the context is authenticated.
    pub fn require_authenticated(context: &AuthContext) -> Result<()> {
        if !context.authenticated {
            return Err(AppError::Authentication(
                "Authentication required".to_string(),
            ));
        }
        Ok(())
    }

    /// Fail unless the context is authenticated and holds `permission`.
    pub fn require_permission(context: &AuthContext, permission: Permission) -> Result<()> {
        Self::require_authenticated(context)?;
        if !context.has_permission(permission) {
            return Err(AppError::Authorization(format!(
                "Permission '{permission}' required"
            )));
        }
        Ok(())
    }

    /// Fail unless the context is authenticated and holds exactly `role`.
    pub fn require_role(context: &AuthContext, role: &str) -> Result<()> {
        Self::require_authenticated(context)?;
        if context.role.as_deref() != Some(role) {
            return Err(AppError::Authorization(format!("Role '{role}' required")));
        }
        Ok(())
    }
}
