//! Rate Limiting Module
//!
//! Per-client-IP sliding window with escalating, time-boxed blocking.
//! All checks are in-memory; no suspension points on the request path.

use crate::error::RateLimitKind;
use crate::security::events::{SecurityEvent, SecurityEventLog, Severity};
use chrono::{DateTime, Duration, Utc};
use ipnet::IpNet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests_per_window: u32,
    /// Window size in seconds
    pub window_seconds: u64,
    /// Window-exceeded events before an IP is blocked
    pub max_violations_before_block: u32,
    /// Block duration in seconds
    pub block_duration_seconds: u64,
    /// CIDR ranges exempt from limiting
    pub trusted_networks: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 100,
            window_seconds: 60,
            max_violations_before_block: 5,
            block_duration_seconds: 15 * 60,
            trusted_networks: vec![
                "127.0.0.0/8".to_string(),
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
        }
    }
}


/// Rejection from a rate limit check. Both variants carry the number of
/// seconds the caller should wait before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Request count exceeded the window limit
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    Limited { retry_after_secs: u64 },
    /// Client is inside a block period
    #[error("client blocked, retry after {retry_after_secs}s")]
    Blocked { retry_after_secs: u64 },
}

impl RateLimitError {
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            RateLimitError::Limited { retry_after_secs }
            | RateLimitError::Blocked { retry_after_secs } => *retry_after_secs,
        }
    }

    pub fn kind(&self) -> RateLimitKind {
        match self {
            RateLimitError::Limited { .. } => RateLimitKind::Limited,
            RateLimitError::Blocked { .. } => RateLimitKind::Blocked,
        }
    }
}

impl From<RateLimitError> for crate::error::AppError {
    fn from(e: RateLimitError) -> Self {
        crate::error::AppError::RateLimited {
            kind: e.kind(),
            retry_after: e.retry_after_secs(),
        }
    }
}

/// Per-IP tracking state. Mutated only under the limiter's lock.
#[derive(Debug, Clone, Default)]
struct ClientRecord {
    /// Request timestamps within the window, oldest first
    requests: VecDeque<DateTime<Utc>>,
    total_requests: u64,
    violations: u32,
    first_request: Option<DateTime<Utc>>,
    last_request: Option<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LimiterState {
    records: HashMap<IpAddr, ClientRecord>,
    blocked: HashSet<IpAddr>,
}

/// Read-only snapshot of the limiter's aggregate state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub active_clients: usize,
    pub blocked_clients: usize,
    pub max_requests_per_window: u32,
    pub window_seconds: u64,
    pub block_duration_seconds: u64,
    pub events: crate::security::events::EventStats,
}

/// Per-client snapshot exposed on the security endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub client_ip: String,
    pub requests_in_window: usize,
    pub total_requests: u64,
    pub violations: u32,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// In-memory sliding-window rate limiter keyed by client IP
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    trusted: Vec<IpNet>,
    state: Mutex<LimiterState>,
    events: Arc<SecurityEventLog>,
}

impl RateLimiter {
    /// Create new rate limiter. Unparseable trusted-network entries are
    /// skipped with a warning rather than failing startup.
    pub fn new(config: RateLimitConfig, events: Arc<SecurityEventLog>) -> Self {
        let trusted = config
            .trusted_networks
            .iter()
            .filter_map(|s| match s.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => match s.parse::<IpAddr>() {
                    Ok(ip) => Some(IpNet::from(ip)),
                    Err(_) => {
                        tracing::warn!(network = %s, "skipping unparseable trusted network");
                        None
                    }
                },
            })
            .collect();

        Self {
            config,
            trusted,
            state: Mutex::new(LimiterState::default()),
            events,
        }
    }

    /// IPs inside a trusted range always pass and are never tracked.
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted.iter().any(|net| net.contains(&ip))
    }

    /// Check the limit for one request. Mutation of the record is atomic
    /// with respect to concurrent requests from the same IP.
    pub fn check(&self, client_ip: IpAddr) -> Result<(), RateLimitError> {
        self.check_at(client_ip, Utc::now())
    }

    /// Check at an explicit instant. Exposed for deterministic tests.
    pub fn check_at(&self, client_ip: IpAddr, now: DateTime<Utc>) -> Result<(), RateLimitError> {
        if self.is_trusted(client_ip) {
            return Ok(());
        }

        let mut state = self.state.lock();

        if state.blocked.contains(&client_ip) {
            let remaining = state
                .records
                .get(&client_ip)
                .and_then(|r| r.blocked_until)
                .map(|until| (until - now).num_seconds().max(0) as u64)
                .unwrap_or(self.config.block_duration_seconds);
            drop(state);
            self.events.record(SecurityEvent::new(
                &client_ip.to_string(),
                "blocked_request",
                "request from blocked client",
                Severity::Medium,
            ));
            return Err(RateLimitError::Blocked {
                retry_after_secs: remaining,
            });
        }

        let record = state.records.entry(client_ip).or_default();

        if let Some(until) = record.blocked_until {
            if until > now {
                let remaining = (until - now).num_seconds().max(0) as u64;
                drop(state);
                self.events.record(SecurityEvent::new(
                    &client_ip.to_string(),
                    "rate_limit_blocked",
                    "request during active block period",
                    Severity::Low,
                ));
                return Err(RateLimitError::Limited {
                    retry_after_secs: remaining,
                });
            }
            record.blocked_until = None;
        }

        let window_start = now - Duration::seconds(self.config.window_seconds as i64);
        while let Some(front) = record.requests.front() {
            if *front <= window_start {
                record.requests.pop_front();
            } else {
                break;
            }
        }

        if record.requests.len() >= self.config.max_requests_per_window as usize {
            record.violations += 1;
            let violations = record.violations;
            let mut now_blocked = false;

            if violations >= self.config.max_violations_before_block {
                record.blocked_until =
                    Some(now + Duration::seconds(self.config.block_duration_seconds as i64));
                state.blocked.insert(client_ip);
                now_blocked = true;
            }
            drop(state);

            if now_blocked {
                self.events.record(SecurityEvent::new(
                    &client_ip.to_string(),
                    "ip_blocked",
                    &format!("blocked after {violations} rate limit violations"),
                    Severity::High,
                ));
            }
            self.events.record(SecurityEvent::new(
                &client_ip.to_string(),
                "rate_limit_exceeded",
                &format!(
                    "exceeded {} requests per {}s window",
                    self.config.max_requests_per_window, self.config.window_seconds
                ),
                Severity::Medium,
            ));

            return Err(RateLimitError::Limited {
                retry_after_secs: self.config.window_seconds,
            });
        }

        record.requests.push_back(now);
        record.total_requests += 1;
        record.last_request = Some(now);
        if record.first_request.is_none() {
            record.first_request = Some(now);
        }

        Ok(())
    }

    /// Drop stale timestamps and records, and lift expired blocks.
    /// Called by the background sweep task; safe to call any time.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        let mut state = self.state.lock();

        let mut unblocked = Vec::new();
        state.records.retain(|ip, record| {
            while let Some(front) = record.requests.front() {
                if *front <= cutoff {
                    record.requests.pop_front();
                } else {
                    break;
                }
            }

            if let Some(until) = record.blocked_until {
                if until <= now {
                    record.blocked_until = None;
                    record.violations = 0;
                    unblocked.push(*ip);
                }
            }

            let idle = record.last_request.map(|t| t <= cutoff).unwrap_or(true);
            !(record.requests.is_empty() && idle && record.blocked_until.is_none())
        });

        for ip in &unblocked {
            state.blocked.remove(ip);
        }

        if !unblocked.is_empty() {
            tracing::info!(count = unblocked.len(), "lifted expired client blocks");
        }
    }

    /// Spawn the 5-minute reclamation sweep. The returned handle is
    /// aborted on shutdown.
    pub fn start_sweep_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.sweep();
            }
        })
    }

    /// Read-only aggregate snapshot
    pub fn stats(&self) -> RateLimitStats {
        let state = self.state.lock();
        RateLimitStats {
            active_clients: state.records.len(),
            blocked_clients: state.blocked.len(),
            max_requests_per_window: self.config.max_requests_per_window,
            window_seconds: self.config.window_seconds,
            block_duration_seconds: self.config.block_duration_seconds,
            events: self.events.stats(),
        }
    }

    /// Per-client snapshot, if the IP is tracked
    pub fn client_stats(&self, client_ip: IpAddr) -> Option<ClientStats> {
        let state = self.state.lock();
        state.records.get(&client_ip).map(|record| ClientStats {
            client_ip: client_ip.to_string(),
            requests_in_window: record.requests.len(),
            total_requests: record.total_requests,
            violations: record.violations,
            first_request: record.first_request,
            last_request: record.last_request,
            blocked_until: record.blocked_until,
        })
    }

    pub fn blocked_count(&self) -> usize {
        self.state.lock().blocked.len()
    }

    /// Clear all state (for tests and admin resets)
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.blocked.clear();
    }
}
