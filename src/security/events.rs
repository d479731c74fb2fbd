//! Security Event Log
//!
//! Bounded in-memory log of detected anomalies, shared by the rate
//! limiter and the threat scanner.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Severity tier for a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One detected anomaly. Read-only after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    /// Open string enum: suspicious_user_agent, sql_injection_attempt,
    /// xss_attempt, path_traversal_attempt, rate_limit_exceeded,
    /// ip_blocked, blocked_request, rate_limit_blocked, ip_spoofing, ...
    pub event_type: String,
    pub details: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl SecurityEvent {
    pub fn new(client_ip: &str, event_type: &str, details: &str, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now(),
            client_ip: client_ip.to_string(),
            event_type: event_type.to_string(),
            details: details.to_string(),
            severity,
            user_agent: None,
            endpoint: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }
}

/// Aggregate view over the retained events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_last_hour: usize,
    pub events_last_day: usize,
    pub by_type: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// Bounded ring buffer of security events. Oldest entries evicted first.
#[derive(Debug)]
pub struct SecurityEventLog {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl SecurityEventLog {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when at capacity.
    pub fn record(&self, event: SecurityEvent) {
        tracing::warn!(
            client_ip = %event.client_ip,
            event_type = %event.event_type,
            severity = %event.severity.as_str(),
            details = %event.details,
            "security event"
        );

        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent `limit` events, newest last.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Windowed counts by type and severity.
    pub fn stats(&self) -> EventStats {
        let events = self.events.lock();
        let now = Utc::now();
        let hour_cutoff = now - Duration::hours(1);
        let day_cutoff = now - Duration::days(1);

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut events_last_hour = 0;
        let mut events_last_day = 0;

        for event in events.iter() {
            *by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            *by_severity
                .entry(event.severity.as_str().to_string())
                .or_insert(0) += 1;
            if event.timestamp > hour_cutoff {
                events_last_hour += 1;
            }
            if event.timestamp > day_cutoff {
                events_last_day += 1;
            }
        }

        EventStats {
            total_events: events.len(),
            events_last_hour,
            events_last_day,
            by_type,
            by_severity,
        }
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
