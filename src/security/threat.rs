//! Threat Scanner
//!
//! Signature-based inspection of request metadata. Purely observational:
//! the scanner never blocks a request, it only emits security events.

use crate::security::events::{SecurityEvent, SecurityEventLog, Severity};
use std::net::IpAddr;
use std::sync::Arc;

/// Metadata of one inbound request, captured before any handler runs.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub client_ip: IpAddr,
    pub user_agent: Option<String>,
    /// Lower-cased header names paired with raw values
    pub headers: Vec<(String, String)>,
    pub path: String,
    pub query_string: String,
}

impl RequestMeta {
    pub fn new(client_ip: IpAddr) -> Self {
        Self {
            client_ip,
            user_agent: None,
            headers: Vec::new(),
            path: String::new(),
            query_string: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

const SUSPICIOUS_USER_AGENTS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "zap", "burp", "bot", "crawler", "spider", "scraper",
];

/// Spoofable proxy headers paired with the event type a long proxy
/// chain in them produces.
const SUSPICIOUS_HEADERS: &[(&str, &str)] = &[
    ("x-forwarded-for", "potential_proxy_abuse"),
    ("x-real-ip", "potential_ip_spoofing"),
    ("x-originating-ip", "potential_ip_spoofing"),
    ("x-remote-ip", "potential_ip_spoofing"),
    ("x-cluster-client-ip", "potential_ip_spoofing"),
];

const SQL_URL_PATTERNS: &[&str] = &[
    "union select",
    "drop table",
    "insert into",
    "delete from",
    "update set",
    "exec(",
    "execute(",
    "sp_",
    "xp_",
    "0x",
    "char(",
    "ascii(",
    "substring(",
    "waitfor delay",
];

const XSS_URL_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "onload=",
    "onerror=",
    "onclick=",
    "eval(",
    "alert(",
    "document.cookie",
    "window.location",
];

const TRAVERSAL_URL_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e%2f",
    "%2e%2e%5c",
    "....//",
    "....\\\\",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows",
    "c:/windows",
];

/// Signature scanner over request metadata
#[derive(Debug)]
pub struct ThreatScanner {
    events: Arc<SecurityEventLog>,
}

impl ThreatScanner {
    pub fn new(events: Arc<SecurityEventLog>) -> Self {
        Self { events }
    }

    /// Scan one request. Each signature family is checked independently;
    /// all of them may fire for the same request.
    pub fn scan(&self, meta: &RequestMeta) {
        self.scan_user_agent(meta);
        self.scan_headers(meta);
        self.scan_url(meta);
    }

    fn scan_user_agent(&self, meta: &RequestMeta) {
        let Some(user_agent) = meta.user_agent.as_deref() else {
            return;
        };
        let lowered = user_agent.to_lowercase();
        for signature in SUSPICIOUS_USER_AGENTS {
            if lowered.contains(signature) {
                self.emit(
                    meta,
                    "suspicious_user_agent",
                    &format!("suspicious user agent detected: {lowered}"),
                    Severity::Medium,
                );
                break;
            }
        }
    }

    fn scan_headers(&self, meta: &RequestMeta) {
        for (header, event_type) in SUSPICIOUS_HEADERS {
            if let Some(value) = meta.header(header) {
                // More than 3 comma-separated values suggests a forged
                // proxy chain.
                if value.contains(',') && value.split(',').count() > 3 {
                    self.emit(
                        meta,
                        event_type,
                        &format!("suspicious header {header}: {value}"),
                        Severity::Low,
                    );
                }
            }
        }
    }

    fn scan_url(&self, meta: &RequestMeta) {
        let full_url = format!(
            "{} {}",
            meta.path.to_lowercase(),
            meta.query_string.to_lowercase()
        );

        let families: &[(&[&str], &str, &str)] = &[
            (SQL_URL_PATTERNS, "sql_injection_attempt", "SQL injection"),
            (XSS_URL_PATTERNS, "xss_attempt", "XSS"),
            (
                TRAVERSAL_URL_PATTERNS,
                "path_traversal_attempt",
                "path traversal",
            ),
        ];

        for (patterns, event_type, label) in families {
            for pattern in *patterns {
                if full_url.contains(pattern) {
                    self.emit(
                        meta,
                        event_type,
                        &format!("{label} pattern detected: {pattern}"),
                        Severity::High,
                    );
                    break;
                }
            }
        }
    }

    fn emit(&self, meta: &RequestMeta, event_type: &str, details: &str, severity: Severity) {
        let mut event = SecurityEvent::new(&meta.client_ip.to_string(), event_type, details, severity)
            .with_endpoint(&meta.path);
        if let Some(user_agent) = &meta.user_agent {
            event = event.with_user_agent(user_agent);
        }
        self.events.record(event);
    }
}
