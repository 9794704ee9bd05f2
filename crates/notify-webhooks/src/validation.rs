//! Registration-time validation for endpoint URLs and event subscriptions.
//!
//! Validates endpoint URLs against:
//! - Protocol requirements (HTTPS unless plain HTTP is allowed)
//! - SSRF protections (private/internal IP ranges, cloud metadata endpoints)
//!
//! and subscribed event lists against the supported catalog.

use std::net::IpAddr;

use crate::error::WebhookError;
use crate::models::{WebhookEventType, WILDCARD_EVENT};

/// Which destinations registration accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlPolicy {
    /// Accept `http://` URLs (development/testing).
    pub allow_http: bool,
    /// Accept loopback, private and internal hostnames (development/testing).
    pub allow_internal_hosts: bool,
}

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Validate an endpoint delivery URL.
///
/// Checks:
/// 1. URL is parseable
/// 2. Scheme is HTTPS (or HTTP if allowed)
/// 3. Host is present and not a private/internal address (unless allowed)
pub fn validate_webhook_url(url: &str, policy: UrlPolicy) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Webhook URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !policy.allow_internal_hosts {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate that a host is not a private/internal address.
///
/// Blocks:
/// - Loopback addresses (127.0.0.0/8)
/// - Private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Link-local (169.254.0.0/16, cloud metadata endpoints)
/// - CGNAT (100.64.0.0/10)
/// - IPv6 loopback and unspecified
/// - Internal hostnames (localhost, *.internal, *.local)
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    // url::Url keeps IPv6 literals bracketed.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".internal") || lower.ends_with(".local") {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Event subscription validation
// ---------------------------------------------------------------------------

/// Validate a subscribed event list: non-empty, each entry `*` or a known event type.
pub fn validate_event_types(event_types: &[String]) -> Result<(), WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event type is required".to_string(),
        ));
    }

    for et in event_types {
        if et != WILDCARD_EVENT && WebhookEventType::parse(et).is_none() {
            return Err(WebhookError::Validation(format!(
                "Unknown event type: {et}"
            )));
        }
    }
    Ok(())
}

/// Sort and de-duplicate a subscribed event list; `*` subsumes everything else.
#[must_use]
pub fn normalize_event_types(event_types: Vec<String>) -> Vec<String> {
    if event_types.iter().any(|e| e == WILDCARD_EVENT) {
        return vec![WILDCARD_EVENT.to_string()];
    }
    let mut events = event_types;
    events.sort();
    events.dedup();
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
