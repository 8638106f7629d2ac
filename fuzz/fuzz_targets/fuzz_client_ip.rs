//! Fuzz testing for client IP resolution and anonymization.
//!
//! Both functions take attacker-controlled input (forwarding headers) and
//! must never panic.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_client_ip -- -max_total_time=60
//! ```
//!
//! Checks on every input:
//! - `anonymize` output is stable across calls
//! - a non-IP input anonymizes to a 64-character hex digest
//! - `resolve_client_ip` accepts any header value

#![no_main]

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use site_backend::anonymize::anonymize;
use site_backend::middleware::{TrustedProxyConfig, resolve_client_ip};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let first = anonymize(s);
    assert_eq!(first, anonymize(s));
    if s.parse::<IpAddr>().is_err() {
        assert_eq!(first.len(), 64);
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(s) {
        headers.insert("x-forwarded-for", value.clone());
        headers.insert("x-real-ip", value);
    }
    let peer = Some(SocketAddr::from(([10, 0, 0, 1], 4242)));

    let _ = resolve_client_ip(&headers, peer, &TrustedProxyConfig::default());
    let _ = resolve_client_ip(
        &headers,
        peer,
        &TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]),
    );
});
