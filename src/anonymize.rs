//! Privacy-preserving IP anonymization.
//!
//! Stored analytics never carry a full client address. Addresses are degraded
//! deterministically so that rows from the same network still group together:
//!
//! | Input            | Output                                   |
//! |------------------|------------------------------------------|
//! | IPv4 `a.b.c.d`   | `a.b.c.0`                                |
//! | `::ffff:a.b.c.d` | `::ffff:a.b.c.0`                         |
//! | other IPv6       | `/48` prefix, low 80 bits zeroed         |
//! | anything else    | SHA-256 hex digest of the raw input      |
//!
//! IPv4-mapped IPv6 addresses (what a dual-stack listener reports for IPv4
//! clients) are truncated like IPv4 and keep their mapped form.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use sha2::{Digest, Sha256};

/// Number of leading IPv6 bits kept by [`anonymize`].
pub const IPV6_PREFIX_BITS: u32 = 48;

/// Anonymize a client IP for storage.
///
/// Pure and deterministic: the same input always yields the same output.
/// Never fails; unparseable input (including the empty string) is hashed.
pub fn anonymize(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => truncate_v4(v4).to_string(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => truncate_v4(v4).to_ipv6_mapped().to_string(),
            None => truncate_v6(v6).to_string(),
        },
        Err(_) => hash_ip(ip),
    }
}

/// SHA-256 hex digest (64 lowercase hex characters) of the raw input.
pub fn hash_ip(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn truncate_v4(addr: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = addr.octets();
    Ipv4Addr::new(a, b, c, 0)
}

fn truncate_v6(addr: Ipv6Addr) -> Ipv6Addr {
    let mask = u128::MAX << (128 - IPV6_PREFIX_BITS);
    Ipv6Addr::from(u128::from(addr) & mask)
}
