//! Client IP resolution.
//!
//! Every request passes through [`ClientIpLayer`], which resolves the best
//! available client address once and stores it in the request extensions as
//! [`ClientIp`]. Downstream stages (analytics, rate limiting, login) read the
//! marker instead of re-deriving the address from headers, so all of them
//! agree on who the client is.
//!
//! # Precedence
//!
//! 1. `X-Forwarded-For` (first entry of a comma-separated list)
//! 2. `X-Real-IP`
//! 3. Transport peer address from `ConnectInfo<SocketAddr>` (host only, no port)
//! 4. Empty string when nothing is known
//!
//! # IP Spoofing
//!
//! Forwarding headers are client-controlled unless a reverse proxy overwrites
//! them. Configure `TRUSTED_PROXIES` with the proxy's CIDR ranges and the
//! headers are honoured only when the transport peer is inside one of them.
//! With no ranges configured every peer is trusted.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Request-scoped marker holding the resolved client IP.
///
/// The value may be empty when no address could be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Handlers get the marker, or a trust-all resolution when it is missing.
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = parts.extensions.get::<ClientIp>()
            && !ip.0.is_empty()
        {
            return Ok(ip.clone());
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(resolve_client_ip(
            &parts.headers,
            peer,
            &TrustedProxyConfig::default(),
        )))
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR string (`10.0.0.0/8`, `::1/128`) or a bare address.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Peers whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings; invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether forwarding headers from `peer` should be honoured.
    ///
    /// Always true when no ranges are configured. An unknown peer is only
    /// trusted in that trust-all mode.
    pub fn trusts(&self, peer: Option<IpAddr>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.ranges.iter().any(|range| range.contains(&ip)))
    }
}

// =============================================================================
// Resolution
// =============================================================================

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}

fn real_ip(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("x-real-ip")?.to_str().ok()?.trim();
    (!value.is_empty()).then_some(value)
}

/// Resolve the client IP from headers and the transport address.
///
/// Never fails; returns an empty string when nothing is known.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &TrustedProxyConfig,
) -> String {
    let peer_ip = peer.map(|addr| addr.ip());

    if trusted_proxies.trusts(peer_ip) {
        if let Some(ip) = forwarded_for(headers) {
            return ip.to_string();
        }
        if let Some(ip) = real_ip(headers) {
            return ip.to_string();
        }
    } else if forwarded_for(headers).is_some() || real_ip(headers).is_some() {
        debug!(peer = ?peer_ip, "Ignoring forwarding headers from untrusted peer");
    }

    peer_ip.map(|ip| ip.to_string()).unwrap_or_default()
}

/// Transport peer address, when the server was started with connect info.
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// The resolved client IP, preferring the [`ClientIp`] marker.
///
/// Falls back to resolving from scratch (trusting all peers) when the
/// marker is missing or empty.
pub fn client_ip<B>(req: &Request<B>) -> String {
    match req.extensions().get::<ClientIp>() {
        Some(ClientIp(ip)) if !ip.is_empty() => ip.clone(),
        _ => resolve_client_ip(req.headers(), peer_addr(req), &TrustedProxyConfig::default()),
    }
}

// =============================================================================
// Layer
// =============================================================================

/// Resolves the client IP once and attaches it as [`ClientIp`].
#[derive(Clone, Default)]
pub struct ClientIpLayer {
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl ClientIpLayer {
    pub fn new(trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for ClientIpLayer {
    type Service = ClientIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientIpService {
            inner,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClientIpService<S> {
    inner: S,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S, B> Service<Request<B>> for ClientIpService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let ip = resolve_client_ip(req.headers(), peer_addr(&req), &self.trusted_proxies);
        // Overwrites anything an earlier layer may have inserted.
        req.extensions_mut().insert(ClientIp(ip));
        self.inner.call(req)
    }
}
