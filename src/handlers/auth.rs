//! Session login, logout and identity endpoints.
//!
//! # Endpoints
//!
//! - `POST /auth/login` - verify credentials, create a session, set the cookie
//! - `POST /auth/logout` - expire the session and clear the cookie
//! - `GET {protected}/me` - identity attached by the auth gate
//!
//! # Brute Force Protection
//!
//! Login attempts are throttled per client IP (10/minute, burst 5) before
//! credentials are looked at, so a throttled client learns nothing about
//! whether its guess was right. Stored passwords are bcrypt hashes.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::middleware::auth::{AuthRejection, session_id};
use crate::middleware::{ClientIp, CurrentUser, SESSION_COOKIE};
use crate::models::{LoginRequest, LoginResponse, LogoutResponse, MeResponse};
use crate::password::verify_password;
use crate::state::AppState;
use crate::store::NewSession;
use crate::validation::validate_login;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Log in with username (or email) and password.
///
/// # Response
///
/// `200` with `Set-Cookie: session_id=...` and
///
/// ```json
/// { "success": true, "user_id": 1, "username": "admin" }
/// ```
///
/// `400` on empty input, `401` on bad credentials, `429` when throttled,
/// `500` when the store fails.
#[instrument(skip_all, fields(client_ip = %ip))]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<Response> {
    if let Err(not_until) = state.login_limiter.check_key(&ip) {
        let retry_after = not_until
            .wait_time_from(DefaultClock::default().now())
            .as_secs()
            .max(1);
        warn!(retry_after_secs = retry_after, "Login throttled");
        return Err(AppError::TooManyRequests {
            retry_after_secs: retry_after,
        });
    }

    validate_login(&body.username, &body.password)?;
    let login = body.username.trim();

    let user = state
        .stores
        .users
        .find_credentials(login)
        .await
        .map_err(|e| {
            error!(error = %e, "Credential lookup failed");
            AppError::Internal("credential lookup failed".to_string())
        })?
        .ok_or_else(|| {
            warn!("Login failed: unknown user");
            AppError::Unauthorized(INVALID_CREDENTIALS.to_string())
        })?;

    // bcrypt is CPU-bound; run it on the blocking pool
    let verified = match user.password_hash.clone() {
        Some(hash) => {
            let password = body.password.clone();
            tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                .await
                .map_err(|e| {
                    error!(error = %e, "Password verification task failed");
                    AppError::Internal("password verification failed".to_string())
                })?
        }
        None => false,
    };
    if !verified {
        warn!(user_id = user.id, "Login failed: bad password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    let ttl = state.config.session_ttl;
    let expires_at = Utc::now()
        + chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Internal(format!("session ttl out of range: {e}")))?;

    let session = state
        .stores
        .sessions
        .create_session(NewSession {
            user_id: Some(user.id),
            ip_address: (!ip.is_empty()).then(|| ip.clone()),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            expires_at,
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Session creation failed");
            AppError::Internal("session creation failed".to_string())
        })?;

    info!(user_id = user.id, "User logged in");

    let cookie = session_cookie(
        session.id,
        ttl,
        session.expires_at,
        state.config.session_cookie_secure,
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            success: true,
            user_id: user.id,
            username: user.username,
        }),
    )
        .into_response())
}

/// Log out the current session.
///
/// Expiry failures are logged; the cookie is cleared regardless.
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let id = session_id(&headers).map_err(|rejection| match rejection {
        AuthRejection::InvalidCookie => AppError::BadRequest("Invalid session".to_string()),
        _ => AppError::Unauthorized("Authentication required".to_string()),
    })?;

    match state.stores.sessions.expire_session(id).await {
        Ok(()) => info!(session_id = %id, "Session expired by logout"),
        Err(e) => debug!(session_id = %id, error = %e, "Could not expire session on logout"),
    }

    let cookie = cleared_cookie(state.config.session_cookie_secure);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(LogoutResponse { success: true }),
    )
        .into_response())
}

/// Identity of the authenticated caller.
///
/// ```json
/// { "user_id": 1 }
/// ```
pub async fn me(CurrentUser(user_id): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse { user_id })
}

/// `Set-Cookie` value for a freshly created session.
pub fn session_cookie(id: Uuid, ttl: Duration, expires_at: DateTime<Utc>, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}; Expires={}",
        ttl.as_secs(),
        expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
    );
    if secure {
        cookie.push_str("; Secure");
    }
    // Only ASCII from a UUID, integers and an RFC 7231 date.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `Set-Cookie` value deleting the session cookie.
pub fn cleared_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "session_id=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Secure",
        )
    } else {
        HeaderValue::from_static(
            "session_id=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let id = Uuid::nil();
        let expires = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let cookie = session_cookie(id, Duration::from_secs(86_400), expires, false);
        let cookie = cookie.to_str().unwrap();

        assert!(cookie.starts_with("session_id=00000000-0000-0000-0000-000000000000;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(cookie.contains("Expires=Wed, 02 Jan 2030 03:04:05 GMT"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_secure_flag() {
        let cookie = session_cookie(Uuid::nil(), Duration::from_secs(60), Utc::now(), true);
        assert!(cookie.to_str().unwrap().ends_with("; Secure"));
        assert!(cleared_cookie(true).to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn test_cleared_cookie_expires_immediately() {
        let cookie = cleared_cookie(false);
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("session_id=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
