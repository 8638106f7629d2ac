use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for event names.
///
/// Format recommendation: `domain.action` (e.g., `newsletter.subscribed`)
pub const MAX_EVENT_NAME_LENGTH: usize = 256;

/// Maximum length for tracked paths and referrers.
pub const MAX_PATH_LENGTH: usize = 2048;

/// Maximum length for a client-generated analytics session id.
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// Maximum length for login identifiers (username or email).
pub const MAX_LOGIN_LENGTH: usize = 254;

/// Validate login input.
///
/// Both fields must be present after trimming the identifier. The password is
/// taken verbatim.
pub fn validate_login(login: &str, password: &str) -> AppResult<()> {
    if login.trim().is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    if login.len() > MAX_LOGIN_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Username cannot exceed {MAX_LOGIN_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validate an analytics event name.
///
/// Rules:
/// - Must be between 1 and 256 characters
/// - Must not contain control characters
pub fn validate_event_name(event_name: &str) -> AppResult<()> {
    if event_name.is_empty() {
        return Err(AppError::BadRequest(
            "event_name is required".to_string(),
        ));
    }

    if event_name.len() > MAX_EVENT_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "event_name cannot exceed {} characters (got {})",
            MAX_EVENT_NAME_LENGTH,
            event_name.len()
        )));
    }

    if let Some(pos) = event_name.chars().position(|c| c.is_control()) {
        return Err(AppError::BadRequest(format!(
            "event_name contains invalid control character at position {pos}"
        )));
    }

    Ok(())
}

/// Validate the client-generated session id attached to events.
pub fn validate_session_id(session_id: &str) -> AppResult<()> {
    if session_id.is_empty() {
        return Err(AppError::BadRequest("session_id is required".to_string()));
    }

    if session_id.len() > MAX_SESSION_ID_LENGTH {
        return Err(AppError::BadRequest(format!(
            "session_id cannot exceed {MAX_SESSION_ID_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validate a tracked page path.
///
/// Must be absolute (`/...`) and reasonably short.
pub fn validate_path(path: &str) -> AppResult<()> {
    if !path.starts_with('/') {
        return Err(AppError::BadRequest(
            "path must start with '/'".to_string(),
        ));
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(AppError::BadRequest(format!(
            "path cannot exceed {MAX_PATH_LENGTH} characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_login() {
        assert!(validate_login("admin", "hunter2").is_ok());
        assert!(validate_login("admin@example.com", " spaces ok ").is_ok());
    }

    #[test]
    fn test_login_missing_fields() {
        for (login, password) in [("", "pw"), ("   ", "pw"), ("admin", "")] {
            let result = validate_login(login, password);
            assert!(result.unwrap_err().to_string().contains("required"));
        }
    }

    #[test]
    fn test_login_too_long() {
        let result = validate_login(&"a".repeat(255), "pw");
        assert!(result.unwrap_err().to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_valid_event_names() {
        assert!(validate_event_name("newsletter.subscribed").is_ok());
        assert!(validate_event_name("a").is_ok());
        assert!(validate_event_name("UPPERCASE_EVENT").is_ok());
        assert!(validate_event_name("event-with-dashes").is_ok());
    }

    #[test]
    fn test_empty_event_name() {
        let result = validate_event_name("");
        assert!(result.unwrap_err().to_string().contains("required"));
    }

    #[test]
    fn test_event_name_too_long() {
        let result = validate_event_name(&"a".repeat(257));
        assert!(result.unwrap_err().to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_event_name_control_characters() {
        let result = validate_event_name("event\nwith\nnewlines");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("control character")
        );
    }

    #[test]
    fn test_session_id() {
        assert!(validate_session_id("b6f1c0de").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/blog/post?x=1").is_ok());
        assert!(validate_path("blog").is_err());
        assert!(validate_path("").is_err());
        assert!(validate_path(&format!("/{}", "a".repeat(2048))).is_err());
    }
}
