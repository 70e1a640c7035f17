//! Access-token storage in the OS keyring.

use keyring::Entry;

use crate::error::SyncError;

const ANILIST_SERVICE_NAME: &str = "mangasync.anilist";
const ANILIST_TOKEN_USER: &str = "access-token";
pub const ACCESS_TOKEN_ENV: &str = "ANILIST_ACCESS_TOKEN";

fn anilist_entry() -> Result<Entry, String> {
    Entry::new(ANILIST_SERVICE_NAME, ANILIST_TOKEN_USER)
        .map_err(|err| format!("failed to create keyring entry for the AniList token: {err}"))
}

fn keyring_error_hint(error: &str) -> Option<String> {
    if error.contains("org.freedesktop.DBus.Error.ServiceUnknown") {
        return Some(
            "no Secret Service provider is available. Start GNOME Keyring or KeePassXC Secret Service, or pass the token through ANILIST_ACCESS_TOKEN."
                .to_string(),
        );
    }
    None
}

fn format_keyring_error(operation: &str, error: &str) -> String {
    let base = format!("{operation} failed in system keyring: {error}");
    match keyring_error_hint(error) {
        Some(hint) => format!("{base}. Hint: {hint}"),
        None => base,
    }
}

/// Saves the AniList access token into the OS keyring.
pub fn set_access_token(token: &str) -> Result<(), SyncError> {
    let entry = anilist_entry().map_err(SyncError::Credentials)?;
    entry.set_password(token.trim()).map_err(|err| {
        let detail = format!("failed to set keyring password: {err}");
        SyncError::Credentials(format_keyring_error("save AniList token", &detail))
    })
}

/// Loads the AniList access token from the OS keyring.
pub fn get_access_token() -> Result<Option<String>, SyncError> {
    let entry = anilist_entry().map_err(SyncError::Credentials)?;
    match entry.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            let detail = format!("failed to get keyring password: {err}");
            Err(SyncError::Credentials(format_keyring_error(
                "load AniList token",
                &detail,
            )))
        }
    }
}

/// Removes the stored AniList access token. Missing entries are not an error.
pub fn clear_access_token() -> Result<(), SyncError> {
    let entry = anilist_entry().map_err(SyncError::Credentials)?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(err) => {
            let detail = format!("failed to delete keyring password: {err}");
            Err(SyncError::Credentials(format_keyring_error(
                "clear AniList token",
                &detail,
            )))
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Picks the token from the explicit flag, then the environment, then the keyring.
pub fn resolve_access_token_with<F>(
    explicit: Option<String>,
    environment: Option<String>,
    keyring_lookup: F,
) -> Result<String, SyncError>
where
    F: FnOnce() -> Result<Option<String>, SyncError>,
{
    if let Some(token) = non_blank(explicit).or_else(|| non_blank(environment)) {
        return Ok(token);
    }
    non_blank(keyring_lookup()?).ok_or(SyncError::MissingToken)
}

/// Resolves the run token using the process environment and the OS keyring.
pub fn resolve_access_token(explicit: Option<String>) -> Result<String, SyncError> {
    resolve_access_token_with(
        explicit,
        std::env::var(ACCESS_TOKEN_ENV).ok(),
        get_access_token,
    )
}

#[cfg(test)]
mod tests {
    use super::{keyring_error_hint, resolve_access_token_with};
    use crate::error::SyncError;

    #[test]
    fn test_explicit_token_wins() {
        let token = resolve_access_token_with(
            Some(" flag-token ".to_string()),
            Some("env-token".to_string()),
            || panic!("keyring should not be consulted"),
        )
        .expect("token");
        assert_eq!(token, "flag-token");
    }

    #[test]
    fn test_environment_used_before_keyring() {
        let token = resolve_access_token_with(None, Some("env-token".to_string()), || {
            panic!("keyring should not be consulted")
        })
        .expect("token");
        assert_eq!(token, "env-token");
    }

    #[test]
    fn test_keyring_fallback_and_missing_token() {
        let token = resolve_access_token_with(Some("  ".to_string()), None, || {
            Ok(Some("stored".to_string()))
        })
        .expect("token");
        assert_eq!(token, "stored");

        let missing = resolve_access_token_with(None, None, || Ok(None));
        assert!(matches!(missing, Err(SyncError::MissingToken)));
    }

    #[test]
    fn test_secret_service_hint() {
        assert!(keyring_error_hint("org.freedesktop.DBus.Error.ServiceUnknown: nope").is_some());
        assert!(keyring_error_hint("something else").is_none());
    }
}
