//! Validation helpers for configuration values and namespace names.

use validator::ValidationError;

/// Validates that a namespace root is an absolute path without a trailing slash.
///
/// # Examples
///
/// ```ignore
/// validate_root_path("/PlayerList")   // Ok
/// validate_root_path("PlayerList")    // Err - relative
/// validate_root_path("/PlayerList/")  // Err - trailing slash
/// ```
pub fn validate_root_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') || path == "/" {
        let mut err = ValidationError::new("root_path_absolute");
        err.message = Some(format!("Root path must be an absolute, non-root path (got `{path}`)").into());
        return Err(err);
    }

    if path.ends_with('/') || path.contains("//") {
        let mut err = ValidationError::new("root_path_format");
        err.message = Some("Root path must not contain empty segments".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a player name is usable as a single namespace segment.
pub fn validate_player_id(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains('/') {
        let mut err = ValidationError::new("player_id_format");
        err.message = Some("Player name must be a non-empty segment without `/`".into());
        return Err(err);
    }

    if name == crate::coord::paths::PRESENCE_MARKER || name == "." || name == ".." {
        let mut err = ValidationError::new("player_id_reserved");
        err.message = Some(format!("Player name `{name}` is reserved").into());
        return Err(err);
    }

    Ok(())
}
