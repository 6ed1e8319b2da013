//! Input validation utilities for index operations.
//!
//! Provides defense-in-depth validation on the core boundary, mirroring
//! what the frontend validators enforce before calling in.

use crate::errors::AppError;
use std::net::Ipv4Addr;

/// Maximum object key length accepted by S3-compatible stores, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Validate S3 bucket name according to AWS rules.
///
/// Rules:
/// - Must be between 3 and 63 characters
/// - Can only contain lowercase letters, numbers, dots (.), and hyphens (-)
/// - Must begin and end with a letter or number
/// - Must not be formatted as an IP address
/// - Must not contain consecutive periods
/// - Must not contain periods adjacent to hyphens
pub fn validate_bucket_name(name: &str) -> Result<(), AppError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(AppError::ValidationError(
            "Bucket name cannot be empty".into(),
        ));
    }

    if name.len() < 3 {
        return Err(AppError::ValidationError(
            "Bucket name must be at least 3 characters long".into(),
        ));
    }

    if name.len() > 63 {
        return Err(AppError::ValidationError(
            "Bucket name must be no more than 63 characters long".into(),
        ));
    }

    // Check if formatted as IP address
    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(AppError::ValidationError(
            "Bucket name cannot be formatted as an IP address".into(),
        ));
    }

    // Check valid characters
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');

    if !valid_chars {
        return Err(AppError::ValidationError(
            "Bucket name can only contain lowercase letters, numbers, dots, and hyphens".into(),
        ));
    }

    // Must start with alphanumeric
    if let Some(first) = name.chars().next() {
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(AppError::ValidationError(
                "Bucket name must start with a letter or number".into(),
            ));
        }
    }

    // Must end with alphanumeric
    if let Some(last) = name.chars().last() {
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(AppError::ValidationError(
                "Bucket name must end with a letter or number".into(),
            ));
        }
    }

    // No consecutive periods
    if name.contains("..") {
        return Err(AppError::ValidationError(
            "Bucket name cannot contain consecutive periods".into(),
        ));
    }

    // No period-dash combinations
    if name.contains(".-") || name.contains("-.") {
        return Err(AppError::ValidationError(
            "Bucket name cannot contain periods adjacent to hyphens".into(),
        ));
    }

    Ok(())
}

/// Validate S3 object key.
///
/// Rules:
/// - Cannot be empty
/// - Maximum 1024 bytes (UTF-8 encoded length)
/// - Should not contain control characters
pub fn validate_object_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::ValidationError(
            "Object key cannot be empty".into(),
        ));
    }

    if key.len() > MAX_KEY_BYTES {
        return Err(AppError::ValidationError(format!(
            "Object key must be no more than {} bytes long",
            MAX_KEY_BYTES
        )));
    }

    // Check for control characters
    if key.chars().any(|c| c.is_control()) {
        return Err(AppError::ValidationError(
            "Object key contains invalid control characters".into(),
        ));
    }

    Ok(())
}

/// Validate a prefix string (empty string addresses the bucket root).
///
/// A non-empty prefix must end with '/' and obey the same limits as a key.
pub fn validate_prefix(prefix: &str) -> Result<(), AppError> {
    if prefix.is_empty() {
        return Ok(());
    }

    if !prefix.ends_with('/') {
        return Err(AppError::ValidationError(
            "Prefix must end with '/'".into(),
        ));
    }

    validate_object_key(prefix)
}
