//! General utilities shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Allocates a fresh, globally unique room id.
#[must_use]
pub fn new_room_id() -> String {
    Uuid::new_v4().to_string()
}

/// Rejects empty or whitespace-only identifiers supplied by callers.
pub fn validate_id(kind: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{kind} must not be empty"));
    }
    Ok(())
}
