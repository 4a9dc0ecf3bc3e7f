//! Model status kinds and identifier handling.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Raw presence status of a model as reported by a platform.
///
/// The integer representation is what gets persisted in `status_changes`
/// and `models`, so variant order is part of the storage format.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum StatusKind {
    Unknown = 0,
    Offline = 1,
    Online = 2,
    NotFound = 3,
    Denied = 4,
}

impl StatusKind {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => Self::Offline,
            2 => Self::Online,
            3 => Self::NotFound,
            4 => Self::Denied,
            _ => Self::Unknown,
        }
    }
}

/// One online model as reported by a snapshot query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineModel {
    pub model_id: String,
    /// Preview image URL, when the platform listing carries one.
    pub image_url: Option<String>,
}

impl OnlineModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            image_url: None,
        }
    }

    pub fn with_image(model_id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            image_url: Some(image_url.into()),
        }
    }
}

/// One poll cycle's complete set of currently-online models.
pub type Snapshot = Vec<OnlineModel>;

/// Accepted shape of a canonical model identifier.
pub static MODEL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9\-_@]+$").unwrap());

/// Normalize a user-supplied model identifier.
///
/// Platforms treat IDs case-insensitively; everything downstream (history,
/// subscriptions, caches) keys on the lowercased form.
pub fn canonical_model_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for kind in [
            StatusKind::Unknown,
            StatusKind::Offline,
            StatusKind::Online,
            StatusKind::NotFound,
            StatusKind::Denied,
        ] {
            assert_eq!(StatusKind::from_i32(kind.as_i32()), kind);
        }
    }

    #[test]
    fn unknown_codes_map_to_unknown() {
        assert_eq!(StatusKind::from_i32(-7), StatusKind::Unknown);
        assert_eq!(StatusKind::from_i32(99), StatusKind::Unknown);
    }

    #[test]
    fn canonicalization_lowercases_and_trims() {
        assert_eq!(canonical_model_id("  Alice_99 "), "alice_99");
    }

    #[test]
    fn id_regex_rejects_invalid_symbols() {
        assert!(MODEL_ID_REGEX.is_match("alice-99_x@"));
        assert!(!MODEL_ID_REGEX.is_match("alice 99"));
        assert!(!MODEL_ID_REGEX.is_match("Alice"));
        assert!(!MODEL_ID_REGEX.is_match(""));
    }
}
