//! Destination phone number
//!
//! The number is stored twice: as typed (for display) and with separators
//! stripped (for dialing).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters people put between digit groups
static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-./()]").expect("Invalid separator regex"));

/// Strip separator characters, keeping digits and any leading `+`
pub fn normalize_number(raw: &str) -> String {
    SEPARATORS.replace_all(raw.trim(), "").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Destination {
    pub raw: String,
    pub normalized: String,
}

impl Destination {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            normalized: normalize_number(raw),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}
