//! Feature layout shared with the trained classifier.
//!
//! Slot order and count are fixed by the model weights. Any change to
//! `FEATURE_LAYOUT` must bump `FEATURE_VERSION`, and the model artifact has to
//! be retrained against the new layout.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

pub const FEATURE_VERSION: u8 = 1;

/// Total vector width, including the zero-padded tail.
pub const FEATURE_COUNT: usize = 30;

/// Names of the populated slots, in vector order.
pub const FEATURE_LAYOUT: &[&str] = &[
    "having_ip_address",       // 0
    "url_length",              // 1: raw character count
    "shortening_service",      // 2
    "having_at_symbol",        // 3
    "double_slash_redirect",   // 4
    "prefix_suffix_hyphen",    // 5
    "having_sub_domain",       // 6
    "insecure_scheme",         // 7
    "registration_length",     // 8
    "favicon",                 // 9: always 0
    "non_standard_port",       // 10
    "https_token",             // 11
    "abnormal_url",            // 12
    "double_slash_recheck",    // 13: same test as slot 4
    "submitting_to_email",     // 14
    "age_of_domain",           // 15
    "dns_record",              // 16
];

pub mod slot {
    pub const IP_ADDRESS: usize = 0;
    pub const URL_LENGTH: usize = 1;
    pub const SHORTENER: usize = 2;
    pub const AT_SYMBOL: usize = 3;
    pub const DOUBLE_SLASH: usize = 4;
    pub const HYPHEN: usize = 5;
    pub const SUBDOMAIN: usize = 6;
    pub const INSECURE: usize = 7;
    pub const REGISTRATION_LENGTH: usize = 8;
    pub const FAVICON: usize = 9;
    pub const PORT: usize = 10;
    pub const HTTPS_TOKEN: usize = 11;
    pub const ABNORMAL_URL: usize = 12;
    pub const DOUBLE_SLASH_RECHECK: usize = 13;
    pub const MAILTO: usize = 14;
    pub const DOMAIN_AGE: usize = 15;
    pub const DNS_RECORD: usize = 16;
}

pub fn slot_name(index: usize) -> &'static str {
    FEATURE_LAYOUT.get(index).copied().unwrap_or("padding")
}

/// CRC32 over the version and the ordered slot names.
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&(FEATURE_COUNT as u32).to_le_bytes());
    hasher.finalize()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            feature_count: FEATURE_COUNT,
            feature_names: (0..FEATURE_COUNT).map(|i| slot_name(i).to_string()).collect(),
        }
    }
}
