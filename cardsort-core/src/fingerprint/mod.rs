//! Per-card color fingerprints.
//!
//! A fingerprint is three channel perceptual hashes (red, green, blue).
//! Distance between two fingerprints is the mean of the three per-channel
//! Hamming distances.

pub mod phash;
pub mod store;

pub use phash::{
    hamming_distance, split_channels, ChannelHash, PerceptualHasher, HASH_BYTES, HASH_HEX_LEN,
    HASH_SIZE,
};
pub use store::{FingerprintStore, MergeReport, StoreEntries};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Red/green/blue perceptual hashes of one card image.
///
/// Serializes to the persisted store layout
/// `{"r_phash": "...", "g_phash": "...", "b_phash": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(rename = "r_phash")]
    pub red: ChannelHash,
    #[serde(rename = "g_phash")]
    pub green: ChannelHash,
    #[serde(rename = "b_phash")]
    pub blue: ChannelHash,
}

impl Fingerprint {
    /// Parse three stored hex hashes; all must be well-formed.
    pub fn from_hex(red: &str, green: &str, blue: &str) -> Result<Self> {
        Ok(Self {
            red: ChannelHash::from_hex(red)?,
            green: ChannelHash::from_hex(green)?,
            blue: ChannelHash::from_hex(blue)?,
        })
    }

    /// Sum of the three per-channel Hamming distances.
    pub fn total_distance(&self, other: &Self) -> u32 {
        self.red.hamming_distance(&other.red)
            + self.green.hamming_distance(&other.green)
            + self.blue.hamming_distance(&other.blue)
    }

    /// Mean per-channel Hamming distance.
    pub fn distance(&self, other: &Self) -> f64 {
        self.total_distance(other) as f64 / 3.0
    }
}
