//! DCT perceptual hashing for single image channels.
//!
//! # Algorithm
//!
//! The channel is resampled to 64×64 (`HIGHFREQ_FACTOR × HASH_SIZE`), a 2-D
//! type-II DCT is taken, and the top-left 16×16 block of low-frequency
//! coefficients is compared against its median. Each coefficient above the
//! median sets one bit, row-major, most significant bit first, giving a
//! 256-bit hash rendered as 64 lowercase hex characters.
//!
//! Hashes produced here are interchangeable with those already present in
//! persisted hash stores, so stores built by earlier tooling keep working.
//!
//! # Usage
//!
//! ```no_run
//! use cardsort_core::fingerprint::PerceptualHasher;
//!
//! let image = image::open("card.png").unwrap().to_rgb8();
//! let hasher = PerceptualHasher::new();
//! let fingerprint = hasher.hash_rgb(&image);
//! println!("{}", fingerprint.red);
//! ```

use std::f64::consts::PI;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use super::Fingerprint;
use crate::error::{CardsortError, Result};

/// Side of the low-frequency DCT block, in coefficients.
pub const HASH_SIZE: usize = 16;

/// Resample size multiplier relative to `HASH_SIZE`.
pub const HIGHFREQ_FACTOR: usize = 4;

/// Hash length in bytes (256 bits).
pub const HASH_BYTES: usize = HASH_SIZE * HASH_SIZE / 8;

/// Hash length as a hex string.
pub const HASH_HEX_LEN: usize = HASH_BYTES * 2;

const IMG_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// 256-bit perceptual hash of one color channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelHash([u8; HASH_BYTES]);

impl ChannelHash {
    pub fn from_bytes(bytes: [u8; HASH_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    /// Number of differing bits.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        hamming_distance(&self.0, &other.0)
    }

    /// Lowercase hex rendering, always `HASH_HEX_LEN` characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a stored hash. Anything other than exactly 64 hex characters is
    /// rejected.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_HEX_LEN {
            return Err(CardsortError::InvalidFingerprint(format!(
                "expected {HASH_HEX_LEN} hex characters, got {}",
                hex_str.len()
            )));
        }
        let mut bytes = [0u8; HASH_BYTES];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| CardsortError::InvalidFingerprint(format!("Invalid hex string: {e}")))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ChannelHash {
    type Error = CardsortError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ChannelHash> for String {
    fn from(hash: ChannelHash) -> Self {
        hash.to_hex()
    }
}

impl std::fmt::Display for ChannelHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ChannelHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChannelHash({})", self.to_hex())
    }
}

/// Perceptual hasher with a precomputed DCT basis.
#[derive(Debug, Clone)]
pub struct PerceptualHasher {
    /// `HASH_SIZE × IMG_SIZE` cosine basis, row `k` holding the k-th DCT-II
    /// basis vector.
    basis: Vec<f64>,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PerceptualHasher {
    pub fn new() -> Self {
        let n = IMG_SIZE as f64;
        let mut basis = Vec::with_capacity(HASH_SIZE * IMG_SIZE);
        for k in 0..HASH_SIZE {
            for i in 0..IMG_SIZE {
                let angle = PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n);
                basis.push(2.0 * angle.cos());
            }
        }
        Self { basis }
    }

    /// Hash a single channel.
    pub fn hash_channel(&self, channel: &GrayImage) -> ChannelHash {
        let small = imageops::resize(channel, IMG_SIZE as u32, IMG_SIZE as u32, FilterType::Lanczos3);
        let pixels: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();

        // DCT along columns, keeping only the low-frequency rows.
        let mut partial = vec![0.0f64; HASH_SIZE * IMG_SIZE];
        for u in 0..HASH_SIZE {
            let row = &self.basis[u * IMG_SIZE..(u + 1) * IMG_SIZE];
            for x in 0..IMG_SIZE {
                partial[u * IMG_SIZE + x] = (0..IMG_SIZE)
                    .map(|y| row[y] * pixels[y * IMG_SIZE + x])
                    .sum();
            }
        }

        // DCT along rows of the partial result.
        let mut low = [0.0f64; HASH_SIZE * HASH_SIZE];
        for u in 0..HASH_SIZE {
            let src = &partial[u * IMG_SIZE..(u + 1) * IMG_SIZE];
            for v in 0..HASH_SIZE {
                let basis = &self.basis[v * IMG_SIZE..(v + 1) * IMG_SIZE];
                low[u * HASH_SIZE + v] = src.iter().zip(basis).map(|(a, b)| a * b).sum();
            }
        }

        let median = median(&low);
        let mut bytes = [0u8; HASH_BYTES];
        for (i, coefficient) in low.iter().enumerate() {
            if *coefficient > median {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        ChannelHash(bytes)
    }

    /// Hash the red, green and blue channels of an image.
    pub fn hash_rgb(&self, image: &RgbImage) -> Fingerprint {
        let [red, green, blue] = split_channels(image);
        Fingerprint {
            red: self.hash_channel(&red),
            green: self.hash_channel(&green),
            blue: self.hash_channel(&blue),
        }
    }

    /// Hash any decoded image, converting to RGB first.
    pub fn hash_image(&self, image: &DynamicImage) -> Fingerprint {
        self.hash_rgb(&image.to_rgb8())
    }

    /// Decode raw bytes (PNG, JPEG, GIF, WebP) and hash them.
    pub fn hash_bytes(&self, image_data: &[u8]) -> Result<Fingerprint> {
        let image = image::load_from_memory(image_data)?;
        Ok(self.hash_image(&image))
    }
}

/// Split an RGB image into three single-channel images.
pub fn split_channels(image: &RgbImage) -> [GrayImage; 3] {
    let (w, h) = image.dimensions();
    let channel = |c: usize| GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]));
    [channel(0), channel(1), channel(2)]
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Count differing bits between two equal-length byte slices.
pub fn hamming_distance(hash1: &[u8], hash2: &[u8]) -> u32 {
    hash1
        .iter()
        .zip(hash2.iter())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum()
}
