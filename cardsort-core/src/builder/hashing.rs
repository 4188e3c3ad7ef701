//! Fingerprinting of stored card images.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CardsortError, Result};
use crate::fingerprint::{ChannelHash, Fingerprint, PerceptualHasher, HASH_HEX_LEN};

/// Hash a stored image on the blocking pool.
///
/// Missing, undersized, undecodable or malformed results all come back as
/// `None`; the failure is logged, never propagated.
pub async fn hash_stored_image(
    hasher: Arc<PerceptualHasher>,
    path: PathBuf,
    min_bytes: u64,
) -> Option<Fingerprint> {
    let file_display = path.display().to_string();
    let joined = tokio::task::spawn_blocking(move || hash_file(&hasher, &path, min_bytes)).await;

    match joined {
        Ok(Ok(fingerprint)) => {
            debug!(file = %file_display, "Image hashed");
            Some(fingerprint)
        }
        Ok(Err(e)) => {
            warn!(file = %file_display, error = %e, "Could not hash image");
            None
        }
        Err(e) => {
            warn!(file = %file_display, error = %e, "Hash task aborted");
            None
        }
    }
}

fn hash_file(hasher: &PerceptualHasher, path: &std::path::Path, min_bytes: u64) -> Result<Fingerprint> {
    let data = std::fs::read(path)?;
    if data.len() as u64 <= min_bytes {
        return Err(CardsortError::ImageError(format!(
            "{} is only {} bytes",
            path.display(),
            data.len()
        )));
    }
    let fingerprint = hasher.hash_bytes(&data)?;
    if !is_well_formed(&fingerprint) {
        return Err(CardsortError::InvalidFingerprint(format!(
            "Malformed hash for {}",
            path.display()
        )));
    }
    Ok(fingerprint)
}

/// Every channel renders to exactly `HASH_HEX_LEN` lowercase hex characters
/// and parses back to itself.
pub fn is_well_formed(fingerprint: &Fingerprint) -> bool {
    [fingerprint.red, fingerprint.green, fingerprint.blue]
        .iter()
        .all(|hash| {
            let hex = hash.to_hex();
            hex.len() == HASH_HEX_LEN
                && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
                && ChannelHash::from_hex(&hex).is_ok_and(|parsed| parsed == *hash)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy_png(seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let image = RgbImage::from_fn(64, 64, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            Rgb([b[0], b[1], b[2]])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_hash_stored_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        let png = noisy_png(1);
        assert!(png.len() > 1024);
        std::fs::write(&path, &png).unwrap();

        let hasher = Arc::new(PerceptualHasher::new());
        let fingerprint = hash_stored_image(hasher.clone(), path, 1024).await.unwrap();
        assert!(is_well_formed(&fingerprint));
        assert_eq!(fingerprint, hasher.hash_bytes(&png).unwrap());
    }

    #[tokio::test]
    async fn test_bad_images_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = Arc::new(PerceptualHasher::new());

        let tiny = dir.path().join("tiny.png");
        std::fs::write(&tiny, b"short").unwrap();
        assert!(hash_stored_image(hasher.clone(), tiny, 1024).await.is_none());

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, vec![0x42u8; 4096]).unwrap();
        assert!(hash_stored_image(hasher.clone(), garbage, 1024).await.is_none());

        let missing = dir.path().join("missing.png");
        assert!(hash_stored_image(hasher, missing, 1024).await.is_none());
    }
}
