//! Fingerprint index and nearest-neighbor card identification.
//!
//! Lookups are exhaustive linear scans over the whole index. Identification
//! never fails: a card that cannot be matched is `None`, not an error.

use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, info, instrument};

use crate::catalog::Catalog;
use crate::config::{RecognitionConfig, Settings};
use crate::error::Result;
use crate::fingerprint::{Fingerprint, FingerprintStore, PerceptualHasher};
use crate::vision::NormalizedCard;

/// Immutable (card id, fingerprint) pairs in store order.
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    entries: Vec<(String, Fingerprint)>,
}

impl FingerprintIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Fingerprint)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Build the index from a persisted store, skipping malformed entries.
    pub fn load(store: &FingerprintStore) -> Result<Self> {
        let loaded = store.load_entries()?;
        Ok(Self::from_entries(loaded.entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fingerprint)> {
        self.entries.iter().map(|(id, fp)| (id.as_str(), fp))
    }

    pub fn get(&self, id: &str) -> Option<&Fingerprint> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, fp)| fp)
    }
}

/// A candidate card and its mean per-channel Hamming distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub card_id: String,
    pub distance: f64,
}

/// Everything recognition reads, built once at startup.
#[derive(Debug)]
pub struct RecognitionContext {
    pub catalog: Catalog,
    pub index: FingerprintIndex,
    pub config: RecognitionConfig,
}

impl RecognitionContext {
    pub fn new(catalog: Catalog, index: FingerprintIndex, config: RecognitionConfig) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            index,
            config,
        })
    }

    /// Load the newest catalog snapshot and the hash store named by `settings`.
    ///
    /// Either resource being absent or unreadable is fatal.
    #[instrument(skip_all, fields(data_dir = %settings.data_dir.display()))]
    pub fn load(settings: &Settings) -> Result<Arc<Self>> {
        Self::load_from(
            &settings.data_dir,
            &settings.catalog_prefix,
            &settings.hashes_path(),
            settings.recognition.clone(),
        )
    }

    pub fn load_from(
        catalog_dir: &Path,
        catalog_prefix: &str,
        hashes: &Path,
        config: RecognitionConfig,
    ) -> Result<Arc<Self>> {
        let catalog = Catalog::load_newest(catalog_dir, catalog_prefix)?;
        let index = FingerprintIndex::load(&FingerprintStore::new(hashes))?;
        info!(
            cards = catalog.len(),
            fingerprints = index.len(),
            "Recognition context ready"
        );
        Ok(Self::new(catalog, index, config))
    }
}

/// Matches card images against the fingerprint index.
#[derive(Debug, Clone)]
pub struct Identifier {
    context: Arc<RecognitionContext>,
    hasher: PerceptualHasher,
}

impl Identifier {
    pub fn new(context: Arc<RecognitionContext>) -> Self {
        Self {
            context,
            hasher: PerceptualHasher::new(),
        }
    }

    pub fn context(&self) -> &Arc<RecognitionContext> {
        &self.context
    }

    pub fn fingerprint(&self, image: &RgbImage) -> Fingerprint {
        self.hasher.hash_rgb(image)
    }

    /// Nearest indexed entry over the whole index. Ties keep the earliest.
    pub fn identify(&self, image: &RgbImage) -> Option<Match> {
        self.nearest(&self.fingerprint(image))
    }

    pub fn nearest(&self, probe: &Fingerprint) -> Option<Match> {
        let mut best: Option<(&str, u32)> = None;
        for (id, fp) in self.context.index.iter() {
            let total = probe.total_distance(fp);
            if best.map_or(true, |(_, d)| total < d) {
                best = Some((id, total));
            }
        }
        best.map(|(id, total)| Match {
            card_id: id.to_string(),
            distance: total as f64 / 3.0,
        })
    }

    /// Every indexed entry, ascending by distance (stable on ties).
    pub fn rank_all(&self, image: &RgbImage) -> Vec<Match> {
        self.rank_fingerprint(&self.fingerprint(image))
    }

    pub fn rank_fingerprint(&self, probe: &Fingerprint) -> Vec<Match> {
        let mut ranked: Vec<(u32, &str)> = self
            .context
            .index
            .iter()
            .map(|(id, fp)| (probe.total_distance(fp), id))
            .collect();
        ranked.sort_by_key(|(total, _)| *total);
        ranked
            .into_iter()
            .map(|(total, id)| Match {
                card_id: id.to_string(),
                distance: total as f64 / 3.0,
            })
            .collect()
    }

    /// Drop candidates in excluded sets or missing from the catalog.
    ///
    /// Order is preserved, so filtering is idempotent.
    pub fn filter_excluded(&self, ranked: Vec<Match>) -> Vec<Match> {
        let excluded = &self.context.config.identifier.excluded_sets;
        ranked
            .into_iter()
            .filter(|m| self.context.catalog.is_allowed(&m.card_id, excluded))
            .collect()
    }

    /// Best allowed candidate within the distance ceiling.
    #[instrument(skip_all)]
    pub fn resolve(&self, image: &RgbImage) -> Option<Match> {
        let best = self.filter_excluded(self.rank_all(image)).into_iter().next();
        self.finalize(best)
    }

    /// Resolve both orientation crops and keep the closer match.
    pub fn identify_card(&self, card: &NormalizedCard) -> Option<Match> {
        let upright = self.resolve(&card.upright);
        let rotated = self.resolve(&card.rotated);
        debug!(
            upright = upright.as_ref().map(|m| m.distance),
            rotated = rotated.as_ref().map(|m| m.distance),
            "Orientation candidates"
        );
        match (upright, rotated) {
            (Some(u), Some(r)) => Some(if r.distance < u.distance { r } else { u }),
            (u, r) => u.or(r),
        }
    }

    fn finalize(&self, best: Option<Match>) -> Option<Match> {
        let config = &self.context.config.identifier;
        let mut found = best?;

        if let Some(max) = config.max_distance {
            if found.distance > max {
                debug!(
                    card_id = %found.card_id,
                    distance = found.distance,
                    max,
                    "Best match beyond distance ceiling"
                );
                return None;
            }
        }

        if config.prefer_english {
            let catalog = &self.context.catalog;
            let is_english = catalog.get(&found.card_id).is_some_and(|c| c.lang == "en");
            if !is_english {
                if let Some(english) =
                    catalog.english_printing_of(&found.card_id, &config.excluded_sets)
                {
                    debug!(from = %found.card_id, to = %english.id, "Remapped to English printing");
                    found.card_id = english.id.clone();
                }
            }
        }

        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CardRecord;
    use crate::fingerprint::{ChannelHash, HASH_BYTES};
    use image::Rgb;

    fn card_image(seed: u32) -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            let v = (x * (seed + 3) + y * (seed * 7 + 1)) % 256;
            let band = if ((x / (4 + seed % 5)) + (y / 6)) % 2 == 0 { 200 } else { 40 };
            Rgb([v as u8, band, ((x ^ y) * seed % 256) as u8])
        })
    }

    fn flat(byte: u8) -> Fingerprint {
        let h = ChannelHash::from_bytes([byte; HASH_BYTES]);
        Fingerprint {
            red: h,
            green: h,
            blue: h,
        }
    }

    fn context_for(cards: Vec<(CardRecord, Fingerprint)>, config: RecognitionConfig) -> Arc<RecognitionContext> {
        let index = FingerprintIndex::from_entries(
            cards.iter().map(|(c, fp)| (c.id.clone(), *fp)),
        );
        let catalog = Catalog::from_records(cards.into_iter().map(|(c, _)| c));
        RecognitionContext::new(catalog, index, config)
    }

    fn image_context() -> (Identifier, Vec<RgbImage>) {
        let hasher = PerceptualHasher::new();
        let images: Vec<RgbImage> = (1..=5).map(card_image).collect();
        let cards = images
            .iter()
            .enumerate()
            .map(|(i, img)| {
                let set = if i == 2 { "LEA" } else { "m10" };
                (CardRecord::new(format!("card-{i}"), format!("Card {i}"), set), hasher.hash_rgb(img))
            })
            .collect();
        (Identifier::new(context_for(cards, RecognitionConfig::default())), images)
    }

    #[test]
    fn test_identify_own_image_is_exact() {
        let (identifier, images) = image_context();
        for (i, image) in images.iter().enumerate() {
            let m = identifier.identify(image).unwrap();
            assert_eq!(m.card_id, format!("card-{i}"));
            assert_eq!(m.distance, 0.0);
        }
    }

    #[test]
    fn test_rank_all_sorted_permutation() {
        let (identifier, images) = image_context();
        let ranked = identifier.rank_all(&images[0]);
        assert_eq!(ranked.len(), identifier.context().index.len());
        assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));

        let mut ids: Vec<_> = ranked.iter().map(|m| m.card_id.clone()).collect();
        ids.sort();
        let mut expected: Vec<_> = (0..5).map(|i| format!("card-{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_filter_excluded_is_idempotent() {
        let (identifier, images) = image_context();
        let once = identifier.filter_excluded(identifier.rank_all(&images[1]));
        assert!(once.iter().all(|m| m.card_id != "card-2"));
        let twice = identifier.filter_excluded(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_excluded_set_never_resolves() {
        let (identifier, images) = image_context();
        // card-2 is printed in an excluded set; its exact image resolves elsewhere or not at all.
        assert_eq!(identifier.identify(&images[2]).unwrap().card_id, "card-2");
        let resolved = identifier.resolve(&images[2]);
        assert!(resolved.map_or(true, |m| m.card_id != "card-2"));
    }

    #[test]
    fn test_empty_index_is_not_found() {
        let identifier = Identifier::new(context_for(Vec::new(), RecognitionConfig::default()));
        let image = card_image(1);
        assert!(identifier.identify(&image).is_none());
        assert!(identifier.rank_all(&image).is_empty());
        assert!(identifier.resolve(&image).is_none());
    }

    #[test]
    fn test_ties_keep_earliest_entry() {
        let cards = vec![
            (CardRecord::new("first", "A", "m10"), flat(0x0f)),
            (CardRecord::new("second", "B", "m10"), flat(0x0f)),
        ];
        let identifier = Identifier::new(context_for(cards, RecognitionConfig::default()));
        let m = identifier.nearest(&flat(0x0f)).unwrap();
        assert_eq!(m.card_id, "first");
        let ranked = identifier.rank_fingerprint(&flat(0x0f));
        assert_eq!(ranked[0].card_id, "first");
        assert_eq!(ranked[1].card_id, "second");
    }

    #[test]
    fn test_distance_ceiling() {
        let cards = vec![(CardRecord::new("far", "A", "m10"), flat(0x00))];
        let mut config = RecognitionConfig::default();
        config.identifier.max_distance = Some(100.0);
        let identifier = Identifier::new(context_for(cards, config));

        // 128 of 256 bits differ in every channel.
        let best = identifier.nearest(&flat(0x0f)).unwrap();
        assert_eq!(best.distance, 128.0);
        assert!(identifier.finalize(Some(best)).is_none());
    }

    #[test]
    fn test_prefer_english_remaps_by_illustration() {
        let mut foreign = CardRecord::new("de-1", "Schock", "m10");
        foreign.lang = "de".to_string();
        foreign.illustration_id = Some("art-1".to_string());
        let mut english = CardRecord::new("en-1", "Shock", "m10");
        english.illustration_id = Some("art-1".to_string());

        let cards = vec![(foreign, flat(0x01)), (english, flat(0xff))];
        let mut config = RecognitionConfig::default();
        config.identifier.prefer_english = true;
        let identifier = Identifier::new(context_for(cards, config));

        let found = identifier
            .finalize(Some(Match {
                card_id: "de-1".to_string(),
                distance: 3.0,
            }))
            .unwrap();
        assert_eq!(found.card_id, "en-1");
        assert_eq!(found.distance, 3.0);
    }

    #[test]
    fn test_identify_card_picks_better_orientation() {
        let (identifier, images) = image_context();
        let card = NormalizedCard {
            card: images[3].clone(),
            upright: image::imageops::rotate180(&images[3]),
            rotated: images[3].clone(),
        };
        let m = identifier.identify_card(&card).unwrap();
        assert_eq!(m.card_id, "card-3");
        assert_eq!(m.distance, 0.0);
    }
}
