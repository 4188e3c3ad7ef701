//! Per-frame recognition: detect, read the title, identify, verify, route.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::actuator::BinSink;
use crate::consensus::{title_region, verify, NameConsensus, NameReader};
use crate::error::Result;
use crate::identify::{Identifier, RecognitionContext};
use crate::inventory::{CheckIn, Collection};
use crate::router::{route, BinLabel, SortingMode};
use crate::vision::{CardDetector, PerspectiveNormalizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedReason {
    /// No plausible title reading was collected.
    NameNotFound,
    /// The outline could not be rectified.
    Degenerate,
    /// No allowed fingerprint matched.
    NoMatch,
}

impl fmt::Display for UnrecognizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnrecognizedReason::NameNotFound => "Name not found",
            UnrecognizedReason::Degenerate => "Card outline degenerate",
            UnrecognizedReason::NoMatch => "Card data not found",
        })
    }
}

/// A matched card with its corroboration and routing.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub card_id: String,
    pub name: String,
    pub set_code: String,
    pub price: Option<String>,
    pub distance: f64,
    pub observed_name: String,
    pub similarity: f64,
    pub mana_cost_matched: bool,
    /// Whether the observed name corroborates the fingerprint match.
    pub accepted: bool,
    pub already_owned: bool,
    pub bin: BinLabel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FrameOutcome {
    NoCard,
    Unrecognized { reason: UnrecognizedReason },
    Recognized(Recognition),
}

impl FrameOutcome {
    /// Label to hand to the actuator, if any.
    ///
    /// Unrecognized cards go to the reject bin. A recognized card whose name
    /// did not corroborate the match is held back so it can be rescanned.
    pub fn dispatch_label(&self) -> Option<BinLabel> {
        match self {
            FrameOutcome::NoCard => None,
            FrameOutcome::Unrecognized { .. } => Some(BinLabel::Reject),
            FrameOutcome::Recognized(r) if r.accepted => Some(r.bin.clone()),
            FrameOutcome::Recognized(_) => None,
        }
    }
}

/// The full recognition path for one sorting session.
#[derive(Debug)]
pub struct Recognizer {
    context: Arc<RecognitionContext>,
    detector: CardDetector,
    normalizer: PerspectiveNormalizer,
    identifier: Identifier,
    consensus: NameConsensus,
    mode: SortingMode,
    threshold: f64,
    collection: Option<Collection>,
}

impl Recognizer {
    pub fn new(context: Arc<RecognitionContext>, mode: SortingMode, threshold: f64) -> Self {
        let config = &context.config;
        Self {
            detector: CardDetector::new(config.geometry.clone()),
            normalizer: PerspectiveNormalizer::new(config.normalizer.clone()),
            consensus: NameConsensus::new(config.consensus.clone()),
            identifier: Identifier::new(Arc::clone(&context)),
            context,
            mode,
            threshold,
            collection: None,
        }
    }

    /// Track owned cards; only consulted in `set` and `buy` modes.
    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collection = Some(collection);
        self
    }

    #[instrument(skip_all, fields(mode = %self.mode))]
    pub fn process_frame<R: NameReader + ?Sized>(
        &mut self,
        frame: &RgbImage,
        reader: &mut R,
    ) -> Result<FrameOutcome> {
        let started = Instant::now();
        let Some(quad) = self.detector.find_card(frame) else {
            return Ok(FrameOutcome::NoCard);
        };

        let consensus_config = self.consensus.config();
        let observed = title_region(
            frame,
            &quad,
            consensus_config.title_band_top,
            consensus_config.title_band_bottom,
        )
        .and_then(|region| self.consensus.collect(reader, &region).name);
        let Some(observed_name) = observed else {
            return Ok(unrecognized(UnrecognizedReason::NameNotFound));
        };

        let Some(normalized) = self.normalizer.normalize(frame, &quad) else {
            return Ok(unrecognized(UnrecognizedReason::Degenerate));
        };
        let Some(found) = self.identifier.identify_card(&normalized) else {
            return Ok(unrecognized(UnrecognizedReason::NoMatch));
        };
        let Some(card) = self.context.catalog.get(&found.card_id) else {
            return Ok(unrecognized(UnrecognizedReason::NoMatch));
        };

        let mana_reading = reader.read_mana_cost(&normalized.card);
        let verdict = verify(
            &observed_name,
            card,
            mana_reading.as_deref(),
            &self.context.config.acceptance,
        );

        let mut bin = route(Some(card), self.mode, self.threshold);
        let mut already_owned = false;
        if verdict.accepted && self.mode.tracks_collection() {
            if let Some(collection) = self.collection.as_mut() {
                if collection.check_in(&card.id)? == CheckIn::AlreadyOwned {
                    already_owned = true;
                    bin = BinLabel::Reject;
                }
            }
        }

        info!(
            card_id = %card.id,
            name = %card.name,
            observed = %observed_name,
            distance = found.distance,
            similarity = verdict.similarity,
            accepted = verdict.accepted,
            bin = %bin,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Card recognized"
        );

        Ok(FrameOutcome::Recognized(Recognition {
            card_id: card.id.clone(),
            name: card.name.clone(),
            set_code: card.set_code.clone(),
            price: card.formatted_price(),
            distance: found.distance,
            observed_name,
            similarity: verdict.similarity,
            mana_cost_matched: verdict.mana_cost_matched,
            accepted: verdict.accepted,
            already_owned,
            bin,
        }))
    }

    /// Process a frame and forward the resulting label to `sink`.
    pub fn process_and_dispatch<R, S>(
        &mut self,
        frame: &RgbImage,
        reader: &mut R,
        sink: &mut S,
    ) -> Result<FrameOutcome>
    where
        R: NameReader + ?Sized,
        S: BinSink + ?Sized,
    {
        let outcome = self.process_frame(frame, reader)?;
        if let Some(label) = outcome.dispatch_label() {
            sink.send(&label)?;
        }
        Ok(outcome)
    }
}

fn unrecognized(reason: UnrecognizedReason) -> FrameOutcome {
    debug!(%reason, "Card unrecognized");
    FrameOutcome::Unrecognized { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::LogSink;
    use crate::catalog::{CardRecord, Catalog};
    use crate::config::RecognitionConfig;
    use crate::identify::FingerprintIndex;
    use image::Rgb;
    use std::time::Duration;

    fn quiet_config() -> RecognitionConfig {
        let mut config = RecognitionConfig::default();
        config.consensus.pacing = Duration::ZERO;
        config
    }

    fn empty_recognizer() -> Recognizer {
        let context = RecognitionContext::new(
            Catalog::from_records(vec![CardRecord::new("a", "Opt", "xln")]),
            FingerprintIndex::default(),
            quiet_config(),
        );
        Recognizer::new(context, SortingMode::Color, 0.0)
    }

    #[test]
    fn test_blank_frame_has_no_card() {
        let mut recognizer = empty_recognizer();
        let frame = RgbImage::from_pixel(320, 240, Rgb([30, 30, 30]));
        let mut reader = |_: &RgbImage| Some("Opt".to_string());
        let outcome = recognizer.process_frame(&frame, &mut reader).unwrap();
        assert!(matches!(outcome, FrameOutcome::NoCard));
        assert!(outcome.dispatch_label().is_none());
    }

    #[test]
    fn test_unreadable_name_is_rejected() {
        let mut recognizer = empty_recognizer();
        let frame = RgbImage::from_fn(400, 300, |x, y| {
            if (100..300).contains(&x) && (40..260).contains(&y) {
                Rgb([230, 230, 230])
            } else {
                Rgb([10, 10, 10])
            }
        });
        let mut reader = |_: &RgbImage| -> Option<String> { None };
        let mut sink = LogSink::default();
        let outcome = recognizer
            .process_and_dispatch(&frame, &mut reader, &mut sink)
            .unwrap();
        assert!(matches!(
            outcome,
            FrameOutcome::Unrecognized {
                reason: UnrecognizedReason::NameNotFound
            }
        ));
        assert_eq!(sink.sent(), 1);
    }

    #[test]
    fn test_dispatch_label_holds_back_unverified() {
        let recognition = Recognition {
            card_id: "a".to_string(),
            name: "Opt".to_string(),
            set_code: "xln".to_string(),
            price: None,
            distance: 4.0,
            observed_name: "Shock".to_string(),
            similarity: 0.2,
            mana_cost_matched: false,
            accepted: false,
            already_owned: false,
            bin: BinLabel::bin("Blue"),
        };
        assert!(FrameOutcome::Recognized(recognition.clone()).dispatch_label().is_none());
        let accepted = Recognition {
            accepted: true,
            ..recognition
        };
        assert_eq!(
            FrameOutcome::Recognized(accepted).dispatch_label(),
            Some(BinLabel::bin("Blue"))
        );
    }
}
