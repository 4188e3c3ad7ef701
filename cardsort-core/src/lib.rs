//! Cardsort Core - trading card identification and bin routing
//!
//! This crate turns a camera frame showing one trading card into a physical
//! sorting decision, and maintains the fingerprint database that makes the
//! identification possible.
//!
//! # Recognition path
//!
//! - [`vision::CardDetector`] finds the card outline in the frame
//! - [`vision::PerspectiveNormalizer`] rectifies it to a canonical portrait image
//! - [`identify::Identifier`] matches color perceptual hashes against the index
//! - [`consensus::NameConsensus`] corroborates the match with repeated title readings
//! - [`router::route`] maps the card to a bin label
//!
//! Everything recognition reads is bundled in an immutable
//! [`RecognitionContext`] built once at startup.
//!
//! # Database maintenance
//!
//! [`builder::DatabaseBuilder`] downloads missing card images and hashes them
//! with fixed-size async worker pools, then merges the new fingerprints into
//! the persisted store.
//!
//! # Example
//!
//! ```no_run
//! use cardsort_core::{RecognitionContext, Recognizer, Settings, SortingMode};
//!
//! # fn example() -> cardsort_core::Result<()> {
//! let settings = Settings::from_env();
//! let context = RecognitionContext::load(&settings)?;
//! let mut recognizer = Recognizer::new(context, SortingMode::Color, 0.0);
//!
//! let frame = image::open("frame.jpg")?.to_rgb8();
//! // Any closure from a title image to optional text works as a reader.
//! let mut reader = |_region: &image::RgbImage| Some("Lightning Bolt".to_string());
//! let outcome = recognizer.process_frame(&frame, &mut reader)?;
//! println!("{:?}", outcome.dispatch_label());
//! # Ok(())
//! # }
//! ```

pub mod actuator;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod consensus;
pub mod error;
pub mod fingerprint;
pub mod identify;
pub mod inventory;
pub mod pipeline;
pub mod router;
pub mod vision;

// Re-export main types for convenience
pub use actuator::{BinSink, FramedLink, LogSink};
pub use builder::{BuildReport, DatabaseBuilder, ImageFetcher, ImageStore};
pub use catalog::{CardRecord, CardType, Catalog};
pub use config::{
    AcceptancePolicy, BuilderConfig, ConsensusConfig, IdentifierConfig, RecognitionConfig,
    Settings,
};
pub use consensus::{NameConsensus, NameReader, NameVote};
pub use error::{CardsortError, Result};
pub use fingerprint::{Fingerprint, FingerprintStore, PerceptualHasher};
pub use identify::{FingerprintIndex, Identifier, Match, RecognitionContext};
pub use inventory::{CheckIn, Collection};
pub use pipeline::{FrameOutcome, Recognition, Recognizer, UnrecognizedReason};
pub use router::{route, BinLabel, SortingMode};
pub use vision::{CardDetector, NormalizedCard, PerspectiveNormalizer, Quad};

#[cfg(feature = "network")]
pub use builder::HttpFetcher;
