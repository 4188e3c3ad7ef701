//! Name consensus: repeated title readings, a plurality vote, and a fuzzy
//! comparison against the identified card's catalog name.
//!
//! Text recognition is an external collaborator behind [`NameReader`]. Its
//! output is treated as unreliable, so the title band is read several times
//! and the most frequent plausible reading wins.
//!
//! Sampling is a bounded loop on the calling thread: it sleeps for the
//! configured pacing before every attempt and stops once enough readings are
//! collected, the attempt budget is spent, or the timeout elapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use tracing::{debug, instrument};

use crate::catalog::{normalize_mana_cost, CardRecord};
use crate::config::{AcceptancePolicy, ConsensusConfig};
use crate::vision::Quad;

/// Letter pairs that essentially never occur in card names.
const IMPLAUSIBLE_PAIRS: [&str; 9] = ["zx", "xj", "qj", "jq", "qz", "vw", "vv", "jk", "kj"];

const VOWELS: [char; 5] = ['a', 'e', 'i', 'o', 'u'];

/// Text recognition over a card region.
pub trait NameReader {
    /// Read the card name from an image of the title band.
    fn read_name(&mut self, region: &RgbImage) -> Option<String>;

    /// Read the printed mana cost from a rectified card, when supported.
    fn read_mana_cost(&mut self, _card: &RgbImage) -> Option<String> {
        None
    }
}

impl<F> NameReader for F
where
    F: FnMut(&RgbImage) -> Option<String>,
{
    fn read_name(&mut self, region: &RgbImage) -> Option<String> {
        self(region)
    }
}

/// Crop the title band: `top..bottom` fractions of the card's bounding-box
/// height, full bounding-box width, clamped to the frame.
pub fn title_region(frame: &RgbImage, quad: &Quad, top: f32, bottom: f32) -> Option<RgbImage> {
    let rect = quad.bounding_rect();
    let h = rect.height() as f32;

    let y0 = ((rect.top() as f32 + h * top) as i64).max(0);
    let y1 = ((rect.top() as f32 + h * bottom) as i64).min(frame.height() as i64);
    let x0 = (rect.left() as i64).max(0);
    let x1 = (rect.left() as i64 + rect.width() as i64).min(frame.width() as i64);
    if y1 <= y0 || x1 <= x0 {
        return None;
    }

    Some(imageops::crop_imm(frame, x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32).to_image())
}

/// Strip a raw reading to letters, title-case it and check plausibility.
pub fn sanitize_reading(raw: &str) -> Option<String> {
    let letters: String = raw.chars().filter(|c| c.is_alphabetic()).collect();
    if !is_plausible_name(&letters) {
        return None;
    }

    let mut chars = letters.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
}

/// At least two letters, no implausible letter pair, and a vowel when longer
/// than three letters.
pub fn is_plausible_name(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if lower.chars().count() < 2 {
        return false;
    }
    if IMPLAUSIBLE_PAIRS.iter().any(|pair| lower.contains(pair)) {
        return false;
    }
    lower.chars().count() <= 3 || lower.contains(VOWELS)
}

/// Similarity in `[0, 1]` between two names, ignoring case and anything that
/// is not a letter. Empty names have similarity 0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// Stable plurality vote over readings.
#[derive(Debug, Clone, Default)]
pub struct NameVote {
    readings: Vec<String>,
}

impl NameVote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reading: impl Into<String>) {
        self.readings.push(reading.into());
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> &[String] {
        &self.readings
    }

    /// Most frequent reading; ties go to whichever was seen first.
    pub fn winner(&self) -> Option<&str> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, reading) in self.readings.iter().enumerate() {
            counts.entry(reading.as_str()).or_insert((0, position)).0 += 1;
        }
        counts
            .into_iter()
            .max_by(|(_, (ca, pa)), (_, (cb, pb))| ca.cmp(cb).then(pb.cmp(pa)))
            .map(|(reading, _)| reading)
    }
}

impl<S: Into<String>> FromIterator<S> for NameVote {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusState {
    Sampling,
    Decided(String),
    Exhausted,
}

/// Result of one sampling run.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    /// Terminal state; never `Sampling`.
    pub state: ConsensusState,
    /// Voted name; only a decided run has one.
    pub name: Option<String>,
    pub readings: Vec<String>,
    pub attempts: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct NameConsensus {
    config: ConsensusConfig,
}

impl NameConsensus {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Read the same region repeatedly through `reader`.
    pub fn collect<R: NameReader + ?Sized>(&self, reader: &mut R, region: &RgbImage) -> ConsensusOutcome {
        self.sample(|_| reader.read_name(region))
    }

    /// Drive the sampling loop with an arbitrary source of raw readings.
    ///
    /// `next` receives the 1-based attempt number, which lets live callers
    /// grab a fresh frame per attempt.
    #[instrument(skip_all, fields(min = self.config.min_observations, max_attempts = self.config.max_attempts))]
    pub fn sample<F>(&self, mut next: F) -> ConsensusOutcome
    where
        F: FnMut(usize) -> Option<String>,
    {
        let needed = self.config.min_observations.max(1);
        let start = Instant::now();
        let mut vote = NameVote::new();
        let mut attempts = 0usize;
        let mut state = ConsensusState::Sampling;

        while state == ConsensusState::Sampling {
            if attempts >= self.config.max_attempts || start.elapsed() >= self.config.timeout {
                state = ConsensusState::Exhausted;
                break;
            }

            if !self.config.pacing.is_zero() {
                std::thread::sleep(self.config.pacing);
            }
            attempts += 1;

            match next(attempts).as_deref().map(sanitize_reading) {
                Some(Some(name)) => {
                    debug!(attempt = attempts, reading = %name, "Title reading");
                    vote.push(name);
                }
                Some(None) => debug!(attempt = attempts, "Implausible title reading discarded"),
                None => debug!(attempt = attempts, "No title reading"),
            }

            if vote.len() >= needed {
                if let Some(winner) = vote.winner() {
                    state = ConsensusState::Decided(winner.to_string());
                }
            }
        }

        let name = match &state {
            ConsensusState::Decided(name) => Some(name.clone()),
            _ => None,
        };

        let outcome = ConsensusOutcome {
            state,
            name,
            readings: vote.readings().to_vec(),
            attempts,
            elapsed: start.elapsed(),
        };
        debug!(
            state = ?outcome.state,
            name = ?outcome.name,
            readings = outcome.readings.len(),
            attempts,
            "Name consensus finished"
        );
        outcome
    }
}

/// How a voted name compares with a candidate card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub similarity: f64,
    pub mana_cost_matched: bool,
    pub accepted: bool,
}

/// Apply the acceptance policy to a voted name and optional mana-cost reading.
pub fn verify(
    voted_name: &str,
    card: &CardRecord,
    mana_cost_reading: Option<&str>,
    policy: &AcceptancePolicy,
) -> Verdict {
    let similarity = name_similarity(voted_name, &card.name);
    let mana_cost_matched = mana_cost_reading.is_some_and(|reading| {
        let reading = normalize_mana_cost(reading.trim());
        !reading.is_empty() && reading == card.normalized_mana_cost()
    });

    let accepted = similarity >= policy.min_similarity
        || (mana_cost_matched
            && policy
                .mana_cost_similarity
                .is_some_and(|bar| similarity >= bar));

    Verdict {
        similarity,
        mana_cost_matched,
        accepted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::VecDeque;

    fn instant(config: ConsensusConfig) -> NameConsensus {
        NameConsensus::new(ConsensusConfig {
            pacing: Duration::ZERO,
            ..config
        })
    }

    fn scripted(readings: &[Option<&str>]) -> impl FnMut(usize) -> Option<String> {
        let mut queue: VecDeque<Option<String>> =
            readings.iter().map(|r| r.map(str::to_string)).collect();
        move |_| queue.pop_front().flatten()
    }

    #[test]
    fn test_plurality_vote() {
        let vote: NameVote = ["Opt", "Opt", "Shock"].into_iter().collect();
        assert_eq!(vote.winner(), Some("Opt"));
    }

    #[test]
    fn test_vote_tie_goes_to_first_seen() {
        let vote: NameVote = ["Shock", "Opt", "Opt", "Shock"].into_iter().collect();
        assert_eq!(vote.winner(), Some("Shock"));
        assert_eq!(NameVote::new().winner(), None);
    }

    #[test]
    fn test_sanitize_reading() {
        assert_eq!(sanitize_reading("opt."), Some("Opt".to_string()));
        assert_eq!(sanitize_reading(" LIGHTNING bolt "), Some("Lightningbolt".to_string()));
        assert_eq!(sanitize_reading("x1"), None);
        assert_eq!(sanitize_reading("ajqa"), None);
        assert_eq!(sanitize_reading("bcdfg"), None);
        assert_eq!(sanitize_reading("Sk"), Some("Sk".to_string()));
    }

    #[test]
    fn test_similarity() {
        assert_eq!(name_similarity("Lightningbolt", "Lightning Bolt"), 1.0);
        assert_eq!(name_similarity("", "Opt"), 0.0);
        let s = name_similarity("Shok", "Shock");
        assert!(s > 0.6 && s < 1.0, "similarity = {s}");
    }

    #[test]
    fn test_decides_once_quorum_reached() {
        let consensus = instant(ConsensusConfig::default());
        let outcome = consensus.sample(scripted(&[Some("opt"), None, Some("opt"), Some("shock")]));
        assert_eq!(outcome.state, ConsensusState::Decided("Opt".to_string()));
        assert_eq!(outcome.name.as_deref(), Some("Opt"));
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_fast_preset_takes_first_reading() {
        let consensus = instant(ConsensusConfig::fast());
        let outcome = consensus.sample(scripted(&[None, Some("Shock"), Some("Opt")]));
        assert_eq!(outcome.state, ConsensusState::Decided("Shock".to_string()));
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_exhausted_run_yields_no_name() {
        let consensus = instant(ConsensusConfig::default());
        let outcome = consensus.sample(scripted(&[Some("Opt"), None, None, None, None]));
        assert_eq!(outcome.state, ConsensusState::Exhausted);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.name, None);
        assert_eq!(outcome.readings, vec!["Opt".to_string()]);
    }

    #[test]
    fn test_strict_preset_needs_two_readings() {
        let consensus = instant(ConsensusConfig::strict());
        let outcome = consensus.sample(scripted(&[Some("Opt")]));
        assert_eq!(outcome.state, ConsensusState::Exhausted);
        assert_eq!(outcome.name, None);

        let outcome = consensus.sample(scripted(&[Some("Opt"), Some("Opt")]));
        assert_eq!(outcome.name.as_deref(), Some("Opt"));
    }

    #[test]
    fn test_timeout_stops_sampling() {
        let consensus = instant(ConsensusConfig {
            timeout: Duration::ZERO,
            ..ConsensusConfig::default()
        });
        let outcome = consensus.sample(|_| Some("Opt".to_string()));
        assert_eq!(outcome.state, ConsensusState::Exhausted);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.name, None);
    }

    #[test]
    fn test_collect_with_closure_reader() {
        let consensus = instant(ConsensusConfig::default());
        let region = RgbImage::from_pixel(10, 4, Rgb([0, 0, 0]));
        let mut reader = |_: &RgbImage| Some("Counterspell".to_string());
        let outcome = consensus.collect(&mut reader, &region);
        assert_eq!(outcome.name.as_deref(), Some("Counterspell"));
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_title_region_bounds() {
        let frame = RgbImage::new(400, 300);
        let quad = Quad::new([(100.0, 50.0), (299.0, 50.0), (299.0, 249.0), (100.0, 249.0)]);
        let region = title_region(&frame, &quad, 0.05, 0.13).unwrap();
        assert_eq!(region.width(), 200);
        assert_eq!(region.height(), 16);
    }

    #[test]
    fn test_verify_acceptance_policy() {
        let mut card = CardRecord::new("id", "Lightning Bolt", "m10");
        card.mana_cost = "{R}".to_string();
        let policy = AcceptancePolicy::default();

        assert!(verify("Lightningbolt", &card, None, &policy).accepted);
        assert!(!verify("Shock", &card, None, &policy).accepted);

        let lenient = AcceptancePolicy {
            min_similarity: 0.9,
            mana_cost_similarity: Some(0.5),
        };
        let verdict = verify("Lightnigbot", &card, Some("{r}"), &lenient);
        assert!(verdict.mana_cost_matched);
        assert!(verdict.accepted, "{verdict:?}");
        assert!(!verify("Lightnigbot", &card, Some("{U}"), &lenient).accepted);
    }
}
