//! Bin routing.
//!
//! [`route`] is a pure function of a card, a sorting mode and a price
//! threshold. Rejection is an ordinary outcome: an absent card, a missing
//! attribute or a value outside a mode's table all yield [`BinLabel::Reject`].

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::catalog::{CardRecord, CardType};
use crate::error::CardsortError;

/// Wire form of the reject bin.
pub const REJECT: &str = "RejectCard";

/// Threshold used by `price` mode so that every tray is reachable.
pub const UNLIMITED_THRESHOLD: f64 = 1_000_000.0;

/// Ascending (upper bound, tray) pairs; the last bound is unbounded.
pub const PRICE_TIERS: [(f64, &str); 14] = [
    (0.02, "tray1"),
    (0.05, "tray7"),
    (0.10, "tray14"),
    (0.25, "tray18"),
    (0.50, "tray21"),
    (1.0, "tray24"),
    (2.0, "tray25"),
    (4.0, "tray26"),
    (8.0, "tray27"),
    (16.0, "tray28"),
    (32.0, "tray29"),
    (64.0, "tray30"),
    (128.0, "tray31"),
    (f64::INFINITY, "tray32"),
];

const BASIC_LANDS: [&str; 6] = ["plains", "island", "swamp", "mountain", "forest", "wastes"];

const MANA_VALUE_LABELS: [&str; 8] = ["One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingMode {
    Color,
    ManaValue,
    Set,
    Price,
    Type,
    Buy,
}

impl SortingMode {
    pub const ALL: [SortingMode; 6] = [
        SortingMode::Color,
        SortingMode::ManaValue,
        SortingMode::Set,
        SortingMode::Price,
        SortingMode::Type,
        SortingMode::Buy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortingMode::Color => "color",
            SortingMode::ManaValue => "mana_value",
            SortingMode::Set => "set",
            SortingMode::Price => "price",
            SortingMode::Type => "type",
            SortingMode::Buy => "buy",
        }
    }

    /// Modes that consult the collection tracker.
    pub fn tracks_collection(self) -> bool {
        matches!(self, SortingMode::Set | SortingMode::Buy)
    }
}

impl fmt::Display for SortingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts mode names (`mana_value`, `mana-value`, `cmc`) and the operator
/// menu digits `1`–`6`.
impl FromStr for SortingMode {
    type Err = CardsortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "color" => Ok(SortingMode::Color),
            "2" | "mana_value" | "mana-value" | "cmc" => Ok(SortingMode::ManaValue),
            "3" | "set" => Ok(SortingMode::Set),
            "4" | "price" => Ok(SortingMode::Price),
            "5" | "type" => Ok(SortingMode::Type),
            "6" | "buy" => Ok(SortingMode::Buy),
            other => Err(CardsortError::ConfigError(format!(
                "Unknown sorting mode '{other}'"
            ))),
        }
    }
}

/// Routing result handed to the actuator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum BinLabel {
    Bin(String),
    Reject,
}

impl BinLabel {
    pub fn bin(label: impl Into<String>) -> Self {
        BinLabel::Bin(label.into())
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, BinLabel::Reject)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BinLabel::Bin(label) => label,
            BinLabel::Reject => REJECT,
        }
    }
}

impl fmt::Display for BinLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BinLabel> for String {
    fn from(label: BinLabel) -> Self {
        label.as_str().to_string()
    }
}

impl From<Option<String>> for BinLabel {
    fn from(label: Option<String>) -> Self {
        label.map_or(BinLabel::Reject, BinLabel::Bin)
    }
}

/// Route a card to a bin.
///
/// `threshold` only matters in `buy` mode; `price` mode always uses
/// [`UNLIMITED_THRESHOLD`].
pub fn route(card: Option<&CardRecord>, mode: SortingMode, threshold: f64) -> BinLabel {
    let Some(card) = card else {
        return BinLabel::Reject;
    };
    let label = match mode {
        SortingMode::Color => Some(color_bin(card)),
        SortingMode::ManaValue => card.mana_value.and_then(mana_value_bin).map(str::to_string),
        SortingMode::Set => set_bin(card),
        SortingMode::Price => price_bin(card.price.as_deref(), UNLIMITED_THRESHOLD),
        SortingMode::Buy => price_bin(card.price.as_deref(), threshold),
        SortingMode::Type => type_bin(card),
    };
    label.into()
}

fn color_bin(card: &CardRecord) -> String {
    if card.is_land() {
        let basic = BASIC_LANDS.contains(&card.name.to_lowercase().as_str());
        return if basic { "Basic land" } else { "Nonbasic land" }.to_string();
    }
    match card.colors.as_slice() {
        [] => "Colorless".to_string(),
        [single] => color_name(single),
        _ => "Multicolor".to_string(),
    }
}

fn color_name(code: &str) -> String {
    match code.trim().to_uppercase().as_str() {
        "W" => "White".to_string(),
        "U" => "Blue".to_string(),
        "B" => "Black".to_string(),
        "R" => "Red".to_string(),
        "G" => "Green".to_string(),
        "" => "Colorless".to_string(),
        _ => code.to_string(),
    }
}

/// `One` for mana value ≤ 1, then the ceiling spelled out up to `Eight`.
pub fn mana_value_bin(mana_value: f64) -> Option<&'static str> {
    if !mana_value.is_finite() || mana_value < 0.0 {
        return None;
    }
    if mana_value <= 1.0 {
        return Some(MANA_VALUE_LABELS[0]);
    }
    let ceiling = mana_value.ceil() as usize;
    MANA_VALUE_LABELS.get(ceiling - 1).copied()
}

fn set_bin(card: &CardRecord) -> Option<String> {
    if card.is_token() {
        return Some(CardType::Token.as_str().to_string());
    }
    let code = card.set_code.trim().to_lowercase();
    (!code.is_empty()).then_some(code)
}

fn type_bin(card: &CardRecord) -> Option<String> {
    CardType::PRIORITY
        .into_iter()
        .find(|t| card.has_type(*t))
        .map(|t| t.as_str().to_string())
}

/// Parse a currency-formatted price such as `$1,234.50`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

/// First tier whose bound covers both the price and the threshold test.
pub fn price_bin(raw: Option<&str>, threshold: f64) -> Option<String> {
    let price = parse_price(raw?)?;
    PRICE_TIERS
        .iter()
        .find(|(bound, _)| price <= *bound && price <= threshold)
        .map(|(_, tray)| tray.to_string())
}
