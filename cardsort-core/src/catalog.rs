//! Card catalog: typed records loaded once from a vendor snapshot.
//!
//! The vendor publishes the catalog as one large JSON array of card objects.
//! Snapshots are stored as `<prefix>*.json` files; the newest by modification
//! time wins. Individual records that fail to parse are skipped, missing
//! attributes are defaulted, and only an absent or unreadable snapshot is
//! fatal.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{CardsortError, Result};

/// Type tags recognized on a card's type line.
///
/// Declaration order is the routing priority used by the `type` sorting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Creature,
    Artifact,
    Enchantment,
    Instant,
    Sorcery,
    Battle,
    Planeswalker,
    Land,
    Token,
}

impl CardType {
    /// All tags in routing priority order.
    pub const PRIORITY: [CardType; 9] = [
        CardType::Creature,
        CardType::Artifact,
        CardType::Enchantment,
        CardType::Instant,
        CardType::Sorcery,
        CardType::Battle,
        CardType::Planeswalker,
        CardType::Land,
        CardType::Token,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CardType::Creature => "creature",
            CardType::Artifact => "artifact",
            CardType::Enchantment => "enchantment",
            CardType::Instant => "instant",
            CardType::Sorcery => "sorcery",
            CardType::Battle => "battle",
            CardType::Planeswalker => "planeswalker",
            CardType::Land => "land",
            CardType::Token => "token",
        }
    }

    /// Tags whose name occurs anywhere in `type_line`, case-insensitively.
    pub fn tags_from_type_line(type_line: &str) -> Vec<CardType> {
        let lower = type_line.to_lowercase();
        Self::PRIORITY
            .into_iter()
            .filter(|t| lower.contains(t.as_str()))
            .collect()
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardRecord {
    pub id: String,
    pub name: String,
    pub set_code: String,
    pub colors: Vec<String>,
    pub color_identity: Vec<String>,
    pub mana_value: Option<f64>,
    pub types: Vec<CardType>,
    /// Raw vendor price (USD), kept as the decimal string the vendor sent.
    pub price: Option<String>,
    pub mana_cost: String,
    pub promo: bool,
    pub illustration_id: Option<String>,
    pub lang: String,
    pub games: Vec<String>,
    pub digital: bool,
    pub image_url: Option<String>,
}

impl CardRecord {
    /// A minimal record with every optional attribute defaulted.
    pub fn new(id: impl Into<String>, name: impl Into<String>, set_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            set_code: set_code.into(),
            colors: Vec::new(),
            color_identity: Vec::new(),
            mana_value: None,
            types: Vec::new(),
            price: None,
            mana_cost: "???".to_string(),
            promo: false,
            illustration_id: None,
            lang: "en".to_string(),
            games: vec!["paper".to_string()],
            digital: false,
            image_url: None,
        }
    }

    pub fn has_type(&self, card_type: CardType) -> bool {
        self.types.contains(&card_type)
    }

    pub fn is_land(&self) -> bool {
        self.has_type(CardType::Land)
    }

    pub fn is_token(&self) -> bool {
        self.has_type(CardType::Token)
    }

    /// Whether the card exists as a physical printing.
    pub fn is_paper(&self) -> bool {
        self.games.iter().any(|g| g == "paper")
    }

    /// Price formatted as `$x.xx`, if the vendor price parses.
    pub fn formatted_price(&self) -> Option<String> {
        let raw = self.price.as_deref()?;
        let value: f64 = raw.trim().parse().ok()?;
        Some(format!("${value:.2}"))
    }

    /// Mana cost with braces removed and symbols uppercased (`{2}{u}` → `2U`).
    pub fn normalized_mana_cost(&self) -> String {
        normalize_mana_cost(&self.mana_cost)
    }
}

/// Normalize a mana-cost string for comparison.
pub fn normalize_mana_cost(cost: &str) -> String {
    cost.to_uppercase().replace(['{', '}'], "")
}

#[derive(Debug, Deserialize)]
struct RawPrices {
    usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImageUris {
    png: Option<String>,
}

/// Vendor card object; every field except the id may be absent or null.
#[derive(Debug, Deserialize)]
struct RawCard {
    id: String,
    name: Option<String>,
    set: Option<String>,
    colors: Option<Vec<String>>,
    color_identity: Option<Vec<String>>,
    cmc: Option<f64>,
    mana_cost: Option<String>,
    type_line: Option<String>,
    prices: Option<RawPrices>,
    games: Option<Vec<String>>,
    illustration_id: Option<String>,
    lang: Option<String>,
    digital: Option<bool>,
    promo: Option<bool>,
    image_uris: Option<RawImageUris>,
}

impl From<RawCard> for CardRecord {
    fn from(raw: RawCard) -> Self {
        let types = raw
            .type_line
            .as_deref()
            .map(CardType::tags_from_type_line)
            .unwrap_or_default();

        Self {
            id: raw.id,
            name: raw.name.unwrap_or_else(|| "Unknown".to_string()),
            set_code: raw.set.unwrap_or_else(|| "???".to_string()),
            colors: raw.colors.unwrap_or_default(),
            color_identity: raw.color_identity.unwrap_or_default(),
            mana_value: raw.cmc,
            types,
            price: raw.prices.and_then(|p| p.usd),
            mana_cost: raw.mana_cost.unwrap_or_else(|| "???".to_string()),
            promo: raw.promo.unwrap_or(false),
            illustration_id: raw.illustration_id,
            lang: raw.lang.unwrap_or_else(|| "en".to_string()),
            // Snapshots that omit availability predate digital-only printings.
            games: raw.games.unwrap_or_else(|| vec!["paper".to_string()]),
            digital: raw.digital.unwrap_or(false),
            image_url: raw.image_uris.and_then(|u| u.png),
        }
    }
}

/// In-memory catalog indexed by card id.
#[derive(Debug, Default)]
pub struct Catalog {
    cards: Vec<CardRecord>,
    by_id: HashMap<String, usize>,
    source: Option<PathBuf>,
}

impl Catalog {
    /// Build a catalog from records. A repeated id replaces the earlier record.
    pub fn from_records(records: impl IntoIterator<Item = CardRecord>) -> Self {
        let mut catalog = Self::default();
        for record in records {
            match catalog.by_id.get(&record.id) {
                Some(&idx) => catalog.cards[idx] = record,
                None => {
                    catalog.by_id.insert(record.id.clone(), catalog.cards.len());
                    catalog.cards.push(record);
                }
            }
        }
        catalog
    }

    /// Parse a vendor snapshot.
    ///
    /// The top level must be a JSON array; entries that are null or do not
    /// deserialize into a card are skipped.
    pub fn from_json_slice(data: &[u8]) -> Result<Self> {
        let entries: Vec<serde_json::Value> = serde_json::from_slice(data)
            .map_err(|e| CardsortError::CatalogError(format!("Invalid catalog JSON: {e}")))?;

        let total = entries.len();
        let mut skipped = 0usize;
        let records: Vec<CardRecord> = entries
            .into_iter()
            .filter_map(|entry| {
                if entry.is_null() {
                    skipped += 1;
                    return None;
                }
                match serde_json::from_value::<RawCard>(entry) {
                    Ok(raw) => Some(CardRecord::from(raw)),
                    Err(e) => {
                        debug!(error = %e, "Skipping malformed catalog entry");
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();

        if skipped > 0 {
            warn!(skipped, total, "Skipped malformed catalog entries");
        }

        Ok(Self::from_records(records))
    }

    /// Load a specific snapshot file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            CardsortError::CatalogError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut catalog = Self::from_json_slice(&data)?;
        catalog.source = Some(path.to_path_buf());
        info!(cards = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// Load the most recently modified `<prefix>*.json` snapshot in `dir`.
    pub fn load_newest(dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = newest_snapshot(dir.as_ref(), prefix)?;
        Self::load(path)
    }

    pub fn get(&self, id: &str) -> Option<&CardRecord> {
        self.by_id.get(id).map(|&idx| &self.cards[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardRecord> {
        self.cards.iter()
    }

    /// Snapshot file this catalog was loaded from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Whether a card is a paper printing outside the excluded sets.
    pub fn is_allowed(&self, id: &str, excluded_sets: &BTreeSet<String>) -> bool {
        self.get(id).is_some_and(|card| {
            card.is_paper() && !excluded_sets.contains(&card.set_code.to_lowercase())
        })
    }

    /// First English paper printing sharing the card's illustration.
    pub fn english_printing_of(
        &self,
        id: &str,
        excluded_sets: &BTreeSet<String>,
    ) -> Option<&CardRecord> {
        let illustration = self.get(id)?.illustration_id.as_deref()?;
        self.cards.iter().find(|c| {
            c.illustration_id.as_deref() == Some(illustration)
                && c.lang == "en"
                && c.is_paper()
                && !excluded_sets.contains(&c.set_code.to_lowercase())
        })
    }
}

/// Every `<prefix>*.json` file in `dir`.
pub fn snapshot_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(prefix) && name.ends_with(".json") && entry.path().is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// The newest `<prefix>*.json` file in `dir` by modification time.
pub fn newest_snapshot(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let not_found = || CardsortError::CatalogNotFound {
        dir: dir.to_path_buf(),
        pattern: format!("{prefix}*.json"),
    };

    snapshot_files(dir, prefix)?
        .into_iter()
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .max()
        .map(|(_, path)| path)
        .ok_or_else(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"[
        {
            "id": "aaa-1",
            "name": "Llanowar Elves",
            "set": "DOM",
            "colors": ["G"],
            "color_identity": ["G"],
            "cmc": 1.0,
            "mana_cost": "{G}",
            "type_line": "Creature — Elf Druid",
            "prices": {"usd": "0.25"},
            "games": ["paper", "mtgo"],
            "illustration_id": "ill-1",
            "lang": "en",
            "digital": false,
            "image_uris": {"png": "https://img.example/aaa-1.png"}
        },
        null,
        {"name": "no id here"},
        {
            "id": "bbb-2",
            "name": "Goblin",
            "set": "tm19",
            "type_line": "Token Creature — Goblin",
            "prices": {"usd": null},
            "colors": null
        }
    ]"#;

    #[test]
    fn test_type_tags_from_type_line() {
        assert_eq!(
            CardType::tags_from_type_line("Artifact Creature — Golem"),
            vec![CardType::Creature, CardType::Artifact]
        );
        assert_eq!(
            CardType::tags_from_type_line("Basic Land — Forest"),
            vec![CardType::Land]
        );
        assert!(CardType::tags_from_type_line("Conspiracy").is_empty());
    }

    #[test]
    fn test_catalog_skips_malformed_entries() {
        let catalog = Catalog::from_json_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("aaa-1"));
        assert!(catalog.contains("bbb-2"));
    }

    #[test]
    fn test_catalog_record_fields() {
        let catalog = Catalog::from_json_slice(SAMPLE.as_bytes()).unwrap();
        let elves = catalog.get("aaa-1").unwrap();
        assert_eq!(elves.name, "Llanowar Elves");
        assert_eq!(elves.set_code, "DOM");
        assert_eq!(elves.colors, vec!["G".to_string()]);
        assert_eq!(elves.mana_value, Some(1.0));
        assert_eq!(elves.types, vec![CardType::Creature]);
        assert_eq!(elves.price.as_deref(), Some("0.25"));
        assert_eq!(elves.formatted_price().as_deref(), Some("$0.25"));
        assert_eq!(elves.normalized_mana_cost(), "G");
        assert_eq!(elves.image_url.as_deref(), Some("https://img.example/aaa-1.png"));
        assert!(elves.is_paper());
    }

    #[test]
    fn test_catalog_defaults_missing_fields() {
        let catalog = Catalog::from_json_slice(SAMPLE.as_bytes()).unwrap();
        let goblin = catalog.get("bbb-2").unwrap();
        assert!(goblin.colors.is_empty());
        assert_eq!(goblin.price, None);
        assert_eq!(goblin.formatted_price(), None);
        assert_eq!(goblin.mana_cost, "???");
        assert_eq!(goblin.mana_value, None);
        assert!(goblin.is_token());
        assert!(goblin.is_paper());
        assert!(catalog.is_allowed("bbb-2", &BTreeSet::new()));
    }

    #[test]
    fn test_catalog_rejects_non_array() {
        let err = Catalog::from_json_slice(br#"{"id": "x"}"#).unwrap_err();
        assert!(matches!(err, CardsortError::CatalogError(_)));
    }

    #[test]
    fn test_duplicate_ids_keep_last() {
        let catalog = Catalog::from_records([
            CardRecord::new("x", "First", "aaa"),
            CardRecord::new("x", "Second", "bbb"),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("x").unwrap().name, "Second");
    }

    #[test]
    fn test_is_allowed_and_english_printing() {
        let excluded: BTreeSet<String> = ["lea".to_string()].into_iter().collect();

        let mut alpha = CardRecord::new("alpha", "Shock", "LEA");
        alpha.illustration_id = Some("art".into());
        let mut german = CardRecord::new("de", "Schock", "m19");
        german.lang = "de".into();
        german.illustration_id = Some("art".into());
        let mut english = CardRecord::new("en", "Shock", "m19");
        english.illustration_id = Some("art".into());

        let catalog = Catalog::from_records([alpha, german, english]);
        assert!(!catalog.is_allowed("alpha", &excluded));
        assert!(catalog.is_allowed("de", &excluded));
        assert!(!catalog.is_allowed("missing", &excluded));

        let printing = catalog.english_printing_of("de", &excluded).unwrap();
        assert_eq!(printing.id, "en");
    }

    #[test]
    fn test_newest_snapshot_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("default-20240101.json");
        let new = dir.path().join("default-20230101.json");
        std::fs::write(&old, "[]").unwrap();
        std::fs::write(&new, "[]").unwrap();
        std::fs::write(dir.path().join("other.json"), "[]").unwrap();

        let base = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(base)
            .unwrap();
        std::fs::File::options()
            .write(true)
            .open(&new)
            .unwrap()
            .set_modified(base + Duration::from_secs(60))
            .unwrap();

        assert_eq!(newest_snapshot(dir.path(), "default").unwrap(), new);
    }

    #[test]
    fn test_newest_snapshot_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = newest_snapshot(dir.path(), "default").unwrap_err();
        assert!(matches!(err, CardsortError::CatalogNotFound { .. }));
    }
}
