use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::{Date, OffsetDateTime, Time};

pub mod id;

pub use id::{is_canonical_id, mint_unique_id, ID_LENGTH};

/// Sentinel id carried by a card that has not been saved yet.
pub const NEW_CARD_ID: &str = "NEW_CARD";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryKeyError {
    #[error("entry key must be a small non-negative integer, got {0:?}")]
    NotAnInteger(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("card at position {0} has an empty id")]
    EmptyId(usize),
    #[error("duplicate card id {0}")]
    DuplicateId(String),
}

/// Stable key of an entry in one of the card's sparse sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey(u32);

impl EntryKey {
    /// Main description, or the icon slot for images.
    pub const PRIMARY: EntryKey = EntryKey(0);
    /// Cover image slot.
    pub const COVER: EntryKey = EntryKey(1);

    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryKey {
    type Err = EntryKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EntryKeyError::NotAnInteger(s.to_string()));
        }
        trimmed
            .parse::<u32>()
            .map(EntryKey)
            .map_err(|_| EntryKeyError::NotAnInteger(s.to_string()))
    }
}

impl Serialize for EntryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered `(key, value)` section of a card. Keys are explicit and survive
/// removals of their siblings; iteration is in ascending key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryMap<V>(BTreeMap<EntryKey, V>);

impl<V> Default for EntryMap<V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<V> EntryMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: EntryKey) -> Option<&V> {
        self.0.get(&key)
    }

    pub fn get_mut(&mut self, key: EntryKey) -> Option<&mut V> {
        self.0.get_mut(&key)
    }

    pub fn insert(&mut self, key: EntryKey, value: V) -> Option<V> {
        self.0.insert(key, value)
    }

    pub fn get_or_insert_with(&mut self, key: EntryKey, default: impl FnOnce() -> V) -> &mut V {
        self.0.entry(key).or_insert_with(default)
    }

    pub fn remove(&mut self, key: EntryKey) -> Option<V> {
        self.0.remove(&key)
    }

    pub fn contains_key(&self, key: EntryKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = EntryKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryKey, &V)> {
        self.0.iter().map(|(key, value)| (*key, value))
    }

    /// One past the largest key in use, so gaps left by removals are never
    /// handed out again.
    pub fn next_key(&self) -> EntryKey {
        self.0
            .keys()
            .next_back()
            .map(|key| key.next())
            .unwrap_or(EntryKey::PRIMARY)
    }
}

impl<V> FromIterator<(EntryKey, V)> for EntryMap<V> {
    fn from_iter<I: IntoIterator<Item = (EntryKey, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRef {
    pub image: String,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: LinkType,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkType {
    #[default]
    Website,
    Twitter,
    Discord,
    Github,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CardType {
    Highlight,
    #[default]
    Project,
    Tweet,
    Event,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    #[serde(default)]
    pub card_type: CardType,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    InProgress,
    Completed,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub start_date: String,
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: EntryMap<String>,
    #[serde(default, skip_serializing_if = "EntryMap::is_empty")]
    pub images: EntryMap<ImageRef>,
    #[serde(default, skip_serializing_if = "EntryMap::is_empty")]
    pub external_links: EntryMap<ExternalLink>,
    #[serde(default)]
    pub display_config: DisplayConfig,
    /// Fields this crate does not model; carried through saves untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Card {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            summary: None,
            start_date: String::new(),
            end_date: None,
            description: EntryMap::new(),
            images: EntryMap::new(),
            external_links: EntryMap::new(),
            display_config: DisplayConfig::default(),
            extra: serde_json::Map::new(),
        }
    }

    /// Blank card offered by "create new card": an empty main description
    /// plus empty icon and cover slots.
    pub fn draft() -> Self {
        let mut card = Self::new(NEW_CARD_ID);
        card.description.insert(EntryKey::PRIMARY, String::new());
        card.images.insert(EntryKey::PRIMARY, ImageRef::default());
        card.images.insert(EntryKey::COVER, ImageRef::default());
        card
    }

    pub fn is_draft(&self) -> bool {
        self.id == NEW_CARD_ID
    }

    pub fn card_type(&self) -> CardType {
        self.display_config.card_type
    }

    pub fn start(&self) -> Option<OffsetDateTime> {
        parse_card_date(&self.start_date)
    }

    /// End of the card's range; `None` for an ongoing card, including one
    /// whose end date does not parse.
    pub fn end(&self) -> Option<OffsetDateTime> {
        self.end_date.as_deref().and_then(parse_card_date)
    }

    pub fn is_ongoing(&self) -> bool {
        self.end().is_none()
    }

    pub fn status(&self) -> CardStatus {
        if self.is_ongoing() {
            CardStatus::InProgress
        } else {
            CardStatus::Completed
        }
    }

    pub fn main_description(&self) -> Option<&str> {
        self.description.get(EntryKey::PRIMARY).map(String::as_str)
    }

    pub fn icon(&self) -> Option<&ImageRef> {
        self.images
            .get(EntryKey::PRIMARY)
            .filter(|image| !image.image.is_empty())
    }
}

static DATE_ONLY: Lazy<Vec<FormatItem<'static>>> = Lazy::new(|| {
    time::format_description::parse("[year]-[month]-[day]")
        .expect("valid date format description")
});

/// Parses a card date. Bare `YYYY-MM-DD` dates are read as UTC midnight;
/// full RFC 3339 timestamps are also accepted.
pub fn parse_card_date(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = Date::parse(trimmed, &*DATE_ONLY) {
        return Some(date.with_time(Time::MIDNIGHT).assume_utc());
    }
    OffsetDateTime::parse(trimmed, &Rfc3339).ok()
}

pub fn find_card<'a>(cards: &'a [Card], id: &str) -> Option<&'a Card> {
    cards.iter().find(|card| card.id == id)
}

/// Checks the collection invariants the editor relies on: every card has a
/// non-empty id and no id appears twice.
pub fn validate_collection(cards: &[Card]) -> Result<(), CollectionError> {
    let mut seen = HashSet::with_capacity(cards.len());
    for (position, card) in cards.iter().enumerate() {
        if card.id.is_empty() {
            return Err(CollectionError::EmptyId(position));
        }
        if !seen.insert(card.id.as_str()) {
            return Err(CollectionError::DuplicateId(card.id.clone()));
        }
        if !is_canonical_id(&card.id) {
            tracing::warn!(id = %card.id, "card id does not use the minted format");
        }
        if card.main_description().is_none() {
            tracing::warn!(id = %card.id, "card has no main description");
        }
    }
    Ok(())
}
