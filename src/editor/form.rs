use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::cards::{Card, CardType, EntryKey, ExternalLink, ImageRef, LinkType};

use super::EditorError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown field path {0:?}")]
pub struct FieldPathError(pub String);

/// One of the card's sparse, integer-keyed sections.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Section {
    Description,
    Images,
    ExternalLinks,
}

/// Address of a single editable leaf of a card, written as a dotted path
/// such as `images.1.alt` or `displayConfig.cardType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldPath {
    Id,
    Name,
    CardType,
    Summary,
    StartDate,
    EndDate,
    Description(EntryKey),
    ImageSource(EntryKey),
    ImageAlt(EntryKey),
    LinkUrl(EntryKey),
    LinkLabel(EntryKey),
    LinkType(EntryKey),
}

impl FieldPath {
    pub fn entry(&self) -> Option<(Section, EntryKey)> {
        match *self {
            FieldPath::Description(key) => Some((Section::Description, key)),
            FieldPath::ImageSource(key) | FieldPath::ImageAlt(key) => {
                Some((Section::Images, key))
            }
            FieldPath::LinkUrl(key) | FieldPath::LinkLabel(key) | FieldPath::LinkType(key) => {
                Some((Section::ExternalLinks, key))
            }
            _ => None,
        }
    }

    pub fn with_key(&self, key: EntryKey) -> Self {
        match *self {
            FieldPath::Description(_) => FieldPath::Description(key),
            FieldPath::ImageSource(_) => FieldPath::ImageSource(key),
            FieldPath::ImageAlt(_) => FieldPath::ImageAlt(key),
            FieldPath::LinkUrl(_) => FieldPath::LinkUrl(key),
            FieldPath::LinkLabel(_) => FieldPath::LinkLabel(key),
            FieldPath::LinkType(_) => FieldPath::LinkType(key),
            other => other,
        }
    }

    pub fn label(&self) -> String {
        match *self {
            FieldPath::Id => "Card Id".into(),
            FieldPath::Name => "Name".into(),
            FieldPath::CardType => "Type".into(),
            FieldPath::Summary => "Summary".into(),
            FieldPath::StartDate => "Start Date".into(),
            FieldPath::EndDate => "End Date".into(),
            FieldPath::Description(key) if key.is_primary() => "Main Description".into(),
            FieldPath::Description(key) => format!("Additional Description ({key})"),
            FieldPath::ImageSource(key) => format!("{} Source", image_label(key)),
            FieldPath::ImageAlt(key) => format!("{} Alt Text", image_label(key)),
            FieldPath::LinkUrl(key) => format!("Link {key} URL"),
            FieldPath::LinkLabel(key) => format!("Link {key} Label"),
            FieldPath::LinkType(key) => format!("Link {key} Type"),
        }
    }

    /// Current value at this path, `None` when the card has nothing there.
    pub fn read(&self, card: &Card) -> Option<String> {
        match *self {
            FieldPath::Id => Some(card.id.clone()),
            FieldPath::Name => Some(card.name.clone()),
            FieldPath::CardType => Some(card.card_type().to_string()),
            FieldPath::Summary => card.summary.clone(),
            FieldPath::StartDate => Some(card.start_date.clone()),
            FieldPath::EndDate => card.end_date.clone(),
            FieldPath::Description(key) => card.description.get(key).cloned(),
            FieldPath::ImageSource(key) => card.images.get(key).map(|img| img.image.clone()),
            FieldPath::ImageAlt(key) => card.images.get(key).map(|img| img.alt.clone()),
            FieldPath::LinkUrl(key) => card.external_links.get(key).map(|l| l.url.clone()),
            FieldPath::LinkLabel(key) => card.external_links.get(key).map(|l| l.label.clone()),
            FieldPath::LinkType(key) => {
                card.external_links.get(key).map(|l| l.kind.to_string())
            }
        }
    }

    /// Writes `value` at this path, creating the enclosing entry when it does
    /// not exist yet. Sibling entries are never touched. Empty optional
    /// fields are stored as absent.
    pub fn write(&self, card: &mut Card, value: &str) {
        match *self {
            FieldPath::Id => card.id = value.to_string(),
            FieldPath::Name => card.name = value.to_string(),
            FieldPath::CardType => match value.parse::<CardType>() {
                Ok(card_type) => card.display_config.card_type = card_type,
                Err(_) => tracing::debug!(value, "ignoring unknown card type"),
            },
            FieldPath::Summary => card.summary = non_empty(value),
            FieldPath::StartDate => card.start_date = value.to_string(),
            FieldPath::EndDate => card.end_date = non_empty(value),
            FieldPath::Description(key) => {
                card.description.insert(key, value.to_string());
            }
            FieldPath::ImageSource(key) => image_entry(card, key).image = value.to_string(),
            FieldPath::ImageAlt(key) => image_entry(card, key).alt = value.to_string(),
            FieldPath::LinkUrl(key) => link_entry(card, key).url = value.to_string(),
            FieldPath::LinkLabel(key) => link_entry(card, key).label = value.to_string(),
            FieldPath::LinkType(key) => match value.parse::<LinkType>() {
                Ok(kind) => link_entry(card, key).kind = kind,
                Err(_) => tracing::debug!(value, "ignoring unknown link type"),
            },
        }
    }
}

fn image_label(key: EntryKey) -> String {
    match key.index() {
        0 => "Icon Image".into(),
        1 => "Cover Image".into(),
        _ => format!("Additional Image ({key})"),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn image_entry(card: &mut Card, key: EntryKey) -> &mut ImageRef {
    card.images.get_or_insert_with(key, ImageRef::default)
}

fn link_entry(card: &mut Card, key: EntryKey) -> &mut ExternalLink {
    card.external_links.get_or_insert_with(key, || ExternalLink {
        url: String::new(),
        label: String::new(),
        kind: LinkType::default(),
    })
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Id => f.write_str("id"),
            FieldPath::Name => f.write_str("name"),
            FieldPath::CardType => f.write_str("displayConfig.cardType"),
            FieldPath::Summary => f.write_str("summary"),
            FieldPath::StartDate => f.write_str("startDate"),
            FieldPath::EndDate => f.write_str("endDate"),
            FieldPath::Description(key) => write!(f, "description.{key}"),
            FieldPath::ImageSource(key) => write!(f, "images.{key}.image"),
            FieldPath::ImageAlt(key) => write!(f, "images.{key}.alt"),
            FieldPath::LinkUrl(key) => write!(f, "externalLinks.{key}.url"),
            FieldPath::LinkLabel(key) => write!(f, "externalLinks.{key}.label"),
            FieldPath::LinkType(key) => write!(f, "externalLinks.{key}.type"),
        }
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || FieldPathError(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        let key = |raw: &str| raw.parse::<EntryKey>().map_err(|_| unknown());
        let path = match parts.as_slice() {
            ["id"] => FieldPath::Id,
            ["name"] => FieldPath::Name,
            ["displayConfig", "cardType"] => FieldPath::CardType,
            ["summary"] => FieldPath::Summary,
            ["startDate"] => FieldPath::StartDate,
            ["endDate"] => FieldPath::EndDate,
            ["description", k] => FieldPath::Description(key(*k)?),
            ["images", k, "image"] => FieldPath::ImageSource(key(*k)?),
            ["images", k, "alt"] => FieldPath::ImageAlt(key(*k)?),
            ["externalLinks", k, "url"] => FieldPath::LinkUrl(key(*k)?),
            ["externalLinks", k, "label"] => FieldPath::LinkLabel(key(*k)?),
            ["externalLinks", k, "type"] => FieldPath::LinkType(key(*k)?),
            _ => return Err(unknown()),
        };
        Ok(path)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Controlled-input state of the editor form: the current string of every
/// field, in display order, plus the entries the user removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    values: IndexMap<FieldPath, String>,
    hidden: BTreeSet<(Section, EntryKey)>,
    /// Current description key -> key the entry had on the original card.
    moved_descriptions: BTreeMap<EntryKey, EntryKey>,
}

impl FormState {
    pub fn from_card(card: &Card) -> Self {
        let mut values = IndexMap::new();
        for path in [
            FieldPath::Id,
            FieldPath::Name,
            FieldPath::CardType,
            FieldPath::Summary,
            FieldPath::StartDate,
            FieldPath::EndDate,
        ] {
            values.insert(path, path.read(card).unwrap_or_default());
        }
        for (key, link) in card.external_links.iter() {
            values.insert(FieldPath::LinkUrl(key), link.url.clone());
            values.insert(FieldPath::LinkLabel(key), link.label.clone());
            values.insert(FieldPath::LinkType(key), link.kind.to_string());
        }
        for (key, text) in card.description.iter() {
            values.insert(FieldPath::Description(key), text.clone());
        }
        for (key, image) in card.images.iter() {
            values.insert(FieldPath::ImageSource(key), image.image.clone());
            values.insert(FieldPath::ImageAlt(key), image.alt.clone());
        }
        Self {
            values,
            hidden: BTreeSet::new(),
            moved_descriptions: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: FieldPath) -> Option<&str> {
        self.values.get(&path).map(String::as_str)
    }

    pub fn contains(&self, path: FieldPath) -> bool {
        self.values.contains_key(&path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldPath, &str)> {
        self.values.iter().map(|(path, value)| (*path, value.as_str()))
    }

    /// Fields the user can currently see, skipping removed entries.
    pub fn visible(&self) -> impl Iterator<Item = (FieldPath, &str)> {
        self.iter().filter(|(path, _)| match path.entry() {
            Some(entry) => !self.hidden.contains(&entry),
            None => true,
        })
    }

    pub fn is_hidden(&self, section: Section, key: EntryKey) -> bool {
        self.hidden.contains(&(section, key))
    }

    /// Key the description now stored under `key` had on the original card.
    pub fn original_description_key(&self, key: EntryKey) -> EntryKey {
        self.moved_descriptions.get(&key).copied().unwrap_or(key)
    }

    pub fn moved_descriptions(&self) -> impl Iterator<Item = (EntryKey, EntryKey)> + '_ {
        self.moved_descriptions
            .iter()
            .map(|(current, original)| (*original, *current))
    }

    pub fn set(&mut self, path: FieldPath, value: &str) -> Result<(), EditorError> {
        let Some(slot) = self.values.get_mut(&path) else {
            return Err(EditorError::UnknownField(path));
        };
        match path {
            FieldPath::CardType if value.parse::<CardType>().is_err() => {
                return Err(EditorError::InvalidValue {
                    path,
                    value: value.to_string(),
                });
            }
            FieldPath::LinkType(_) if value.parse::<LinkType>().is_err() => {
                return Err(EditorError::InvalidValue {
                    path,
                    value: value.to_string(),
                });
            }
            _ => {}
        }
        *slot = value.to_string();
        Ok(())
    }

    /// Keys held for `section`, removed entries included.
    pub fn keys(&self, section: Section) -> BTreeSet<EntryKey> {
        self.values
            .keys()
            .filter_map(|path| path.entry())
            .filter(|(entry_section, _)| *entry_section == section)
            .map(|(_, key)| key)
            .collect()
    }

    /// Appends an empty entry under a key no entry of the form has used.
    pub fn add_entry(&mut self, section: Section) -> EntryKey {
        let key = self
            .keys(section)
            .last()
            .map(|key| key.next())
            .unwrap_or(EntryKey::PRIMARY);
        let fields: Vec<(FieldPath, String)> = match section {
            Section::Description => vec![(FieldPath::Description(key), String::new())],
            Section::Images => vec![
                (FieldPath::ImageSource(key), String::new()),
                (FieldPath::ImageAlt(key), String::new()),
            ],
            Section::ExternalLinks => vec![
                (FieldPath::LinkUrl(key), String::new()),
                (FieldPath::LinkLabel(key), String::new()),
                (FieldPath::LinkType(key), LinkType::default().to_string()),
            ],
        };
        let anchor = self
            .values
            .keys()
            .rposition(|path| path.entry().map(|(s, _)| s) == Some(section));
        match anchor {
            Some(index) => {
                for (offset, (path, value)) in fields.into_iter().enumerate() {
                    self.values.shift_insert(index + 1 + offset, path, value);
                }
            }
            None => self.values.extend(fields),
        }
        key
    }

    /// Clears every field of the entry and hides it; siblings keep their keys.
    pub fn remove_entry(&mut self, section: Section, key: EntryKey) -> Result<(), EditorError> {
        if key.is_primary() && section != Section::ExternalLinks {
            return Err(EditorError::PrimaryEntry { section });
        }
        if !self.keys(section).contains(&key) {
            return Err(EditorError::UnknownEntry { section, key });
        }
        for (path, value) in self.values.iter_mut() {
            if path.entry() == Some((section, key)) {
                value.clear();
            }
        }
        self.hidden.insert((section, key));
        Ok(())
    }

    /// Moves a visible additional description to an unused key.
    pub fn rekey_description(&mut self, from: EntryKey, to: EntryKey) -> Result<(), EditorError> {
        if from.is_primary() || to.is_primary() {
            return Err(EditorError::PrimaryEntry {
                section: Section::Description,
            });
        }
        let keys = self.keys(Section::Description);
        if !keys.contains(&from) || self.is_hidden(Section::Description, from) {
            return Err(EditorError::UnknownEntry {
                section: Section::Description,
                key: from,
            });
        }
        if from == to {
            return Ok(());
        }
        if keys.contains(&to) {
            return Err(EditorError::KeyInUse(to));
        }

        let values = std::mem::take(&mut self.values);
        self.values = values
            .into_iter()
            .map(|(path, value)| match path {
                FieldPath::Description(key) if key == from => (FieldPath::Description(to), value),
                other => (other, value),
            })
            .collect();

        let original = self.moved_descriptions.remove(&from).unwrap_or(from);
        if original != to {
            self.moved_descriptions.insert(to, original);
        }
        Ok(())
    }
}
