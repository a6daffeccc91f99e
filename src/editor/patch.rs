use std::collections::BTreeSet;

use rand::Rng;
use serde::Serialize;

use crate::cards::{find_card, mint_unique_id, Card, EntryKey};

use super::form::{FieldPath, FormState, Section};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    Set { path: FieldPath, value: String },
    Remove { section: Section, key: EntryKey },
    /// Moves a description entry. All rekeys of a patch happen at once, so
    /// swapping two keys is a pair of rekeys.
    Rekey { from: EntryKey, to: EntryKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardChange {
    Update(Vec<PatchOp>),
    Create(Vec<PatchOp>),
    Delete,
}

/// Difference between the edited form and the card it was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub target: String,
    pub change: CardChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Unchanged { id: String },
    Updated { id: String },
    Created { id: String },
    Deleted { id: String },
}

impl ChangeOutcome {
    pub fn id(&self) -> &str {
        match self {
            ChangeOutcome::Unchanged { id }
            | ChangeOutcome::Updated { id }
            | ChangeOutcome::Created { id }
            | ChangeOutcome::Deleted { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionUpdate {
    pub cards: Vec<Card>,
    pub outcome: ChangeOutcome,
}

impl Patch {
    /// Diffs `form` against the card in `cards` whose id is `target`. When no
    /// card has that id the form describes a card to be created.
    pub fn compute(cards: &[Card], target: &str, form: &FormState) -> Self {
        let change = match find_card(cards, target) {
            Some(original) => diff_card(original, form),
            None => CardChange::Create(creation_ops(form)),
        };
        Self {
            target: target.to_string(),
            change,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(&self.change, CardChange::Update(ops) if ops.is_empty())
    }

    pub fn apply<R: Rng + ?Sized>(&self, cards: &[Card], rng: &mut R) -> CollectionUpdate {
        let position = cards.iter().position(|card| card.id == self.target);
        match (&self.change, position) {
            (CardChange::Delete, Some(index)) => {
                let mut updated = cards.to_vec();
                updated.remove(index);
                CollectionUpdate {
                    cards: updated,
                    outcome: ChangeOutcome::Deleted {
                        id: self.target.clone(),
                    },
                }
            }
            (CardChange::Update(ops), Some(index)) if !ops.is_empty() => {
                let mut updated = cards.to_vec();
                apply_ops(&mut updated[index], ops);
                CollectionUpdate {
                    cards: updated,
                    outcome: ChangeOutcome::Updated {
                        id: self.target.clone(),
                    },
                }
            }
            (CardChange::Create(ops), _) => {
                let id = mint_unique_id(cards, rng);
                let mut card = Card::new(id.clone());
                apply_ops(&mut card, ops);
                let mut updated = cards.to_vec();
                updated.push(card);
                CollectionUpdate {
                    cards: updated,
                    outcome: ChangeOutcome::Created { id },
                }
            }
            (change, position) => {
                if position.is_none() {
                    tracing::warn!(card_id = %self.target, ?change, "patch target no longer in collection");
                }
                CollectionUpdate {
                    cards: cards.to_vec(),
                    outcome: ChangeOutcome::Unchanged {
                        id: self.target.clone(),
                    },
                }
            }
        }
    }
}

/// Builds the collection that saving `form` would produce for the card
/// identified by `target`.
pub fn updated_collection<R: Rng + ?Sized>(
    cards: &[Card],
    target: &str,
    form: &FormState,
    rng: &mut R,
) -> CollectionUpdate {
    Patch::compute(cards, target, form).apply(cards, rng)
}

/// Whether an empty value at `path` drops its whole entry: additional
/// descriptions, additional images (by source) and any link (by url).
fn clears_entry(path: FieldPath) -> bool {
    match path {
        FieldPath::Description(key) => !key.is_primary(),
        FieldPath::ImageSource(key) => key.index() > 1,
        FieldPath::LinkUrl(_) => true,
        _ => false,
    }
}

fn has_entry(card: &Card, section: Section, key: EntryKey) -> bool {
    match section {
        Section::Description => card.description.contains_key(key),
        Section::Images => card.images.contains_key(key),
        Section::ExternalLinks => card.external_links.contains_key(key),
    }
}

pub fn diff_card(original: &Card, form: &FormState) -> CardChange {
    if form.get(FieldPath::Id) == Some("") {
        return CardChange::Delete;
    }

    let mut ops: Vec<PatchOp> = form
        .moved_descriptions()
        .filter(|(from, _)| original.description.contains_key(*from))
        .map(|(from, to)| PatchOp::Rekey { from, to })
        .collect();

    let mut dropped = BTreeSet::new();
    for (path, value) in form.iter() {
        if path == FieldPath::Id {
            continue;
        }
        let source = match path.entry() {
            Some((section, key)) => {
                if dropped.contains(&(section, key)) {
                    continue;
                }
                let source_key = if section == Section::Description {
                    form.original_description_key(key)
                } else {
                    key
                };
                let source = path.with_key(source_key);
                let existed = has_entry(original, section, source_key);
                // an entry already stored with an empty value stays as it is
                let emptied = !existed
                    || form.is_hidden(section, key)
                    || source.read(original).unwrap_or_default() != value;
                if value.is_empty() && clears_entry(path) && emptied {
                    dropped.insert((section, key));
                    if existed {
                        ops.push(PatchOp::Remove { section, key });
                    }
                    continue;
                }
                source
            }
            None => path,
        };
        let before = source.read(original).unwrap_or_default();
        if before != value {
            ops.push(PatchOp::Set {
                path,
                value: value.to_string(),
            });
        }
    }
    CardChange::Update(ops)
}

/// Every non-empty value of the form, skipping entries that would be
/// dropped. The main description is always written.
fn creation_ops(form: &FormState) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    let mut dropped = BTreeSet::new();
    for (path, value) in form.iter() {
        if path == FieldPath::Id {
            continue;
        }
        if let Some(entry) = path.entry() {
            if dropped.contains(&entry) {
                continue;
            }
            if value.is_empty() && clears_entry(path) {
                dropped.insert(entry);
                continue;
            }
        }
        if value.is_empty() && path != FieldPath::Description(EntryKey::PRIMARY) {
            continue;
        }
        ops.push(PatchOp::Set {
            path,
            value: value.to_string(),
        });
    }
    if !form.contains(FieldPath::Description(EntryKey::PRIMARY)) {
        ops.push(PatchOp::Set {
            path: FieldPath::Description(EntryKey::PRIMARY),
            value: String::new(),
        });
    }
    ops
}

pub fn apply_ops(card: &mut Card, ops: &[PatchOp]) {
    let moved: Vec<(EntryKey, String)> = ops
        .iter()
        .filter_map(|op| match op {
            PatchOp::Rekey { from, to } => card.description.remove(*from).map(|text| (*to, text)),
            _ => None,
        })
        .collect();
    for (key, text) in moved {
        card.description.insert(key, text);
    }

    for op in ops {
        match op {
            PatchOp::Set { path, value } => path.write(card, value),
            PatchOp::Remove { section, key } => match section {
                Section::Description => {
                    card.description.remove(*key);
                }
                Section::Images => {
                    card.images.remove(*key);
                }
                Section::ExternalLinks => {
                    card.external_links.remove(*key);
                }
            },
            PatchOp::Rekey { .. } => {}
        }
    }
}
