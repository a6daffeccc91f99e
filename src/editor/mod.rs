//! Card editing session: the form, change detection against the card the
//! editor was opened for, and the save/delete lifecycle.

use std::time::Duration;

use rand::Rng;

use crate::cards::{find_card, Card, EntryKey, EntryKeyError};
use crate::persist::PersistError;

pub mod form;
pub mod notice;
pub mod patch;

pub use form::{FieldPath, FieldPathError, FormState, Section};
pub use notice::{Notice, NoticeId, NoticeLevel, Notices, UNKNOWN_ERROR_MESSAGE};
pub use patch::{
    diff_card, updated_collection, CardChange, ChangeOutcome, CollectionUpdate, Patch, PatchOp,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("no card with id {0}")]
    UnknownCard(String),
    #[error("field {0} is not part of this card")]
    UnknownField(FieldPath),
    #[error("invalid value {value:?} for {path}")]
    InvalidValue { path: FieldPath, value: String },
    #[error("the first {section} entry cannot be removed or moved")]
    PrimaryEntry { section: Section },
    #[error("no {section} entry with key {key}")]
    UnknownEntry { section: Section, key: EntryKey },
    #[error("key {0} is already used")]
    KeyInUse(EntryKey),
    #[error(transparent)]
    InvalidKey(#[from] EntryKeyError),
    #[error("the card id can only be cleared")]
    IdReadOnly,
    #[error("a card that was never saved cannot be deleted")]
    CannotDeleteDraft,
    #[error("a save is already in progress")]
    SaveInFlight,
    #[error("no save is in progress")]
    NoSaveInFlight,
    #[error("the editor is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Save,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorPhase {
    Clean,
    Dirty,
    Saving(SaveKind),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    Closed,
    Refused,
}

/// Collection to hand to the store for a save or delete that is now in
/// flight.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub kind: SaveKind,
    pub cards: Vec<Card>,
    pub outcome: ChangeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResolution {
    Saved(ChangeOutcome),
    Failed,
}

#[derive(Debug, Clone)]
struct PendingSave {
    kind: SaveKind,
    outcome: ChangeOutcome,
    restore_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CardEditor {
    cards: Vec<Card>,
    snapshot: Card,
    form: FormState,
    phase: EditorPhase,
    pending: Option<PendingSave>,
    notices: Notices,
}

impl CardEditor {
    /// Opens the card `id` of `cards` for editing.
    pub fn open(cards: Vec<Card>, id: &str) -> Result<Self, EditorError> {
        let snapshot = find_card(&cards, id)
            .cloned()
            .ok_or_else(|| EditorError::UnknownCard(id.to_string()))?;
        Ok(Self::with_snapshot(cards, snapshot))
    }

    /// Opens a blank draft that will become a new card on save.
    pub fn create(cards: Vec<Card>) -> Self {
        Self::with_snapshot(cards, Card::draft())
    }

    fn with_snapshot(cards: Vec<Card>, snapshot: Card) -> Self {
        let form = FormState::from_card(&snapshot);
        tracing::debug!(id = %snapshot.id, fields = form.iter().count(), "editor opened");
        Self {
            cards,
            snapshot,
            form,
            phase: EditorPhase::Clean,
            pending: None,
            notices: Notices::default(),
        }
    }

    pub fn with_notice_duration(mut self, duration: Duration) -> Self {
        self.notices = Notices::new(duration);
        self
    }

    pub fn title(&self) -> String {
        if self.is_new() {
            "Create new card".to_string()
        } else {
            format!("Edit: {}", self.snapshot.name)
        }
    }

    pub fn is_new(&self) -> bool {
        self.snapshot.is_draft()
    }

    pub fn target(&self) -> &str {
        &self.snapshot.id
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    pub fn phase(&self) -> EditorPhase {
        self.phase
    }

    pub fn is_dirty(&self) -> bool {
        self.phase == EditorPhase::Dirty
    }

    pub fn is_saving(&self) -> bool {
        matches!(self.phase, EditorPhase::Saving(_))
    }

    pub fn is_closed(&self) -> bool {
        self.phase == EditorPhase::Closed
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut Notices {
        &mut self.notices
    }

    pub fn set_field(&mut self, path: FieldPath, value: &str) -> Result<(), EditorError> {
        self.ensure_editable()?;
        if path == FieldPath::Id && value != self.snapshot.id && (self.is_new() || !value.is_empty())
        {
            return Err(EditorError::IdReadOnly);
        }
        self.form.set(path, value)?;
        self.refresh();
        Ok(())
    }

    pub fn add_entry(&mut self, section: Section) -> Result<EntryKey, EditorError> {
        self.ensure_editable()?;
        let key = self.form.add_entry(section);
        self.refresh();
        Ok(key)
    }

    pub fn remove_entry(&mut self, section: Section, key: EntryKey) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.form.remove_entry(section, key)?;
        self.refresh();
        Ok(())
    }

    /// Moves description `from` to the key typed in `to`. A rejected move
    /// raises the index-update notice as well as returning the error.
    pub fn rekey_description(&mut self, from: EntryKey, to: &str) -> Result<(), EditorError> {
        self.ensure_editable()?;
        let result = to
            .parse::<EntryKey>()
            .map_err(EditorError::from)
            .and_then(|to| self.form.rekey_description(from, to));
        match result {
            Ok(()) => {
                self.refresh();
                Ok(())
            }
            Err(err) => {
                self.notices.raise(Notice::error(
                    NoticeId::IndexUpdateError,
                    "Error updating index",
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    pub fn patch(&self) -> Patch {
        Patch::compute(&self.cards, self.target(), &self.form)
    }

    /// Implicit close (escape, clicking outside). Refused while there are
    /// unsaved changes or a save is running.
    pub fn request_dismiss(&mut self) -> DismissOutcome {
        match self.phase {
            EditorPhase::Dirty => {
                self.notices.raise(Notice::warning(
                    NoticeId::DataChanged,
                    "Data has changed",
                    "Save or cancel the changes",
                ));
                DismissOutcome::Refused
            }
            EditorPhase::Saving(_) => DismissOutcome::Refused,
            EditorPhase::Clean | EditorPhase::Closed => {
                self.close();
                DismissOutcome::Closed
            }
        }
    }

    /// Explicit cancel; discards the form unless a save is still in flight.
    pub fn cancel(&mut self) -> Result<(), EditorError> {
        if let Some(pending) = &self.pending {
            tracing::info!(kind = ?pending.kind, "cancel refused while a save is in flight");
            return Err(EditorError::SaveInFlight);
        }
        self.close();
        Ok(())
    }

    pub fn begin_save<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<SaveRequest, EditorError> {
        self.begin(SaveKind::Save, None, rng)
    }

    /// Deletes the card by clearing its id and saving. The id comes back if
    /// the store rejects the update.
    pub fn begin_delete<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<SaveRequest, EditorError> {
        self.ensure_editable()?;
        if self.is_new() {
            return Err(EditorError::CannotDeleteDraft);
        }
        let previous = self.form.get(FieldPath::Id).unwrap_or_default().to_string();
        self.form.set(FieldPath::Id, "")?;
        self.begin(SaveKind::Delete, Some(previous), rng)
    }

    fn begin<R: Rng + ?Sized>(
        &mut self,
        kind: SaveKind,
        restore_id: Option<String>,
        rng: &mut R,
    ) -> Result<SaveRequest, EditorError> {
        self.ensure_editable()?;
        let update = self.patch().apply(&self.cards, rng);
        tracing::info!(?kind, outcome = ?update.outcome, cards = update.cards.len(), "dispatching card update");
        self.pending = Some(PendingSave {
            kind,
            outcome: update.outcome.clone(),
            restore_id,
        });
        self.phase = EditorPhase::Saving(kind);
        Ok(SaveRequest {
            kind,
            cards: update.cards,
            outcome: update.outcome,
        })
    }

    /// Resolves the in-flight save with the store's answer. Success closes
    /// the editor; failure raises a notice and keeps the form open.
    pub fn finish_save(
        &mut self,
        result: Result<(), PersistError>,
    ) -> Result<SaveResolution, EditorError> {
        let pending = self.pending.take().ok_or(EditorError::NoSaveInFlight)?;
        match result {
            Ok(()) => {
                self.close();
                Ok(SaveResolution::Saved(pending.outcome))
            }
            Err(err) => {
                if let Some(id) = pending.restore_id {
                    self.form.set(FieldPath::Id, &id)?;
                }
                let (id, title) = match pending.kind {
                    SaveKind::Save => (NoticeId::SaveError, "Error saving data"),
                    SaveKind::Delete => (NoticeId::DeleteError, "Error deleting data"),
                };
                if !self.is_closed() {
                    self.notices
                        .raise(Notice::error(id, title, err.user_message()));
                    self.refresh();
                }
                Ok(SaveResolution::Failed)
            }
        }
    }

    fn ensure_editable(&self) -> Result<(), EditorError> {
        match self.phase {
            EditorPhase::Saving(_) => Err(EditorError::SaveInFlight),
            EditorPhase::Closed => Err(EditorError::Closed),
            EditorPhase::Clean | EditorPhase::Dirty => Ok(()),
        }
    }

    fn refresh(&mut self) {
        // dirty means saving would change the stored card
        let dirty = match diff_card(&self.snapshot, &self.form) {
            CardChange::Update(ops) => {
                let mut patched = self.snapshot.clone();
                patch::apply_ops(&mut patched, &ops);
                patched != self.snapshot
            }
            CardChange::Create(_) | CardChange::Delete => true,
        };
        self.phase = if dirty {
            EditorPhase::Dirty
        } else {
            EditorPhase::Clean
        };
    }

    fn close(&mut self) {
        self.phase = EditorPhase::Closed;
        self.notices.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{ExternalLink, LinkType};
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn collection() -> Vec<Card> {
        let mut first = Card::new("A1");
        first.name = "X".into();
        first.start_date = "2024-01-01".into();
        first.description.insert(EntryKey::PRIMARY, "d".into());
        first
            .description
            .insert(EntryKey::new(1), "more".into());
        let mut second = Card::new("B2");
        second.name = "Other".into();
        second.description.insert(EntryKey::PRIMARY, "e".into());
        vec![first, second]
    }

    #[test]
    fn opening_an_unknown_card_fails() {
        assert_matches!(
            CardEditor::open(collection(), "ZZ"),
            Err(EditorError::UnknownCard(id)) if id == "ZZ"
        );
    }

    #[test]
    fn titles_follow_the_card() -> Result<(), EditorError> {
        assert_eq!(CardEditor::open(collection(), "A1")?.title(), "Edit: X");
        assert_eq!(CardEditor::create(collection()).title(), "Create new card");
        Ok(())
    }

    #[test]
    fn edits_toggle_between_clean_and_dirty() -> Result<(), EditorError> {
        let mut editor = CardEditor::open(collection(), "A1")?;
        assert_eq!(editor.phase(), EditorPhase::Clean);
        editor.set_field(FieldPath::Name, "Y")?;
        assert!(editor.is_dirty());
        editor.set_field(FieldPath::Name, "X")?;
        assert_eq!(editor.phase(), EditorPhase::Clean);
        Ok(())
    }

    #[test]
    fn reverting_an_edit_is_clean_next_to_empty_entries() -> Result<(), EditorError> {
        let mut cards = collection();
        cards[0].description.insert(EntryKey::new(2), String::new());
        cards[0].external_links.insert(
            EntryKey::new(0),
            ExternalLink {
                url: String::new(),
                label: "tbd".into(),
                kind: LinkType::Website,
            },
        );
        let mut editor = CardEditor::open(cards, "A1")?;
        assert_eq!(editor.phase(), EditorPhase::Clean);
        editor.set_field(FieldPath::Name, "Y")?;
        assert!(editor.is_dirty());
        editor.set_field(FieldPath::Name, "X")?;
        assert_eq!(editor.phase(), EditorPhase::Clean);
        assert_eq!(editor.request_dismiss(), DismissOutcome::Closed);
        Ok(())
    }

    #[test]
    fn clearing_a_link_type_is_rejected_and_stays_clean() -> Result<(), EditorError> {
        let mut cards = collection();
        cards[0].external_links.insert(
            EntryKey::new(0),
            ExternalLink {
                url: "https://example.com".into(),
                label: String::new(),
                kind: LinkType::Website,
            },
        );
        let mut editor = CardEditor::open(cards, "A1")?;
        assert_matches!(
            editor.set_field(FieldPath::LinkType(EntryKey::new(0)), ""),
            Err(EditorError::InvalidValue { .. })
        );
        assert_eq!(editor.phase(), EditorPhase::Clean);
        Ok(())
    }

    #[test]
    fn dismissing_dirty_editor_is_refused_once() -> Result<(), EditorError> {
        let mut editor = CardEditor::open(collection(), "A1")?;
        editor.set_field(FieldPath::Summary, "short")?;
        assert_eq!(editor.request_dismiss(), DismissOutcome::Refused);
        assert_eq!(editor.request_dismiss(), DismissOutcome::Refused);
        assert_eq!(editor.notices().iter().count(), 1);
        assert!(editor.notices().is_active(NoticeId::DataChanged));

        editor.cancel()?;
        assert!(editor.is_closed());
        assert!(editor.notices().is_empty());
        Ok(())
    }

    #[test]
    fn clean_editor_dismisses() -> Result<(), EditorError> {
        let mut editor = CardEditor::open(collection(), "A1")?;
        assert_eq!(editor.request_dismiss(), DismissOutcome::Closed);
        assert_matches!(
            editor.set_field(FieldPath::Name, "Y"),
            Err(EditorError::Closed)
        );
        Ok(())
    }

    #[test]
    fn drafts_become_dirty_when_filled_in() -> Result<(), EditorError> {
        let mut editor = CardEditor::create(collection());
        assert_eq!(editor.phase(), EditorPhase::Clean);
        editor.set_field(FieldPath::Name, "Fresh")?;
        assert!(editor.is_dirty());
        Ok(())
    }

    #[test]
    fn card_id_can_only_be_cleared() -> Result<(), EditorError> {
        let mut editor = CardEditor::open(collection(), "A1")?;
        assert_matches!(
            editor.set_field(FieldPath::Id, "B2"),
            Err(EditorError::IdReadOnly)
        );
        editor.set_field(FieldPath::Id, "")?;
        assert_matches!(editor.patch().change, CardChange::Delete);

        let mut draft = CardEditor::create(collection());
        assert_matches!(
            draft.set_field(FieldPath::Id, ""),
            Err(EditorError::IdReadOnly)
        );
        Ok(())
    }

    #[test]
    fn save_blocks_further_submissions_until_resolved() -> Result<(), EditorError> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut editor = CardEditor::open(collection(), "A1")?;
        editor.set_field(FieldPath::Name, "Y")?;

        let request = editor.begin_save(&mut rng)?;
        assert_eq!(request.kind, SaveKind::Save);
        assert_eq!(request.cards[0].name, "Y");
        assert_eq!(editor.phase(), EditorPhase::Saving(SaveKind::Save));
        assert_matches!(editor.begin_save(&mut rng), Err(EditorError::SaveInFlight));
        assert_matches!(editor.begin_delete(&mut rng), Err(EditorError::SaveInFlight));
        assert_eq!(editor.request_dismiss(), DismissOutcome::Refused);
        assert_matches!(editor.cancel(), Err(EditorError::SaveInFlight));
        assert!(!editor.is_closed());

        let resolution = editor.finish_save(Ok(()))?;
        assert_eq!(
            resolution,
            SaveResolution::Saved(ChangeOutcome::Updated { id: "A1".into() })
        );
        assert!(editor.is_closed());
        Ok(())
    }

    #[test]
    fn failed_save_keeps_the_editor_open_with_a_notice() -> Result<(), EditorError> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut editor = CardEditor::open(collection(), "A1")?;
        editor.set_field(FieldPath::Name, "Y")?;
        editor.begin_save(&mut rng)?;

        let resolution = editor.finish_save(Err(PersistError::Other(String::new())))?;
        assert_eq!(resolution, SaveResolution::Failed);
        assert!(editor.is_dirty());
        let notice = editor.notices().iter().next().cloned();
        assert_matches!(notice, Some(Notice { id: NoticeId::SaveError, ref description, .. }) if description == UNKNOWN_ERROR_MESSAGE);

        assert_matches!(editor.finish_save(Ok(())), Err(EditorError::NoSaveInFlight));
        Ok(())
    }

    #[test]
    fn delete_removes_the_card_and_restores_the_id_on_failure() -> Result<(), EditorError> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut editor = CardEditor::open(collection(), "A1")?;
        let request = editor.begin_delete(&mut rng)?;
        assert_eq!(request.kind, SaveKind::Delete);
        assert_eq!(request.cards.len(), 1);
        assert_eq!(request.cards[0].id, "B2");

        editor.finish_save(Err(PersistError::Other("offline".into())))?;
        assert_eq!(editor.form().get(FieldPath::Id), Some("A1"));
        assert_eq!(editor.phase(), EditorPhase::Clean);
        assert!(editor.notices().is_active(NoticeId::DeleteError));

        let mut draft = CardEditor::create(collection());
        assert_matches!(
            draft.begin_delete(&mut rng),
            Err(EditorError::CannotDeleteDraft)
        );
        Ok(())
    }

    #[test]
    fn saving_a_draft_creates_a_card() -> Result<(), EditorError> {
        let mut rng = StdRng::seed_from_u64(9);
        let mut editor = CardEditor::create(collection());
        editor.set_field(FieldPath::Name, "Fresh")?;
        let request = editor.begin_save(&mut rng)?;
        assert_eq!(request.cards.len(), 3);
        assert_matches!(&request.outcome, ChangeOutcome::Created { id } if crate::cards::is_canonical_id(id));
        Ok(())
    }

    #[test]
    fn rejected_rekey_raises_index_update_notice() -> Result<(), EditorError> {
        let mut editor = CardEditor::open(collection(), "A1")?;
        assert_matches!(
            editor.rekey_description(EntryKey::new(1), "x"),
            Err(EditorError::InvalidKey(_))
        );
        assert!(editor.notices().is_active(NoticeId::IndexUpdateError));
        assert_matches!(
            editor.rekey_description(EntryKey::new(1), "0"),
            Err(EditorError::PrimaryEntry { .. })
        );
        assert_eq!(editor.notices().iter().count(), 1);

        editor.rekey_description(EntryKey::new(1), "4")?;
        assert!(editor.is_dirty());
        Ok(())
    }
}
