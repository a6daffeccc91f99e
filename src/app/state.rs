use std::time::Duration;

use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::cards::{Card, EntryKey};
use crate::editor::{CardEditor, EditorError, FieldPath, Section};
use crate::timeline::{Selection, TimelineWindow};

/// Single-line text input used while a form field is being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInput {
    buffer: String,
    cursor: usize,
}

impl FieldInput {
    pub fn new(buffer: impl Into<String>) -> Self {
        let buffer = buffer.into();
        let cursor = buffer.len();
        Self { buffer, cursor }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Terminal columns between the start of the buffer and the cursor.
    pub fn display_column(&self) -> usize {
        UnicodeWidthStr::width(&self.buffer[..self.cursor])
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        if ch == '\n' || ch == '\r' {
            return false;
        }
        let mut scratch = [0u8; 4];
        let encoded = ch.encode_utf8(&mut scratch);
        self.buffer.insert_str(self.cursor, encoded);
        self.cursor += encoded.len();
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.buffer.drain(self.cursor..next);
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.buffer.clear();
        self.cursor = 0;
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
        true
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        true
    }

    pub fn move_home(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = 0;
        true
    }

    pub fn move_end(&mut self) -> bool {
        if self.cursor == self.buffer.len() {
            return false;
        }
        self.cursor = self.buffer.len();
        true
    }

    pub fn move_word_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let mut idx = self.cursor;
        while idx > 0 {
            let prev = prev_grapheme_boundary(&self.buffer, idx);
            if self.buffer[prev..idx].trim().is_empty() {
                idx = prev;
            } else {
                break;
            }
        }
        while idx > 0 {
            let prev = prev_grapheme_boundary(&self.buffer, idx);
            if self.buffer[prev..idx].trim().is_empty() {
                break;
            }
            idx = prev;
        }
        self.cursor = idx;
        true
    }

    pub fn move_word_right(&mut self) -> bool {
        let len = self.buffer.len();
        if self.cursor >= len {
            return false;
        }
        let mut idx = self.cursor;
        while idx < len {
            let next = next_grapheme_boundary(&self.buffer, idx);
            if self.buffer[idx..next].trim().is_empty() {
                break;
            }
            idx = next;
        }
        while idx < len {
            let next = next_grapheme_boundary(&self.buffer, idx);
            if self.buffer[idx..next].trim().is_empty() {
                idx = next;
            } else {
                break;
            }
        }
        if idx == self.cursor {
            return false;
        }
        self.cursor = idx;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    Field(FieldPath),
    /// New key for the description currently stored under this key.
    Rekey(EntryKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    Browse,
    Input(InputTarget),
    ConfirmDelete,
}

/// The editor modal: an editing session plus the field cursor.
#[derive(Debug, Clone)]
pub struct EditorPanel {
    pub editor: CardEditor,
    focus: usize,
    mode: PanelMode,
    input: FieldInput,
}

impl EditorPanel {
    pub fn new(editor: CardEditor) -> Self {
        Self {
            editor,
            focus: 0,
            mode: PanelMode::Browse,
            input: FieldInput::default(),
        }
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn input(&self) -> &FieldInput {
        &self.input
    }

    pub fn input_mut(&mut self) -> Option<&mut FieldInput> {
        match self.mode {
            PanelMode::Input(_) => Some(&mut self.input),
            _ => None,
        }
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    /// Fields shown in the modal, removed entries left out.
    pub fn fields(&self) -> Vec<(FieldPath, String)> {
        self.editor
            .form()
            .visible()
            .map(|(path, value)| (path, value.to_string()))
            .collect()
    }

    pub fn focused_path(&self) -> Option<FieldPath> {
        self.editor
            .form()
            .visible()
            .nth(self.focus)
            .map(|(path, _)| path)
    }

    pub fn move_focus(&mut self, delta: isize) {
        let len = self.editor.form().visible().count();
        if len == 0 {
            self.focus = 0;
            return;
        }
        let next = self.focus as isize + delta;
        self.focus = next.clamp(0, len as isize - 1) as usize;
    }

    pub fn focus_path(&mut self, target: FieldPath) {
        if let Some(index) = self
            .editor
            .form()
            .visible()
            .position(|(path, _)| path == target)
        {
            self.focus = index;
        }
    }

    pub fn begin_field_input(&mut self) -> bool {
        let Some(path) = self.focused_path() else {
            return false;
        };
        let value = self.editor.form().get(path).unwrap_or_default().to_string();
        self.input = FieldInput::new(value);
        self.mode = PanelMode::Input(InputTarget::Field(path));
        true
    }

    /// Starts typing a new key for the focused additional description.
    pub fn begin_rekey(&mut self) -> bool {
        match self.focused_path() {
            Some(FieldPath::Description(key)) if !key.is_primary() => {
                self.input = FieldInput::default();
                self.mode = PanelMode::Input(InputTarget::Rekey(key));
                true
            }
            _ => false,
        }
    }

    pub fn cancel_input(&mut self) {
        self.mode = PanelMode::Browse;
        self.input = FieldInput::default();
    }

    /// Writes the typed value. A rejected field value keeps the input open;
    /// a rejected rekey closes it (the editor has raised a notice).
    pub fn commit_input(&mut self) -> Result<(), EditorError> {
        let PanelMode::Input(target) = self.mode else {
            return Ok(());
        };
        let value = self.input.buffer().to_string();
        match target {
            InputTarget::Field(path) => {
                self.editor.set_field(path, &value)?;
                self.cancel_input();
            }
            InputTarget::Rekey(from) => {
                let result = self.editor.rekey_description(from, value.trim());
                self.cancel_input();
                result?;
                if let Ok(to) = value.trim().parse::<EntryKey>() {
                    self.focus_path(FieldPath::Description(to));
                }
            }
        }
        Ok(())
    }

    pub fn add_entry(&mut self, section: Section) -> Result<EntryKey, EditorError> {
        let key = self.editor.add_entry(section)?;
        let first = match section {
            Section::Description => FieldPath::Description(key),
            Section::Images => FieldPath::ImageSource(key),
            Section::ExternalLinks => FieldPath::LinkUrl(key),
        };
        self.focus_path(first);
        Ok(key)
    }

    /// Removes the entry the focused field belongs to.
    pub fn remove_focused_entry(&mut self) -> Result<bool, EditorError> {
        let Some((section, key)) = self.focused_path().and_then(|path| path.entry()) else {
            return Ok(false);
        };
        self.editor.remove_entry(section, key)?;
        self.move_focus(0);
        Ok(true)
    }

    pub fn confirm_delete(&mut self) -> bool {
        if self.editor.is_new() || self.editor.is_saving() {
            return false;
        }
        self.mode = PanelMode::ConfirmDelete;
        true
    }

    pub fn abort_delete(&mut self) {
        self.mode = PanelMode::Browse;
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    cards: Vec<Card>,
    pub cursor: usize,
    pub selection: Selection,
    window: Option<TimelineWindow>,
    panel: Option<EditorPanel>,
    status_message: Option<String>,
    notice_duration: Duration,
}

impl AppState {
    pub fn new(cards: Vec<Card>, notice_duration: Duration) -> Self {
        let window = TimelineWindow::spanning(&cards, OffsetDateTime::now_utc());
        Self {
            cards,
            cursor: 0,
            selection: Selection::default(),
            window,
            panel: None,
            status_message: None,
            notice_duration,
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn window(&self) -> Option<&TimelineWindow> {
        self.window.as_ref()
    }

    /// Swaps in the collection the store accepted and recomputes the window.
    pub fn replace_cards(&mut self, cards: Vec<Card>) {
        self.cards = cards;
        self.window = TimelineWindow::spanning(&self.cards, OffsetDateTime::now_utc());
        if let Some(selected) = self.selection.selected() {
            if !self.cards.iter().any(|card| card.id == selected) {
                self.selection.clear();
            }
        }
        self.cursor = self.cursor.min(self.cards.len().saturating_sub(1));
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.cards.is_empty() {
            self.cursor = 0;
            return;
        }
        let next = self.cursor as isize + delta;
        self.cursor = next.clamp(0, self.cards.len() as isize - 1) as usize;
    }

    pub fn cursor_card(&self) -> Option<&Card> {
        self.cards.get(self.cursor)
    }

    pub fn toggle_selection(&mut self) {
        if let Some(id) = self.cursor_card().map(|card| card.id.clone()) {
            self.selection.toggle(&id);
        }
    }

    pub fn open_editor(&mut self) -> Result<(), EditorError> {
        let Some(id) = self.cursor_card().map(|card| card.id.clone()) else {
            return Ok(());
        };
        let editor = CardEditor::open(self.cards.clone(), &id)?
            .with_notice_duration(self.notice_duration);
        self.panel = Some(EditorPanel::new(editor));
        Ok(())
    }

    pub fn open_new_card(&mut self) {
        let editor =
            CardEditor::create(self.cards.clone()).with_notice_duration(self.notice_duration);
        self.panel = Some(EditorPanel::new(editor));
    }

    pub fn panel(&self) -> Option<&EditorPanel> {
        self.panel.as_ref()
    }

    pub fn panel_mut(&mut self) -> Option<&mut EditorPanel> {
        self.panel.as_mut()
    }

    pub fn is_editing(&self) -> bool {
        self.panel.is_some()
    }

    /// Drops the panel once its editor has closed.
    pub fn close_finished_panel(&mut self) -> bool {
        if self.panel.as_ref().map_or(false, |panel| panel.editor.is_closed()) {
            self.panel = None;
            return true;
        }
        false
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    let mut iter = text[cursor..].graphemes(true);
    if let Some(grapheme) = iter.next() {
        cursor + grapheme.len()
    } else {
        text.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{EditorPhase, NoticeId};

    fn cards() -> Vec<Card> {
        let mut first = Card::new("A1");
        first.name = "First".into();
        first.start_date = "2024-01-01".into();
        first.end_date = Some("2024-01-05".into());
        first.description.insert(EntryKey::PRIMARY, "main".into());
        first.description.insert(EntryKey::new(1), "extra".into());
        let mut second = Card::new("B2");
        second.name = "Second".into();
        second.start_date = "2024-02-01".into();
        second.description.insert(EntryKey::PRIMARY, "other".into());
        vec![first, second]
    }

    #[test]
    fn field_input_edits_by_grapheme() {
        let mut input = FieldInput::new("café");
        assert!(input.backspace());
        assert_eq!(input.buffer(), "caf");
        input.insert_char('é');
        input.move_home();
        assert!(input.delete());
        assert_eq!(input.buffer(), "afé");
        assert_eq!(input.display_column(), 0);
        input.move_end();
        assert_eq!(input.display_column(), 3);
        assert!(!input.insert_char('\n'));
    }

    #[test]
    fn field_input_word_navigation_skips_whitespace() {
        let mut input = FieldInput::new("alpha  beta");
        assert!(input.move_word_left());
        assert_eq!(input.cursor(), 7);
        assert!(input.move_word_left());
        assert_eq!(input.cursor(), 0);
        assert!(input.move_word_right());
        assert_eq!(input.cursor(), 7);
    }

    #[test]
    fn cursor_and_selection_follow_the_collection() {
        let mut state = AppState::new(cards(), Duration::from_secs(3));
        assert!(state.window().is_some());
        state.move_cursor(5);
        assert_eq!(state.cursor, 1);
        state.toggle_selection();
        assert!(state.selection.is_selected("B2"));

        state.replace_cards(cards().into_iter().take(1).collect());
        assert_eq!(state.cursor, 0);
        assert_eq!(state.selection.selected(), None);
    }

    #[test]
    fn committing_input_updates_the_editor() -> Result<(), EditorError> {
        let mut state = AppState::new(cards(), Duration::from_secs(3));
        state.open_editor()?;
        let Some(panel) = state.panel_mut() else {
            panic!("editor panel missing");
        };
        panel.focus_path(FieldPath::Name);
        assert!(panel.begin_field_input());
        if let Some(input) = panel.input_mut() {
            input.clear();
            for ch in "Renamed".chars() {
                input.insert_char(ch);
            }
        }
        panel.commit_input()?;
        assert_eq!(panel.mode(), PanelMode::Browse);
        assert_eq!(panel.editor.phase(), EditorPhase::Dirty);
        assert_eq!(panel.editor.form().get(FieldPath::Name), Some("Renamed"));
        Ok(())
    }

    #[test]
    fn failed_rekey_closes_the_input_and_raises_a_notice() -> Result<(), EditorError> {
        let mut state = AppState::new(cards(), Duration::from_secs(3));
        state.open_editor()?;
        let Some(panel) = state.panel_mut() else {
            panic!("editor panel missing");
        };
        panel.focus_path(FieldPath::Description(EntryKey::new(1)));
        assert!(panel.begin_rekey());
        if let Some(input) = panel.input_mut() {
            input.insert_char('0');
        }
        assert!(panel.commit_input().is_err());
        assert_eq!(panel.mode(), PanelMode::Browse);
        assert!(panel.editor.notices().is_active(NoticeId::IndexUpdateError));
        Ok(())
    }

    #[test]
    fn removing_an_entry_hides_its_fields() -> Result<(), EditorError> {
        let mut state = AppState::new(cards(), Duration::from_secs(3));
        state.open_editor()?;
        let Some(panel) = state.panel_mut() else {
            panic!("editor panel missing");
        };
        let before = panel.fields().len();
        panel.focus_path(FieldPath::Description(EntryKey::new(1)));
        assert!(panel.remove_focused_entry()?);
        assert_eq!(panel.fields().len(), before - 1);
        assert!(panel.focus() < panel.fields().len());

        let key = panel.add_entry(Section::ExternalLinks)?;
        assert_eq!(panel.focused_path(), Some(FieldPath::LinkUrl(key)));
        Ok(())
    }

    #[test]
    fn drafts_cannot_be_deleted_from_the_panel() {
        let mut state = AppState::new(cards(), Duration::from_secs(3));
        state.open_new_card();
        let Some(panel) = state.panel_mut() else {
            panic!("editor panel missing");
        };
        assert!(!panel.confirm_delete());
        assert_eq!(panel.editor.title(), "Create new card");
    }
}
