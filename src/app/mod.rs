use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use strum::IntoEnumIterator;

use crate::cards::{Card, CardType, LinkType};
use crate::config::themes::ThemeRegistry;
use crate::config::AppConfig;
use crate::editor::{
    ChangeOutcome, DismissOutcome, EditorError, FieldPath, SaveResolution, Section,
};
use crate::persist::CardStore;
use crate::ui::{self, ViewSettings};

mod actions;
pub mod state;

pub use actions::{SaveCompletion, SaveDispatcher};
pub use state::{AppState, EditorPanel, FieldInput, InputTarget, PanelMode};

enum Action {
    Quit,
    CursorDown,
    CursorUp,
    ToggleSelection,
    ClearSelection,
    EditCard,
    NewCard,
}

pub struct App {
    pub config: Arc<AppConfig>,
    state: AppState,
    dispatcher: SaveDispatcher,
    view: ViewSettings,
    rng: StdRng,
    /// Ticket of the save the store is still working on.
    in_flight: Option<u64>,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, cards: Vec<Card>, store: Arc<dyn CardStore>) -> Self {
        let state = AppState::new(cards, config.notifications.duration());
        let view = ViewSettings {
            palette: ThemeRegistry::default().palette(&config.theme),
            timeline: config.timeline.clone(),
        };
        let dispatcher = SaveDispatcher::new(store);
        tracing::info!(
            cards = state.cards().len(),
            store = %dispatcher.describe_store(),
            "starting timeline"
        );
        Self {
            config,
            state,
            dispatcher,
            view,
            rng: StdRng::from_entropy(),
            in_flight: None,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| ui::draw_app(frame, &self.state, &self.view))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Resize(_, _) => {
                        // the next draw re-measures the track
                    }
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        if self.state.is_editing() {
            self.handle_panel_key(key);
            self.state.close_finished_panel();
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') if plain => Some(Action::Quit),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::CursorDown),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::CursorUp),
            KeyCode::Char(' ') | KeyCode::Enter => Some(Action::ToggleSelection),
            KeyCode::Esc => Some(Action::ClearSelection),
            KeyCode::Char('e') if plain => Some(Action::EditCard),
            KeyCode::Char('n') if plain => Some(Action::NewCard),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::CursorDown => self.state.move_cursor(1),
            Action::CursorUp => self.state.move_cursor(-1),
            Action::ToggleSelection => self.state.toggle_selection(),
            Action::ClearSelection => self.state.selection.clear(),
            Action::EditCard | Action::NewCard if self.save_in_flight() => {}
            Action::EditCard => {
                if let Err(err) = self.state.open_editor() {
                    tracing::error!(?err, "failed to open card editor");
                    self.state.set_status_message(Some(err.to_string()));
                }
            }
            Action::NewCard => self.state.open_new_card(),
        }
    }

    /// True while a dispatched save is unanswered; tells the user to wait.
    fn save_in_flight(&mut self) -> bool {
        if self.in_flight.is_none() {
            return false;
        }
        self.state
            .set_status_message(Some(EditorError::SaveInFlight.to_string()));
        true
    }

    fn on_tick(&mut self) {
        while let Some(completion) = self.dispatcher.try_recv() {
            self.handle_save_completion(completion);
        }
        if let Some(panel) = self.state.panel_mut() {
            panel.editor.notices_mut().prune(Instant::now());
        }
    }

    fn handle_save_completion(&mut self, completion: SaveCompletion) {
        let SaveCompletion {
            ticket,
            kind,
            outcome,
            cards,
            result,
        } = completion;
        if self.in_flight != Some(ticket) {
            tracing::warn!(ticket, in_flight = ?self.in_flight, ?kind, "ignoring answer for a save this editor did not issue");
            return;
        }
        self.in_flight = None;
        let succeeded = result.is_ok();
        let resolution = match self.state.panel_mut() {
            Some(panel) => panel.editor.finish_save(result),
            None => Err(EditorError::NoSaveInFlight),
        };
        match resolution {
            Ok(SaveResolution::Saved(outcome)) => self.apply_saved(cards, &outcome),
            Ok(SaveResolution::Failed) => {
                self.state
                    .set_status_message(Some("Changes were not stored; see the notice"));
            }
            Err(err) if succeeded => {
                tracing::warn!(?err, ?kind, "save finished without an open editor");
                self.apply_saved(cards, &outcome);
            }
            Err(err) => {
                tracing::warn!(?err, ?kind, "save failed after the editor closed");
            }
        }
        self.state.close_finished_panel();
    }

    fn apply_saved(&mut self, cards: Vec<Card>, outcome: &ChangeOutcome) {
        self.state.replace_cards(cards);
        let message = match outcome {
            ChangeOutcome::Unchanged { id } => format!("Saved card {id} (no changes)"),
            ChangeOutcome::Updated { id } => format!("Saved card {id}"),
            ChangeOutcome::Created { id } => {
                if let Some(index) = self.state.cards().iter().position(|card| &card.id == id) {
                    self.state.cursor = index;
                }
                format!("Created card {id}")
            }
            ChangeOutcome::Deleted { id } => format!("Deleted card {id}"),
        };
        tracing::info!(outcome = ?outcome, "card collection updated");
        self.state.set_status_message(Some(message));
    }

    fn handle_panel_key(&mut self, key: KeyEvent) {
        let Some(mode) = self.state.panel().map(EditorPanel::mode) else {
            return;
        };
        match mode {
            PanelMode::Input(_) => self.handle_input_key(key),
            PanelMode::ConfirmDelete => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self.begin_delete(),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    if let Some(panel) = self.state.panel_mut() {
                        panel.abort_delete();
                    }
                }
                _ => {}
            },
            PanelMode::Browse => self.handle_browse_key(key),
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        let Some(panel) = self.state.panel_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => panel.cancel_input(),
            KeyCode::Enter => {
                if let Err(err) = panel.commit_input() {
                    tracing::debug!(?err, "field value rejected");
                    self.state.set_status_message(Some(err.to_string()));
                }
            }
            code => {
                let word = key.modifiers.contains(KeyModifiers::CONTROL);
                let plain = !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
                let Some(input) = panel.input_mut() else {
                    return;
                };
                match code {
                    KeyCode::Backspace => {
                        input.backspace();
                    }
                    KeyCode::Delete => {
                        input.delete();
                    }
                    KeyCode::Left if word => {
                        input.move_word_left();
                    }
                    KeyCode::Right if word => {
                        input.move_word_right();
                    }
                    KeyCode::Left => {
                        input.move_left();
                    }
                    KeyCode::Right => {
                        input.move_right();
                    }
                    KeyCode::Home => {
                        input.move_home();
                    }
                    KeyCode::End => {
                        input.move_end();
                    }
                    KeyCode::Char('u') if word => {
                        input.clear();
                    }
                    KeyCode::Char(ch) if plain => {
                        input.insert_char(ch);
                    }
                    _ => {}
                }
            }
        }
    }

    fn handle_browse_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => self.begin_save(),
                KeyCode::Char('d') => {
                    if let Some(panel) = self.state.panel_mut() {
                        if !panel.confirm_delete() {
                            self.state
                                .set_status_message(Some("Only saved cards can be deleted"));
                        }
                    }
                }
                KeyCode::Char('x') => {
                    let cancelled = match self.state.panel_mut() {
                        Some(panel) => panel.editor.cancel(),
                        None => return,
                    };
                    match cancelled {
                        Ok(()) => self.state.set_status_message(Some("Discarded changes")),
                        Err(err) => self.state.set_status_message(Some(err.to_string())),
                    }
                }
                _ => {}
            }
            return;
        }

        let Some(panel) = self.state.panel_mut() else {
            return;
        };
        let result = match key.code {
            KeyCode::Esc => {
                if panel.editor.request_dismiss() == DismissOutcome::Refused {
                    tracing::debug!("dismiss refused");
                }
                Ok(())
            }
            KeyCode::Char('j') | KeyCode::Down => {
                panel.move_focus(1);
                Ok(())
            }
            KeyCode::Char('k') | KeyCode::Up => {
                panel.move_focus(-1);
                Ok(())
            }
            KeyCode::Enter | KeyCode::Char('e') => {
                panel.begin_field_input();
                Ok(())
            }
            KeyCode::Left | KeyCode::Char('h') => cycle_focused_choice(panel, -1),
            KeyCode::Right | KeyCode::Char('l') => cycle_focused_choice(panel, 1),
            KeyCode::Char('r') => {
                panel.begin_rekey();
                Ok(())
            }
            KeyCode::Char('D') => panel.add_entry(Section::Description).map(|_| ()),
            KeyCode::Char('I') => panel.add_entry(Section::Images).map(|_| ()),
            KeyCode::Char('L') => panel.add_entry(Section::ExternalLinks).map(|_| ()),
            KeyCode::Char('X') => panel.remove_focused_entry().map(|_| ()),
            _ => Ok(()),
        };
        if let Err(err) = result {
            self.state.set_status_message(Some(err.to_string()));
        }
    }

    fn begin_save(&mut self) {
        if self.save_in_flight() {
            return;
        }
        let Some(panel) = self.state.panel_mut() else {
            return;
        };
        match panel.editor.begin_save(&mut self.rng) {
            Ok(request) => {
                self.in_flight = Some(self.dispatcher.dispatch(request));
                self.state.set_status_message(Some("Saving…"));
            }
            Err(err) => self.state.set_status_message(Some(err.to_string())),
        }
    }

    fn begin_delete(&mut self) {
        if self.save_in_flight() {
            if let Some(panel) = self.state.panel_mut() {
                panel.abort_delete();
            }
            return;
        }
        let Some(panel) = self.state.panel_mut() else {
            return;
        };
        panel.abort_delete();
        match panel.editor.begin_delete(&mut self.rng) {
            Ok(request) => {
                self.in_flight = Some(self.dispatcher.dispatch(request));
                self.state.set_status_message(Some("Deleting…"));
            }
            Err(err) => self.state.set_status_message(Some(err.to_string())),
        }
    }
}

/// Steps the focused card type or link type through its variants.
fn cycle_focused_choice(panel: &mut EditorPanel, delta: isize) -> Result<(), EditorError> {
    let Some(path) = panel.focused_path() else {
        return Ok(());
    };
    let current = panel.editor.form().get(path).unwrap_or_default();
    let choices: Vec<String> = match path {
        FieldPath::CardType => CardType::iter().map(|kind| kind.to_string()).collect(),
        FieldPath::LinkType(_) => LinkType::iter().map(|kind| kind.to_string()).collect(),
        _ => return Ok(()),
    };
    let Some(next) = cycle(&choices, current, delta) else {
        return Ok(());
    };
    panel.editor.set_field(path, &next)
}

fn cycle(choices: &[String], current: &str, delta: isize) -> Option<String> {
    if choices.is_empty() {
        return None;
    }
    let len = choices.len() as isize;
    let index = choices
        .iter()
        .position(|choice| choice == current)
        .map_or(0, |index| index as isize);
    let next = (index + delta).rem_euclid(len) as usize;
    choices.get(next).cloned()
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crossbeam_channel::{unbounded, Receiver};

    use crate::editor::SaveKind;
    use crate::persist::PersistError;

    /// Store that holds every update until the test lets it through.
    struct GatedStore {
        gate: Receiver<()>,
        posted: Mutex<Vec<Vec<String>>>,
    }

    impl CardStore for GatedStore {
        fn update_data(&self, cards: &[Card]) -> Result<(), PersistError> {
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .map_err(|err| PersistError::Other(err.to_string()))?;
            let names = cards.iter().map(|card| card.name.clone()).collect();
            self.posted.lock().expect("posted lock").push(names);
            Ok(())
        }

        fn describe(&self) -> String {
            "gated store".into()
        }
    }

    fn card(id: &str, name: &str, start: &str) -> Card {
        let mut card = Card::new(id);
        card.name = name.into();
        card.start_date = start.into();
        card
    }

    fn gated_app() -> (App, crossbeam_channel::Sender<()>, Arc<GatedStore>) {
        let (release, gate) = unbounded();
        let store = Arc::new(GatedStore {
            gate,
            posted: Mutex::new(Vec::new()),
        });
        let cards = vec![
            card("A1", "A", "2024-01-01"),
            card("B2", "B", "2024-06-01"),
        ];
        let app = App::new(Arc::new(AppConfig::default()), cards, store.clone());
        (app, release, store)
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn ctrl(app: &mut App, ch: char) {
        app.handle_key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL));
    }

    /// Opens the card under the cursor, appends `2` to its name and saves.
    fn append_to_name_and_save(app: &mut App) {
        press(app, KeyCode::Char('e'));
        if let Some(panel) = app.state.panel_mut() {
            panel.focus_path(FieldPath::Name);
        }
        press(app, KeyCode::Enter);
        press(app, KeyCode::Char('2'));
        press(app, KeyCode::Enter);
        ctrl(app, 's');
    }

    fn tick_until_panel_closes(app: &mut App) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.state.is_editing() && Instant::now() < deadline {
            app.on_tick();
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn names(app: &App) -> Vec<&str> {
        app.state.cards().iter().map(|card| card.name.as_str()).collect()
    }

    #[test]
    fn editor_stays_open_until_its_save_resolves() {
        let (mut app, release, store) = gated_app();
        append_to_name_and_save(&mut app);
        assert!(app.in_flight.is_some());

        ctrl(&mut app, 'x');
        assert!(app.state.is_editing());
        assert_eq!(
            app.state.status_message(),
            Some("a save is already in progress")
        );
        press(&mut app, KeyCode::Esc);
        assert!(app.state.is_editing());

        // an answer for some other save leaves this editor waiting
        app.handle_save_completion(SaveCompletion {
            ticket: 999,
            kind: SaveKind::Save,
            outcome: ChangeOutcome::Updated { id: "B2".into() },
            cards: Vec::new(),
            result: Ok(()),
        });
        assert!(app.state.is_editing());
        assert_eq!(names(&app), ["A", "B"]);

        release.send(()).expect("gate open");
        tick_until_panel_closes(&mut app);
        assert!(!app.state.is_editing());
        assert!(app.in_flight.is_none());
        assert_eq!(names(&app), ["A2", "B"]);

        press(&mut app, KeyCode::Char('j'));
        append_to_name_and_save(&mut app);
        release.send(()).expect("gate open");
        tick_until_panel_closes(&mut app);
        assert_eq!(names(&app), ["A2", "B2"]);
        assert_eq!(
            *store.posted.lock().expect("posted lock"),
            vec![vec!["A2", "B"], vec!["A2", "B2"]]
        );
    }

    #[test]
    fn editors_do_not_open_while_a_save_is_unanswered() {
        let (mut app, _release, _store) = gated_app();
        app.in_flight = Some(7);
        press(&mut app, KeyCode::Char('e'));
        assert!(!app.state.is_editing());
        press(&mut app, KeyCode::Char('n'));
        assert!(!app.state.is_editing());
        assert_eq!(
            app.state.status_message(),
            Some("a save is already in progress")
        );
    }

    #[test]
    fn choices_cycle_in_both_directions() {
        let kinds: Vec<String> = CardType::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(cycle(&kinds, "highlight", -1).as_deref(), Some("event"));
        assert_eq!(cycle(&kinds, "event", 1).as_deref(), Some("highlight"));
        assert_eq!(cycle(&kinds, "bogus", 1).as_deref(), Some("project"));
    }
}
