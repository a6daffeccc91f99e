use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cards::Card;
use crate::editor::{ChangeOutcome, SaveKind, SaveRequest};
use crate::persist::{CardStore, PersistError};

/// Answer of the store for one dispatched save.
#[derive(Debug)]
pub struct SaveCompletion {
    /// Ticket returned by the `dispatch` call this answers.
    pub ticket: u64,
    pub kind: SaveKind,
    pub outcome: ChangeOutcome,
    pub cards: Vec<Card>,
    pub result: Result<(), PersistError>,
}

/// Runs store calls off the UI thread and hands results back through a
/// channel the event loop drains on every tick.
pub struct SaveDispatcher {
    store: Arc<dyn CardStore>,
    tx: Sender<SaveCompletion>,
    rx: Receiver<SaveCompletion>,
    next_ticket: u64,
}

impl SaveDispatcher {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            store,
            tx,
            rx,
            next_ticket: 1,
        }
    }

    pub fn describe_store(&self) -> String {
        self.store.describe()
    }

    pub fn dispatch(&mut self, request: SaveRequest) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("cardline-save".into())
            .spawn(move || {
                let result = store.update_data(&request.cards);
                let completion = SaveCompletion {
                    ticket,
                    kind: request.kind,
                    outcome: request.outcome,
                    cards: request.cards,
                    result,
                };
                if tx.send(completion).is_err() {
                    tracing::warn!("event loop gone before save completed");
                }
            });
        if let Err(err) = spawned {
            tracing::error!(?err, ticket, "failed to spawn save worker");
            let _ = self.tx.send(SaveCompletion {
                ticket,
                kind: SaveKind::Save,
                outcome: ChangeOutcome::Unchanged { id: String::new() },
                cards: Vec::new(),
                result: Err(PersistError::Other(format!("could not start save: {err}"))),
            });
        }
        ticket
    }

    pub fn try_recv(&self) -> Option<SaveCompletion> {
        self.rx.try_recv().ok()
    }
}
