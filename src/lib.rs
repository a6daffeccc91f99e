pub mod app;
pub mod cards;
pub mod cli;
pub mod config;
pub mod editor;
pub mod persist;
pub mod timeline;
pub mod ui;

pub use cards::{Card, EntryKey, EntryMap};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use editor::{CardEditor, FieldPath, Patch};
pub use persist::{CardStore, FileCardStore, HttpCardStore, PersistError};
pub use timeline::{TimelineLayout, TimelineWindow};
