use std::time::{Duration, Instant};

use strum::{AsRefStr, Display};

pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_millis(3000);

/// Shown when a failure carries no message of its own.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error 😞 Please try again later.";

/// Stable identity of a notice; at most one notice per id is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum NoticeId {
    DataChanged,
    SaveError,
    DeleteError,
    IndexUpdateError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: NoticeId,
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    pub raised_at: Instant,
}

impl Notice {
    pub fn warning(id: NoticeId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, NoticeLevel::Warning, title, description)
    }

    pub fn error(id: NoticeId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, NoticeLevel::Error, title, description)
    }

    fn new(
        id: NoticeId,
        level: NoticeLevel,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            level,
            title: title.into(),
            description: description.into(),
            raised_at: Instant::now(),
        }
    }
}

/// Toast queue of the editor. Raising a notice whose id is already active
/// leaves the active one in place.
#[derive(Debug, Clone)]
pub struct Notices {
    active: Vec<Notice>,
    duration: Duration,
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_DURATION)
    }
}

impl Notices {
    pub fn new(duration: Duration) -> Self {
        Self {
            active: Vec::new(),
            duration,
        }
    }

    /// Returns `false` when a notice with the same id was already showing.
    pub fn raise(&mut self, notice: Notice) -> bool {
        if self.is_active(notice.id) {
            tracing::debug!(id = %notice.id, "notice already active");
            return false;
        }
        match notice.level {
            NoticeLevel::Warning => {
                tracing::warn!(id = %notice.id, title = %notice.title, "{}", notice.description)
            }
            NoticeLevel::Error => {
                tracing::error!(id = %notice.id, title = %notice.title, "{}", notice.description)
            }
        }
        self.active.push(notice);
        true
    }

    pub fn is_active(&self, id: NoticeId) -> bool {
        self.active.iter().any(|notice| notice.id == id)
    }

    /// Drops notices older than the configured duration.
    pub fn prune(&mut self, now: Instant) {
        let duration = self.duration;
        self.active
            .retain(|notice| now.saturating_duration_since(notice.raised_at) < duration);
    }

    pub fn dismiss(&mut self, id: NoticeId) {
        self.active.retain(|notice| notice.id != id);
    }

    pub fn close_all(&mut self) {
        self.active.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.active.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
