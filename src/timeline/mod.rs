//! Date-scaled geometry for the card timeline.
//!
//! Every function here is pure: given the visible window, the width of the
//! track and a card's date range it produces the spacer, bar width, corner
//! rounding and dot/bar decision used by the renderer. Nothing is cached;
//! callers recompute whenever the window, track width or card list changes.

use bitflags::bitflags;
use time::{Duration, OffsetDateTime, Time};

use crate::cards::{Card, CardStatus};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Bars narrower than this are drawn as a dot.
pub const DEFAULT_DOT_THRESHOLD_PX: f64 = 20.0;
/// Opacity of every unselected card while some card is selected.
pub const FADED_OPACITY: f32 = 0.3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("display window must end after it starts ({start} .. {end})")]
    Empty {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

/// Whole days from `start` to `end`, rounded up. Negative when `end` is
/// before `start`.
pub fn days_between(start: OffsetDateTime, end: OffsetDateTime) -> i64 {
    let elapsed_ms = (end - start).whole_milliseconds() as f64;
    (elapsed_ms / MS_PER_DAY).ceil() as i64
}

/// Visible `[start, end)` range of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineWindow {
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl TimelineWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, WindowError> {
        if days_between(start, end) < 1 {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window covering every card: from the earliest start to the later of
    /// the latest end and `today`, plus one day. `None` when no card has a
    /// usable start date.
    pub fn spanning(cards: &[Card], today: OffsetDateTime) -> Option<Self> {
        let start = cards.iter().filter_map(Card::start).min()?;
        let latest_end = cards.iter().filter_map(Card::end).max();
        let end = latest_end.map_or(today, |end| end.max(today));
        let start = start.replace_time(Time::MIDNIGHT);
        let end = end.replace_time(Time::MIDNIGHT) + Duration::days(1);
        Self::new(start, end).ok()
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    pub fn total_days(&self) -> i64 {
        days_between(self.start, self.end)
    }
}

bitflags! {
    /// Ends of a bar drawn square because the card continues past the window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SquareCorners: u8 {
        const LEFT = 0b01;
        const RIGHT = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Dot,
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardGeometry {
    /// Gap before the bar. Negative when the card starts before the window;
    /// renderers clamp it.
    pub spacer_px: f64,
    pub bar_width_px: f64,
    pub mark: Mark,
    pub square: SquareCorners,
    pub status: CardStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineLayout {
    window: TimelineWindow,
    track_width_px: f64,
    dot_threshold_px: f64,
    faded_opacity: f32,
}

impl TimelineLayout {
    pub fn new(window: TimelineWindow, track_width_px: f64) -> Self {
        Self {
            window,
            track_width_px: track_width_px.max(0.0),
            dot_threshold_px: DEFAULT_DOT_THRESHOLD_PX,
            faded_opacity: FADED_OPACITY,
        }
    }

    pub fn with_dot_threshold(mut self, threshold_px: f64) -> Self {
        self.dot_threshold_px = threshold_px;
        self
    }

    pub fn with_faded_opacity(mut self, opacity: f32) -> Self {
        self.faded_opacity = opacity;
        self
    }

    pub fn window(&self) -> &TimelineWindow {
        &self.window
    }

    pub fn pixels_per_day(&self) -> f64 {
        self.track_width_px / self.window.total_days() as f64
    }

    /// Width of the whole track, `pixels_per_day × total_days`.
    pub fn track_width(&self) -> f64 {
        self.pixels_per_day() * self.window.total_days() as f64
    }

    pub fn bar_width(&self, start: OffsetDateTime, end: Option<OffsetDateTime>) -> f64 {
        let ppd = self.pixels_per_day();
        let display_start = self.window.start;
        let display_end = self.window.end;
        let width = match end {
            None => ppd * days_between(start, display_end) as f64,
            Some(end) if start >= display_start && end <= display_end => {
                ppd * days_between(start, end) as f64
            }
            Some(end) if start < display_start && end > display_end => {
                ppd * self.window.total_days() as f64
            }
            Some(end) if start < display_start && end > display_start => {
                ppd * days_between(display_start, end) as f64
            }
            Some(end) if end >= display_end && start < display_end => {
                ppd * days_between(start, display_end) as f64
            }
            Some(_) => ppd,
        };
        width.max(0.0).min(self.track_width())
    }

    pub fn spacer_width(&self, start: OffsetDateTime) -> f64 {
        self.pixels_per_day() * days_between(self.window.start, start) as f64
    }

    /// Only cards with an end date collapse to a dot; the unclipped span is
    /// what gets measured.
    pub fn shows_dot(&self, start: OffsetDateTime, end: Option<OffsetDateTime>) -> bool {
        match end {
            Some(end) => {
                self.pixels_per_day() * (days_between(start, end) as f64) < self.dot_threshold_px
            }
            None => false,
        }
    }

    pub fn square_corners(
        &self,
        start: OffsetDateTime,
        end: Option<OffsetDateTime>,
    ) -> SquareCorners {
        let mut square = SquareCorners::empty();
        if start + Duration::days(1) <= self.window.start {
            square |= SquareCorners::LEFT;
        }
        if end.map_or(true, |end| end > self.window.end) {
            square |= SquareCorners::RIGHT;
        }
        square
    }

    /// Geometry of one card; `None` when its start date does not parse.
    pub fn card_geometry(&self, card: &Card) -> Option<CardGeometry> {
        let start = card.start()?;
        let end = card.end();
        let mark = if self.shows_dot(start, end) {
            Mark::Dot
        } else {
            Mark::Bar
        };
        Some(CardGeometry {
            spacer_px: self.spacer_width(start),
            bar_width_px: self.bar_width(start, end),
            mark,
            square: self.square_corners(start, end),
            status: card.status(),
        })
    }

    pub fn rows<'a>(&self, cards: &'a [Card], selection: &Selection) -> Vec<TimelineRow<'a>> {
        cards
            .iter()
            .enumerate()
            .map(|(index, card)| TimelineRow {
                index,
                card,
                striped: is_striped(index),
                selected: selection.is_selected(&card.id),
                opacity: selection.opacity(&card.id, self.faded_opacity),
                geometry: self.card_geometry(card),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TimelineRow<'a> {
    pub index: usize,
    pub card: &'a Card,
    pub striped: bool,
    pub selected: bool,
    pub opacity: f32,
    pub geometry: Option<CardGeometry>,
}

pub fn is_striped(index: usize) -> bool {
    index % 2 == 0
}

/// The card highlighted on the timeline, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    card_id: Option<String>,
}

impl Selection {
    pub fn selected(&self) -> Option<&str> {
        self.card_id.as_deref()
    }

    pub fn is_selected(&self, card_id: &str) -> bool {
        self.card_id.as_deref() == Some(card_id)
    }

    /// Selects `card_id`, or clears the selection when it is already selected.
    pub fn toggle(&mut self, card_id: &str) {
        if self.is_selected(card_id) {
            self.card_id = None;
        } else {
            self.card_id = Some(card_id.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.card_id = None;
    }

    /// `faded` for every card except the selected one while a selection
    /// exists, full opacity otherwise.
    pub fn opacity(&self, card_id: &str, faded: f32) -> f32 {
        match &self.card_id {
            Some(selected) if selected != card_id => faded,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn ten_day_layout() -> TimelineLayout {
        let window = TimelineWindow::new(
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-01-11 0:00 UTC),
        )
        .expect("window");
        TimelineLayout::new(window, 200.0)
    }

    fn card(start: &str, end: Option<&str>) -> Card {
        let mut card = Card::new("A1");
        card.start_date = start.into();
        card.end_date = end.map(Into::into);
        card
    }

    #[test]
    fn days_between_rounds_partial_days_up() {
        let start = datetime!(2024-01-01 0:00 UTC);
        assert_eq!(days_between(start, datetime!(2024-01-01 0:00 UTC)), 0);
        assert_eq!(days_between(start, datetime!(2024-01-01 0:01 UTC)), 1);
        assert_eq!(days_between(start, datetime!(2024-01-03 0:00 UTC)), 2);
        assert_eq!(days_between(datetime!(2024-01-03 0:00 UTC), start), -2);
    }

    #[test]
    fn rejects_empty_windows() {
        let day = datetime!(2024-01-01 0:00 UTC);
        assert!(TimelineWindow::new(day, day).is_err());
        assert!(TimelineWindow::new(day + Duration::days(1), day).is_err());
    }

    #[test]
    fn card_inside_window_is_measured_exactly() {
        let layout = ten_day_layout();
        assert_eq!(layout.pixels_per_day(), 20.0);
        let geometry = layout
            .card_geometry(&card("2024-01-04", Some("2024-01-06")))
            .expect("geometry");
        assert_eq!(geometry.bar_width_px, 40.0);
        assert_eq!(geometry.spacer_px, 60.0);
        assert_eq!(geometry.mark, Mark::Bar);
        assert_eq!(geometry.square, SquareCorners::empty());
        assert_eq!(geometry.status, CardStatus::Completed);
    }

    #[test]
    fn ongoing_card_from_window_start_fills_the_track() {
        let layout = ten_day_layout();
        let geometry = layout
            .card_geometry(&card("2024-01-01", None))
            .expect("geometry");
        assert_eq!(geometry.bar_width_px, layout.track_width());
        assert_eq!(geometry.mark, Mark::Bar);
        assert_eq!(geometry.square, SquareCorners::RIGHT);
        assert_eq!(geometry.status, CardStatus::InProgress);
    }

    #[test]
    fn clips_cards_crossing_the_window_edges() {
        let layout = ten_day_layout();
        let spanning = layout
            .card_geometry(&card("2023-12-01", Some("2024-02-01")))
            .expect("geometry");
        assert_eq!(spanning.bar_width_px, 200.0);
        assert_eq!(spanning.square, SquareCorners::LEFT | SquareCorners::RIGHT);

        let leading = layout
            .card_geometry(&card("2023-12-25", Some("2024-01-03")))
            .expect("geometry");
        assert_eq!(leading.bar_width_px, 40.0);
        assert!(leading.spacer_px < 0.0, "spacer is left unclamped");

        let trailing = layout
            .card_geometry(&card("2024-01-09", Some("2024-01-20")))
            .expect("geometry");
        assert_eq!(trailing.bar_width_px, 40.0);
        assert_eq!(trailing.square, SquareCorners::RIGHT);
    }

    #[test]
    fn bar_width_stays_within_the_track() {
        let layout = ten_day_layout();
        let dates = [
            "2023-06-01",
            "2023-12-31",
            "2024-01-01",
            "2024-01-05",
            "2024-01-11",
            "2024-01-30",
        ];
        for start in dates {
            for end in dates.iter().map(|d| Some(*d)).chain([None]) {
                let card = card(start, end);
                let width = layout.bar_width(card.start().expect("start"), card.end());
                assert!(
                    (0.0..=layout.track_width()).contains(&width),
                    "{start}..{end:?} gave {width}"
                );
            }
        }
    }

    #[test]
    fn short_completed_cards_become_dots() {
        let layout = ten_day_layout();
        // a partial day rounds up to one whole day, exactly 20px at this scale
        let half_day = layout
            .card_geometry(&card("2024-01-04", Some("2024-01-04T12:00:00Z")))
            .expect("geometry");
        assert_eq!(half_day.mark, Mark::Bar);

        let coarse = TimelineLayout::new(
            TimelineWindow::new(
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2024-01-21 0:00 UTC),
            )
            .expect("window"),
            200.0,
        );
        let one_day = coarse
            .card_geometry(&card("2024-01-04", Some("2024-01-05")))
            .expect("geometry");
        assert_eq!(one_day.mark, Mark::Dot);

        let same_day = layout
            .card_geometry(&card("2024-01-04", Some("2024-01-04")))
            .expect("geometry");
        assert_eq!(same_day.mark, Mark::Dot);

        let ongoing = layout
            .card_geometry(&card("2024-01-10T12:00:00Z", None))
            .expect("geometry");
        assert_eq!(ongoing.mark, Mark::Bar);
    }

    #[test]
    fn unparseable_start_yields_no_geometry() {
        let layout = ten_day_layout();
        assert!(layout.card_geometry(&card("someday", None)).is_none());
    }

    #[test]
    fn left_corner_is_square_only_when_started_a_day_before_the_window() {
        let layout = ten_day_layout();
        let start = datetime!(2024-01-01 0:00 UTC);
        let end = Some(datetime!(2024-01-05 0:00 UTC));
        assert_eq!(layout.square_corners(start, end), SquareCorners::empty());
        assert_eq!(
            layout.square_corners(start - Duration::days(1), end),
            SquareCorners::LEFT
        );
        assert_eq!(
            layout.square_corners(start - Duration::hours(12), end),
            SquareCorners::empty()
        );
    }

    #[test]
    fn spanning_window_covers_all_cards_and_today() {
        let cards = vec![
            card("2024-01-05", Some("2024-01-07")),
            card("2024-01-02T08:00:00Z", None),
        ];
        let window =
            TimelineWindow::spanning(&cards, datetime!(2024-01-20 15:00 UTC)).expect("window");
        assert_eq!(window.start(), datetime!(2024-01-02 0:00 UTC));
        assert_eq!(window.end(), datetime!(2024-01-21 0:00 UTC));
        assert!(TimelineWindow::spanning(&[card("", None)], datetime!(2024-01-20 0:00 UTC))
            .is_none());
    }

    #[test]
    fn rows_alternate_stripes_and_fade_unselected_cards() {
        let layout = ten_day_layout();
        let mut second = card("2024-01-02", None);
        second.id = "B2".into();
        let cards = vec![card("2024-01-01", None), second];

        let mut selection = Selection::default();
        let rows = layout.rows(&cards, &selection);
        assert!(rows[0].striped && !rows[1].striped);
        assert!(rows.iter().all(|row| row.opacity == 1.0));

        selection.toggle("B2");
        let rows = layout.rows(&cards, &selection);
        assert_eq!(rows[0].opacity, FADED_OPACITY);
        assert_eq!(rows[1].opacity, 1.0);
        assert!(rows[1].selected);

        selection.toggle("B2");
        assert_eq!(selection.selected(), None);
    }
}
