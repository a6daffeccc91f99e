use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use time::macros::format_description;
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, EditorPanel, InputTarget, PanelMode};
use crate::cards::{CardStatus, CardType};
use crate::config::themes::Palette;
use crate::config::TimelineConfig;
use crate::editor::{EditorPhase, NoticeLevel, SaveKind};
use crate::timeline::{CardGeometry, Mark, SquareCorners, TimelineLayout, TimelineRow};

const NAME_COLUMN_MAX: u16 = 32;
const HIGHLIGHT_MARKER: &str = "⭐ ";

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub palette: Palette,
    pub timeline: TimelineConfig,
}

pub fn draw_app(frame: &mut Frame, state: &AppState, view: &ViewSettings) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(2),
        ])
        .split(frame.size());

    frame.render_widget(
        Paragraph::new(build_header(state)).style(
            Style::default()
                .fg(view.palette.text)
                .bg(view.palette.background)
                .add_modifier(Modifier::BOLD),
        ),
        vertical[0],
    );
    draw_timeline(frame, state, view, vertical[1]);
    frame.render_widget(
        Paragraph::new(build_status_line(state, view)).style(
            Style::default()
                .fg(view.palette.muted)
                .bg(view.palette.background),
        ),
        vertical[2],
    );

    if let Some(panel) = state.panel() {
        draw_editor(frame, panel, view);
    }
}

fn build_header(state: &AppState) -> Line<'static> {
    let mut text = format!("cardline · {} cards", state.cards().len());
    if let Some(window) = state.window() {
        text.push_str(&format!(
            " · {} → {}",
            format_day(window.start()),
            format_day(window.end())
        ));
    }
    Line::from(text)
}

fn format_day(dt: OffsetDateTime) -> String {
    dt.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| dt.to_string())
}

fn build_status_line(state: &AppState, view: &ViewSettings) -> Text<'static> {
    let hints = if state.is_editing() {
        ""
    } else {
        "j/k move · Space select · e edit · n new card · Esc clear · q quit"
    };
    let mut lines = Vec::with_capacity(2);
    if let Some(message) = state.status_message() {
        lines.push(Line::from(Span::styled(
            message.to_string(),
            Style::default().fg(view.palette.accent),
        )));
    }
    lines.push(Line::from(hints));
    Text::from(lines)
}

fn draw_timeline(frame: &mut Frame, state: &AppState, view: &ViewSettings, area: Rect) {
    let palette = view.palette;
    let block = Block::default()
        .title("Timeline")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted))
        .style(Style::default().bg(palette.background).fg(palette.text));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(window) = state.window() else {
        frame.render_widget(
            Paragraph::new("No card has a usable start date yet. Press n to create one.")
                .style(Style::default().fg(palette.muted)),
            inner,
        );
        return;
    };
    if inner.width < 4 || inner.height == 0 {
        return;
    }

    let name_width = (inner.width / 3).min(NAME_COLUMN_MAX).max(1);
    let track_cols = inner.width.saturating_sub(name_width + 1) as usize;
    let track_px = track_cols as f64 * view.timeline.cell_width_px;
    let layout = TimelineLayout::new(*window, track_px)
        .with_dot_threshold(view.timeline.dot_threshold_px)
        .with_faded_opacity(view.timeline.faded_opacity);
    let rows = layout.rows(state.cards(), &state.selection);

    let visible = inner.height as usize;
    let offset = state.cursor.saturating_sub(visible.saturating_sub(1));
    let lines: Vec<Line> = rows
        .iter()
        .skip(offset)
        .take(visible)
        .map(|row| {
            render_row(
                row,
                row.index == state.cursor,
                name_width as usize,
                track_cols,
                view,
            )
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_row(
    row: &TimelineRow<'_>,
    under_cursor: bool,
    name_width: usize,
    track_cols: usize,
    view: &ViewSettings,
) -> Line<'static> {
    let palette = view.palette;
    let row_bg = if row.striped {
        palette.stripe
    } else {
        palette.background
    };

    let mut name = String::new();
    if row.card.card_type() == CardType::Highlight {
        name.push_str(HIGHLIGHT_MARKER);
    }
    name.push_str(&row.card.name);
    let name = pad_to_width(&truncate_to_width(&name, name_width), name_width);
    let mut name_style = Style::default()
        .fg(palette.fade(palette.text, row.opacity))
        .bg(row_bg);
    if row.selected {
        name_style = name_style.fg(palette.accent).add_modifier(Modifier::BOLD);
    }
    if under_cursor {
        name_style = name_style.add_modifier(Modifier::REVERSED);
    }

    let mut spans = vec![
        Span::styled(name, name_style),
        Span::styled(" ", Style::default().bg(row_bg)),
    ];
    let Some(geometry) = row.geometry.as_ref() else {
        spans.push(Span::styled(
            pad_to_width("(no start date)", track_cols),
            Style::default().fg(palette.muted).bg(row_bg),
        ));
        return Line::from(spans);
    };

    let segment = track_segment(geometry, view.timeline.cell_width_px, track_cols);
    let status_color = match geometry.status {
        CardStatus::InProgress => palette.in_progress,
        CardStatus::Completed => palette.completed,
    };
    let bar_style = Style::default()
        .fg(palette.fade(status_color, row.opacity))
        .bg(row_bg);
    spans.push(Span::styled(
        " ".repeat(segment.spacer),
        Style::default().bg(row_bg),
    ));
    spans.push(Span::styled(
        bar_glyphs(geometry, segment.bar),
        bar_style,
    ));
    let rest = track_cols.saturating_sub(segment.spacer + segment.bar);
    spans.push(Span::styled(" ".repeat(rest), Style::default().bg(row_bg)));
    Line::from(spans)
}

/// Terminal columns occupied by a card on a track of `track_cols` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSegment {
    pub spacer: usize,
    pub bar: usize,
}

pub fn track_segment(geometry: &CardGeometry, cell_width_px: f64, track_cols: usize) -> TrackSegment {
    if track_cols == 0 {
        return TrackSegment { spacer: 0, bar: 0 };
    }
    let to_cells = |px: f64| (px / cell_width_px).round().max(0.0) as usize;
    let spacer = to_cells(geometry.spacer_px).min(track_cols - 1);
    let bar = match geometry.mark {
        Mark::Dot => 1,
        Mark::Bar if geometry.bar_width_px <= 0.0 => 0,
        // a sliver narrower than a cell still shows up
        Mark::Bar => to_cells(geometry.bar_width_px).max(1),
    };
    TrackSegment {
        spacer,
        bar: bar.min(track_cols - spacer),
    }
}

fn bar_glyphs(geometry: &CardGeometry, cells: usize) -> String {
    match (geometry.mark, cells) {
        (_, 0) => String::new(),
        (Mark::Dot, _) => "●".to_string(),
        (Mark::Bar, 1) => "█".to_string(),
        (Mark::Bar, n) => {
            let left = if geometry.square.contains(SquareCorners::LEFT) {
                '█'
            } else {
                '▐'
            };
            let right = if geometry.square.contains(SquareCorners::RIGHT) {
                '█'
            } else {
                '▌'
            };
            let mut bar = String::with_capacity(n * 3);
            bar.push(left);
            bar.extend(std::iter::repeat('█').take(n - 2));
            bar.push(right);
            bar
        }
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let glyph = UnicodeWidthStr::width(grapheme);
        if used + glyph + 1 > width {
            break;
        }
        out.push_str(grapheme);
        used += glyph;
    }
    out.push('…');
    out
}

fn pad_to_width(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    let mut out = text.to_string();
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(used)));
    out
}

fn draw_editor(frame: &mut Frame, panel: &EditorPanel, view: &ViewSettings) {
    let palette = view.palette;
    let area = centered_rect(70, 80, frame.size());
    frame.render_widget(Clear, area);

    let phase = match panel.editor.phase() {
        EditorPhase::Dirty => " ● unsaved",
        EditorPhase::Saving(SaveKind::Save) => " saving…",
        EditorPhase::Saving(SaveKind::Delete) => " deleting…",
        EditorPhase::Clean | EditorPhase::Closed => "",
    };
    let block = Block::default()
        .title(format!("{}{}", panel.editor.title(), phase))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.accent))
        .style(Style::default().bg(palette.background).fg(palette.text));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let notices: Vec<Line> = panel
        .editor
        .notices()
        .iter()
        .map(|notice| {
            let color = match notice.level {
                NoticeLevel::Warning => palette.warning,
                NoticeLevel::Error => palette.error,
            };
            Line::from(vec![
                Span::styled(
                    format!("{}: ", notice.title),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ),
                Span::styled(notice.description.clone(), Style::default().fg(color)),
            ])
        })
        .collect();

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(notices.len() as u16),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(inner);

    frame.render_widget(Paragraph::new(notices), sections[0]);
    draw_fields(frame, panel, view, sections[1]);
    frame.render_widget(
        Paragraph::new(editor_help(panel))
            .style(Style::default().fg(palette.muted))
            .wrap(Wrap { trim: true }),
        sections[2],
    );
}

fn draw_fields(frame: &mut Frame, panel: &EditorPanel, view: &ViewSettings, area: Rect) {
    let palette = view.palette;
    let fields = panel.fields();
    let label_width = fields
        .iter()
        .map(|(path, _)| UnicodeWidthStr::width(path.label().as_str()))
        .max()
        .unwrap_or(0);

    let visible = area.height as usize;
    let offset = panel.focus().saturating_sub(visible.saturating_sub(2));
    let mut lines = Vec::with_capacity(visible);
    let mut cursor = None;
    for (index, (path, value)) in fields.iter().enumerate().skip(offset) {
        if lines.len() >= visible {
            break;
        }
        let focused = index == panel.focus();
        let label = pad_to_width(&path.label(), label_width);
        let mut label_style = Style::default().fg(palette.muted);
        let mut value_style = Style::default().fg(palette.text);
        if focused {
            label_style = label_style.fg(palette.accent).add_modifier(Modifier::BOLD);
            value_style = value_style.add_modifier(Modifier::REVERSED);
        }
        let shown = match panel.mode() {
            PanelMode::Input(InputTarget::Field(target)) if focused && target == *path => {
                cursor = Some((
                    area.x + (label_width + 2 + panel.input().display_column()) as u16,
                    area.y + lines.len() as u16,
                ));
                value_style = Style::default().fg(palette.text).bg(palette.stripe);
                panel.input().buffer().to_string()
            }
            _ => value.clone(),
        };
        lines.push(Line::from(vec![
            Span::styled(label, label_style),
            Span::raw("  "),
            Span::styled(shown, value_style),
        ]));

        if let PanelMode::Input(InputTarget::Rekey(from)) = panel.mode() {
            if focused && lines.len() < visible {
                let prompt = format!("{}  move {from} to key: ", " ".repeat(label_width));
                cursor = Some((
                    area.x
                        + (UnicodeWidthStr::width(prompt.as_str()) + panel.input().display_column())
                            as u16,
                    area.y + lines.len() as u16,
                ));
                lines.push(Line::from(vec![
                    Span::styled(prompt, Style::default().fg(palette.accent)),
                    Span::styled(
                        panel.input().buffer().to_string(),
                        Style::default().bg(palette.stripe),
                    ),
                ]));
            }
        }
    }
    frame.render_widget(Paragraph::new(lines), area);
    if let Some((x, y)) = cursor {
        let x = x.min(area.x + area.width.saturating_sub(1));
        frame.set_cursor(x, y);
    }
}

fn editor_help(panel: &EditorPanel) -> &'static str {
    match panel.mode() {
        PanelMode::Input(_) => "Enter apply · Esc abort · Ctrl-u clear",
        PanelMode::ConfirmDelete => "Delete this card? y / n",
        PanelMode::Browse => {
            "Enter edit · ←/→ cycle type · D/I/L add description/image/link · X remove · r move description · Ctrl-s save · Ctrl-d delete · Ctrl-x discard · Esc close"
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
