use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use time::OffsetDateTime;

use crate::app::App;
use crate::cards::{parse_card_date, Card, CardStatus, EntryKey};
use crate::config::{AppConfig, TimelineConfig};
use crate::editor::{CardEditor, ChangeOutcome, FieldPath, SaveResolution, Section};
use crate::persist::CardStore;
use crate::timeline::{CardGeometry, Mark, Selection, SquareCorners, TimelineLayout, TimelineWindow};

const DEFAULT_TRACK_WIDTH_PX: f64 = 800.0;

#[derive(Args, Debug, Clone)]
pub struct LayoutArgs {
    /// First day of the window (defaults to the earliest card start)
    #[arg(long)]
    pub from: Option<String>,
    /// Last day of the window (defaults to the latest card end or today)
    #[arg(long)]
    pub to: Option<String>,
    /// Track width in pixels
    #[arg(long, default_value_t = DEFAULT_TRACK_WIDTH_PX)]
    pub width: f64,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct NewArgs {
    /// Field assignment such as `name=Launch` or `images.1.alt=Logo`
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub set: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Id of the card to change
    pub id: String,
    /// Field assignment such as `summary=Shipped`
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub set: Vec<String>,
    /// Entry to remove, such as `externalLinks.2`
    #[arg(long = "remove", value_name = "SECTION.KEY")]
    pub remove: Vec<String>,
    /// Move an additional description to a new key
    #[arg(long = "rekey", value_name = "FROM=TO")]
    pub rekey: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Id of the card to delete
    pub id: String,
}

pub fn run_tui(config: Arc<AppConfig>, cards: Vec<Card>, store: Arc<dyn CardStore>) -> Result<()> {
    App::new(config, cards, store).run()
}

#[derive(Debug, Serialize)]
struct LayoutRow<'a> {
    id: &'a str,
    name: &'a str,
    spacer_px: Option<f64>,
    bar_width_px: Option<f64>,
    mark: Option<&'static str>,
    square_left: bool,
    square_right: bool,
    status: Option<&'static str>,
}

impl<'a> LayoutRow<'a> {
    fn new(card: &'a Card, geometry: Option<&CardGeometry>) -> Self {
        Self {
            id: &card.id,
            name: &card.name,
            spacer_px: geometry.map(|g| g.spacer_px),
            bar_width_px: geometry.map(|g| g.bar_width_px),
            mark: geometry.map(|g| match g.mark {
                Mark::Dot => "dot",
                Mark::Bar => "bar",
            }),
            square_left: geometry.map_or(false, |g| g.square.contains(SquareCorners::LEFT)),
            square_right: geometry.map_or(false, |g| g.square.contains(SquareCorners::RIGHT)),
            status: geometry.map(|g| match g.status {
                CardStatus::InProgress => "in-progress",
                CardStatus::Completed => "completed",
            }),
        }
    }
}

pub fn render_layout(cards: &[Card], args: &LayoutArgs, timeline: &TimelineConfig) -> Result<String> {
    render_layout_at(cards, args, timeline, OffsetDateTime::now_utc())
}

fn render_layout_at(
    cards: &[Card],
    args: &LayoutArgs,
    timeline: &TimelineConfig,
    today: OffsetDateTime,
) -> Result<String> {
    if !(args.width.is_finite() && args.width >= 0.0) {
        bail!("track width must be a non-negative number, got {}", args.width);
    }
    let window = resolve_window(cards, args, today)?;
    let layout = TimelineLayout::new(window, args.width)
        .with_dot_threshold(timeline.dot_threshold_px)
        .with_faded_opacity(timeline.faded_opacity);
    let rows = layout.rows(cards, &Selection::default());
    let records: Vec<LayoutRow> = rows
        .iter()
        .map(|row| LayoutRow::new(row.card, row.geometry.as_ref()))
        .collect();

    if args.json {
        let mut out = serde_json::to_string_pretty(&records).context("encoding layout")?;
        out.push('\n');
        return Ok(out);
    }

    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "window {} days, {:.2} px/day",
        window.total_days(),
        layout.pixels_per_day()
    );
    for record in &records {
        match (record.spacer_px, record.bar_width_px, record.mark) {
            (Some(spacer), Some(width), Some(mark)) => {
                let mut corners = Vec::new();
                if record.square_left {
                    corners.push("left");
                }
                if record.square_right {
                    corners.push("right");
                }
                let _ = writeln!(
                    &mut out,
                    "{:<8} {:<24} spacer {:>8.1}  width {:>8.1}  {:<3}  {}{}",
                    record.id,
                    record.name,
                    spacer,
                    width,
                    mark,
                    record.status.unwrap_or_default(),
                    if corners.is_empty() {
                        String::new()
                    } else {
                        format!("  square {}", corners.join(","))
                    }
                );
            }
            _ => {
                let _ = writeln!(&mut out, "{:<8} {:<24} no start date", record.id, record.name);
            }
        }
    }
    Ok(out)
}

fn resolve_window(cards: &[Card], args: &LayoutArgs, today: OffsetDateTime) -> Result<TimelineWindow> {
    let parse = |raw: &str| {
        parse_card_date(raw).ok_or_else(|| anyhow!("'{raw}' is not a date (expected YYYY-MM-DD)"))
    };
    let from = args.from.as_deref().map(parse).transpose()?;
    let to = args.to.as_deref().map(parse).transpose()?;
    let spanning = TimelineWindow::spanning(cards, today);
    let start = from
        .or_else(|| spanning.map(|window| window.start()))
        .context("no card has a start date; pass --from")?;
    let end = to
        .or_else(|| spanning.map(|window| window.end()))
        .unwrap_or(today);
    TimelineWindow::new(start, end).context("invalid timeline window")
}

pub fn new_card(cards: Vec<Card>, store: &dyn CardStore, args: &NewArgs) -> Result<ChangeOutcome> {
    let mut editor = CardEditor::create(cards);
    apply_assignments(&mut editor, &args.set)?;
    save(&mut editor, store, Save::Update)
}

pub fn edit_card(cards: Vec<Card>, store: &dyn CardStore, args: &EditArgs) -> Result<ChangeOutcome> {
    let mut editor = CardEditor::open(cards, &args.id)?;
    apply_assignments(&mut editor, &args.set)?;
    for raw in &args.remove {
        let (section, key) = parse_entry(raw)?;
        editor
            .remove_entry(section, key)
            .with_context(|| format!("removing {raw}"))?;
    }
    for raw in &args.rekey {
        let (from, to) = raw
            .split_once('=')
            .with_context(|| format!("'{raw}' is not FROM=TO"))?;
        let from: EntryKey = from.parse().with_context(|| format!("in '{raw}'"))?;
        editor
            .rekey_description(from, to)
            .with_context(|| format!("moving description {from}"))?;
    }
    if !editor.is_dirty() {
        tracing::info!(card_id = %args.id, "nothing to change");
        return Ok(ChangeOutcome::Unchanged {
            id: args.id.clone(),
        });
    }
    save(&mut editor, store, Save::Update)
}

pub fn delete_card(cards: Vec<Card>, store: &dyn CardStore, args: &DeleteArgs) -> Result<ChangeOutcome> {
    let mut editor = CardEditor::open(cards, &args.id)?;
    save(&mut editor, store, Save::Delete)
}

pub fn describe_outcome(outcome: &ChangeOutcome) -> String {
    match outcome {
        ChangeOutcome::Unchanged { id } => format!("Card {id} unchanged"),
        ChangeOutcome::Updated { id } => format!("Updated card {id}"),
        ChangeOutcome::Created { id } => format!("Created card {id}"),
        ChangeOutcome::Deleted { id } => format!("Deleted card {id}"),
    }
}

enum Save {
    Update,
    Delete,
}

fn save(editor: &mut CardEditor, store: &dyn CardStore, kind: Save) -> Result<ChangeOutcome> {
    let mut rng = StdRng::from_entropy();
    let request = match kind {
        Save::Update => editor.begin_save(&mut rng)?,
        Save::Delete => editor.begin_delete(&mut rng)?,
    };
    let result = store.update_data(&request.cards);
    let failure = result.as_ref().err().map(|err| err.user_message());
    match editor.finish_save(result)? {
        SaveResolution::Saved(outcome) => Ok(outcome),
        SaveResolution::Failed => Err(anyhow!(
            "{} rejected the update: {}",
            store.describe(),
            failure.unwrap_or_default()
        )),
    }
}

fn apply_assignments(editor: &mut CardEditor, assignments: &[String]) -> Result<()> {
    for raw in assignments {
        let (path, value) = raw
            .split_once('=')
            .with_context(|| format!("'{raw}' is not PATH=VALUE"))?;
        let path: FieldPath = path.parse()?;
        if let Some((section, key)) = path.entry() {
            if !editor.form().contains(path) && !editor.form().keys(section).contains(&key) {
                let added = editor.add_entry(section)?;
                if added != key {
                    bail!("{section}.{key} does not exist; the next free key is {added}");
                }
            }
        }
        editor
            .set_field(path, value)
            .with_context(|| format!("setting {path}"))?;
    }
    Ok(())
}

fn parse_entry(raw: &str) -> Result<(Section, EntryKey)> {
    let (section, key) = raw
        .split_once('.')
        .with_context(|| format!("'{raw}' is not SECTION.KEY"))?;
    let section: Section = section
        .parse()
        .map_err(|_| anyhow!("unknown section '{section}' (description, images, externalLinks)"))?;
    let key: EntryKey = key.parse().with_context(|| format!("in '{raw}'"))?;
    Ok((section, key))
}
