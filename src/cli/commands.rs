use std::fmt::Write as _;
use std::io::{self, IsTerminal, Read};

use anyhow::{bail, Context, Result};
use clap::Args;
use time::OffsetDateTime;

use crate::entry::Entry;
use crate::overview::OVERVIEW_ID;
use crate::registry::NoteRegistry;
use crate::util;

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Note identifier (slug)
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Title for the note (prompted if omitted)
    #[arg()]
    pub title: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Entry text. If omitted, reads from stdin.
    #[arg()]
    pub text: Option<String>,
    /// Target note (defaults to the active note from the last session)
    #[arg(long)]
    pub note: Option<String>,
    /// Quote an existing entry by id
    #[arg(long)]
    pub quote: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub struct OverviewArgs {
    /// Start of the date window (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub date: Option<String>,
    /// Number of days in the window
    #[arg(long, default_value_t = 1)]
    pub days: i64,
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Note to save (defaults to every note plus the overview)
    #[arg()]
    pub id: Option<String>,
}

pub fn list_notes(registry: &NoteRegistry) -> Result<()> {
    let mut out = String::new();
    for id in registry.open_note_ids() {
        let _ = writeln!(&mut out, "{}", describe(registry, id, "open"));
    }
    for id in registry.unopened_note_ids() {
        let _ = writeln!(&mut out, "{}", describe(registry, id, ""));
    }
    let _ = writeln!(&mut out, "{}", describe(registry, OVERVIEW_ID, ""));
    print!("{out}");
    Ok(())
}

fn describe(registry: &NoteRegistry, id: &str, marker: &str) -> String {
    let data = registry.get_note_data(Some(id));
    let title = data.as_ref().map(|d| d.title.as_str()).unwrap_or("<missing>");
    let unsaved = data.as_ref().is_some_and(|d| d.is_unsaved);
    let mut line = format!("{id:<32} {title}");
    if !marker.is_empty() {
        line.push_str("  [");
        line.push_str(marker);
        line.push(']');
    }
    if unsaved {
        line.push_str("  *unsaved");
    }
    line
}

pub fn show_note(registry: &mut NoteRegistry, args: ShowArgs) -> Result<()> {
    if registry.change_current_note(&args.id).is_none() {
        bail!("no note with id '{}'", args.id);
    }
    if args.id == OVERVIEW_ID {
        registry.update_overview();
    }

    let entries = registry.current_entries();
    print!("{}", format_entries(&entries));
    let text = registry.get_persistent_text(Some(&args.id));
    if !text.is_empty() {
        println!("---");
        println!("{text}");
    }
    Ok(())
}

fn format_entries(entries: &[Entry]) -> String {
    let offset = util::local_offset();
    let mut out = String::new();
    let mut previous_group = None;
    for entry in entries {
        if previous_group.is_some() && previous_group != Some(entry.group_id) {
            out.push('\n');
        }
        previous_group = Some(entry.group_id);

        let stamp = util::format_date_time(entry.created, offset);
        let indent = "\t".repeat(entry.indent_level as usize);
        let _ = write!(&mut out, "[{stamp}] {indent}{}", entry.text);
        if let Some(quoted) = entry.quoted_id {
            let _ = write!(&mut out, "  (quotes #{quoted})");
        }
        if entry.last_edited.is_some() {
            out.push_str("  (edited)");
        }
        out.push('\n');
    }
    out
}

pub fn new_note(registry: &mut NoteRegistry, args: NewArgs) -> Result<()> {
    let title = match args.title {
        Some(t) => t,
        None => prompt("Title")?,
    };
    let title = title.trim();
    let id = registry
        .create_note((!title.is_empty()).then_some(title), OffsetDateTime::now_utc())
        .context("creating note")?;
    println!("Created note '{id}'");
    Ok(())
}

pub fn submit_entry(registry: &mut NoteRegistry, args: SubmitArgs) -> Result<()> {
    if let Some(id) = &args.note {
        if registry.change_current_note(id).is_none() {
            bail!("no note with id '{id}'");
        }
    }
    let text = match args.text {
        Some(text) => text,
        None => read_stdin()?.unwrap_or_default(),
    };

    let now = OffsetDateTime::now_utc();
    let Some(entry) = registry.submit_entry(&text, now, args.quote)? else {
        bail!("entry text cannot be empty");
    };

    let target = registry.active_note_id().to_string();
    let outcome = registry.save_note(&target, &mut confirm_title, now)?;
    if outcome.saved {
        println!(
            "Added entry #{} to '{}' (group {})",
            entry.id, outcome.new_id, entry.group_id
        );
    } else {
        println!("Added entry #{} to '{target}' (not saved)", entry.id);
    }
    Ok(())
}

pub fn show_overview(registry: &mut NoteRegistry, args: OverviewArgs) -> Result<()> {
    registry.update_overview();

    let overview = registry.overview_mut();
    let start = match &args.date {
        Some(raw) => util::parse_date(raw).with_context(|| format!("parsing date '{raw}'"))?,
        None => overview.valid_dates().1,
    };
    let end = start
        .checked_add(time::Duration::days(args.days.max(1) - 1))
        .unwrap_or(start);
    if !overview.update_selected_date(start, Some(end)) {
        let (earliest, latest) = overview.valid_dates();
        bail!(
            "window {start} to {end} is outside the recorded range ({} to {})",
            util::format_date(earliest),
            util::format_date(latest)
        );
    }

    let entries = overview.displayed_entries().to_vec();
    if entries.is_empty() {
        println!("No entries between {start} and {end}.");
        return Ok(());
    }
    print!("{}", format_entries(&entries));
    Ok(())
}

pub fn save(registry: &mut NoteRegistry, args: SaveArgs) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    let outcomes = match args.id {
        Some(id) => vec![registry
            .save_note(&id, &mut confirm_title, now)
            .with_context(|| format!("saving note '{id}'"))?],
        None => registry.save_all_notes(&mut confirm_title, now)?,
    };

    for outcome in outcomes {
        if !outcome.saved {
            println!("Skipped '{}' (declined)", outcome.old_id);
        } else if outcome.old_id != outcome.new_id {
            println!("Saved '{}' (renamed from '{}')", outcome.new_id, outcome.old_id);
        } else {
            println!("Saved '{}'", outcome.new_id);
        }
    }
    registry.save_metadata()?;
    Ok(())
}

/// First-save confirmation when no title can be derived from the text.
fn confirm_title(current: &str) -> bool {
    if !io::stdin().is_terminal() {
        return true;
    }
    match prompt(&format!("Keep title '{current}'? [Y/n]")) {
        Ok(answer) => !answer.trim().eq_ignore_ascii_case("n"),
        Err(_) => true,
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> OffsetDateTime {
        util::from_epoch_ms(ms).unwrap()
    }

    #[test]
    fn entry_formatting_breaks_between_groups() {
        let mut first = Entry::new(0, 1, "alpha", at(1_700_000_000_000), 0);
        first.last_edited = Some(at(1_700_000_100_000));
        let second = Entry::new(1, 1, "beta", at(1_700_000_030_000), 1);
        let third = Entry::new(2, 2, "gamma", at(1_700_001_000_000), 0).with_quote(Some(0));

        let out = format_entries(&[first, second, third]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("alpha  (edited)"));
        assert!(lines[1].contains("\tbeta"));
        assert_eq!(lines[2], "");
        assert!(lines[3].ends_with("gamma  (quotes #0)"));
    }
}
