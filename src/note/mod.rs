use std::time::{Duration as StdDuration, Instant};

use anyhow::{Context, Result};
use time::{Duration, OffsetDateTime};

use crate::entry::{self, codec, Entry};
use crate::error::EngineError;
use crate::store::{BaseDir, FileStore};
use crate::util;

pub mod history;

use history::TextHistory;

/// Caller-supplied confirmation hook, invoked when a first save cannot derive
/// a slug from the note text and must fall back to the placeholder id. The
/// argument is the placeholder title; `false` declines the save.
pub type ConfirmSave<'a> = &'a mut dyn FnMut(&str) -> bool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: bool,
    pub old_id: String,
    pub new_id: String,
    pub title: String,
}

impl SaveOutcome {
    fn declined(id: &str, title: &str) -> Self {
        Self {
            saved: false,
            old_id: id.to_string(),
            new_id: id.to_string(),
            title: title.to_string(),
        }
    }
}

/// A titled, independently persisted document: an append-mostly entry stream
/// plus free-form persistent text with its own undo history.
#[derive(Debug)]
pub struct Note {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) entries: Vec<Entry>,
    pub(crate) persistent_text: String,
    pub(crate) saved_persistent_text: String,
    pub(crate) history: TextHistory,
    pub(crate) created: OffsetDateTime,
    pub(crate) last_saved: Option<OffsetDateTime>,
    pub(crate) entries_dirty: bool,
    /// False until the note has been saved once; until then the title and id
    /// are provisional and are re-derived from the text at first save.
    pub(crate) title_committed: bool,
}

impl Note {
    pub fn new(title: &str, created: OffsetDateTime) -> Self {
        Self {
            id: util::slugify(title),
            title: title.to_string(),
            entries: Vec::new(),
            persistent_text: String::new(),
            saved_persistent_text: String::new(),
            history: TextHistory::new(""),
            created: util::to_ms_precision(created),
            last_saved: None,
            entries_dirty: false,
            title_committed: false,
        }
    }

    pub fn load(store: &dyn FileStore, id: &str) -> Result<Self> {
        let raw = store
            .read_text(BaseDir::Data, &persistent_file(id))
            .with_context(|| format!("loading note {id:?}"))?;
        let meta = parse_metadata(&raw).with_context(|| format!("parsing metadata of {id:?}"))?;

        let entries_file = entries_file(id);
        let entries = if store.exists(BaseDir::Data, &entries_file)? {
            let bytes = store.read_binary(BaseDir::Data, &entries_file)?;
            codec::decode_stream(&bytes).with_context(|| format!("decoding entries of {id:?}"))?
        } else {
            tracing::warn!(note = id, "entries file missing, starting empty");
            Vec::new()
        };

        Ok(Self {
            id: id.to_string(),
            title: meta.title,
            entries,
            persistent_text: meta.body.clone(),
            saved_persistent_text: meta.body.clone(),
            history: TextHistory::new(meta.body),
            created: meta.created,
            last_saved: meta.last_saved,
            entries_dirty: false,
            title_committed: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn last_saved(&self) -> Option<OffsetDateTime> {
        self.last_saved
    }

    pub fn persistent_text(&self) -> &str {
        &self.persistent_text
    }

    /// The note's own entry stream. For a plain note this is also what gets
    /// displayed; the Overview overrides the displayed projection.
    pub fn own_entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn displayed_entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_unsaved(&self) -> bool {
        self.entries_dirty || self.persistent_text_dirty() || !self.title_committed
    }

    pub fn persistent_text_dirty(&self) -> bool {
        self.persistent_text != self.saved_persistent_text
    }

    /// Persist entries and text. On the first save the title is derived from
    /// the first line of the persistent text; an empty-slug derivation asks
    /// `confirm` whether to keep the placeholder id. Dirty flags are cleared
    /// only after both writes succeed, so a failed save can be retried.
    pub fn save(
        &mut self,
        store: &dyn FileStore,
        confirm: ConfirmSave,
        now: OffsetDateTime,
    ) -> Result<SaveOutcome> {
        let old_id = self.id.clone();

        if !self.title_committed {
            let derived = self.persistent_text.lines().next().unwrap_or("").trim();
            let slug = util::slugify(derived);
            if slug.is_empty() {
                if !confirm(&self.title) {
                    tracing::debug!(note = %old_id, "save declined by caller");
                    return Ok(SaveOutcome::declined(&old_id, &self.title));
                }
                // Keep the placeholder title/id, confirmed by the caller.
            } else {
                self.title = derived.to_string();
                self.id = slug;
            }
        }

        let encoded = codec::encode_stream(&self.entries)
            .with_context(|| format!("encoding entries of {:?}", self.id))?;
        store.write_binary(BaseDir::Data, &entries_file(&self.id), &encoded)?;

        let last_saved = util::to_ms_precision(now);
        let metadata = render_metadata(
            &self.title,
            self.created,
            Some(last_saved),
            &self.persistent_text,
        );
        store.write_text(BaseDir::Data, &persistent_file(&self.id), &metadata)?;

        self.saved_persistent_text = self.persistent_text.clone();
        self.entries_dirty = false;
        self.title_committed = true;
        self.last_saved = Some(last_saved);

        Ok(SaveOutcome {
            saved: true,
            old_id,
            new_id: self.id.clone(),
            title: self.title.clone(),
        })
    }

    /// Rename. The id is re-slugified; the caller owns migrating every
    /// structure keyed by the old id. Returns `false` for a blank title.
    pub fn update_title(&mut self, raw_title: &str) -> bool {
        let trimmed = raw_title.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.title = trimmed.to_string();
        let slug = util::slugify(trimmed);
        if !slug.is_empty() {
            self.id = slug;
        }
        // The note must be rewritten under its new identity.
        self.entries_dirty = true;
        true
    }

    pub fn update_persistent_text(
        &mut self,
        text: &str,
        now: Instant,
        capacity: usize,
        debounce: StdDuration,
    ) {
        self.persistent_text = text.to_string();
        self.history.record(text, now, capacity, debounce);
    }

    /// Step back in the text history. The pending edit is flushed first so it
    /// becomes the redo target rather than being lost. `false` at the boundary.
    pub fn undo(&mut self, now: Instant, capacity: usize) -> bool {
        let pending = self.persistent_text.clone();
        self.history.flush(&pending, now, capacity);
        match self.history.undo() {
            Some(text) => {
                self.persistent_text = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, now: Instant, capacity: usize) -> bool {
        let pending = self.persistent_text.clone();
        // A pending edit truncates the redo tail, making this a boundary.
        self.history.flush(&pending, now, capacity);
        match self.history.redo() {
            Some(text) => {
                self.persistent_text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Append an entry. The group id carries over from the previous entry
    /// unless more than `group_interval` elapsed since it was created.
    pub fn create_new_entry(
        &mut self,
        text: &str,
        now: OffsetDateTime,
        indent_level: u8,
        group_interval: Duration,
        quoted_id: Option<u16>,
    ) -> Entry {
        let now = util::to_ms_precision(now);
        let group_id = entry::next_group_id(self.entries.last(), now, group_interval);
        let entry = Entry::new(self.entries.len() as u16, group_id, text, now, indent_level)
            .with_quote(quoted_id);
        self.entries.push(entry.clone());
        self.entries_dirty = true;
        entry
    }

    pub fn modify_entry(&mut self, id: u16, new_text: &str, edited: OffsetDateTime) -> Result<()> {
        match entry::modify_text(&mut self.entries, id, new_text, edited) {
            Some(true) => {
                self.entries_dirty = true;
                Ok(())
            }
            Some(false) => Ok(()),
            None => Err(EngineError::NotFound(format!(
                "entry {id} in note {:?}",
                self.id
            ))
            .into()),
        }
    }

    pub fn delete_entry(&mut self, id: u16) -> Result<()> {
        if !entry::delete_and_renumber(&mut self.entries, id) {
            return Err(EngineError::NotFound(format!(
                "entry {id} in note {:?}",
                self.id
            ))
            .into());
        }
        self.entries_dirty = true;
        Ok(())
    }
}

pub(crate) fn entries_file(id: &str) -> String {
    format!("{id}-entries.bin")
}

pub(crate) fn persistent_file(id: &str) -> String {
    format!("{id}-persistent.md")
}

struct Metadata {
    title: String,
    created: OffsetDateTime,
    last_saved: Option<OffsetDateTime>,
    body: String,
}

/// Frontmatter block followed by the raw persistent text:
/// `---\ntitle: t\ncreated: ms\nlastSaved: ms\n---\n<body>`.
fn render_metadata(
    title: &str,
    created: OffsetDateTime,
    last_saved: Option<OffsetDateTime>,
    body: &str,
) -> String {
    format!(
        "---\ntitle: {title}\ncreated: {}\nlastSaved: {}\n---\n{body}",
        util::epoch_ms(created),
        last_saved.map_or(0, util::epoch_ms),
    )
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    let rest = raw
        .strip_prefix("---\n")
        .ok_or_else(|| EngineError::CorruptRecord("missing frontmatter opening".into()))?;
    let (header, body) = rest
        .split_once("\n---\n")
        .ok_or_else(|| EngineError::CorruptRecord("unterminated frontmatter".into()))?;

    let mut title = None;
    let mut created_ms = 0u64;
    let mut saved_ms = 0u64;
    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "title" => title = Some(value.to_string()),
            "created" => created_ms = value.parse().unwrap_or(0),
            "lastSaved" => saved_ms = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let created = util::from_epoch_ms(created_ms)
        .ok_or_else(|| EngineError::CorruptRecord(format!("created timestamp {created_ms}ms")))?;
    let last_saved = (saved_ms != 0).then(|| util::from_epoch_ms(saved_ms)).flatten();

    Ok(Metadata {
        title: title.ok_or_else(|| EngineError::CorruptRecord("frontmatter lacks title".into()))?,
        created,
        last_saved,
        body: body.to_string(),
    })
}
