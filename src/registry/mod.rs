use std::time::Instant;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

use crate::config::UserSettings;
use crate::entry::Entry;
use crate::error::EngineError;
use crate::note::{ConfirmSave, Note, SaveOutcome};
use crate::overview::{Overview, OVERVIEW_ID};
use crate::store::{BaseDir, FileStore};
use crate::util;

/// Serialized session snapshot. Partial on disk: missing fields fall back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionData {
    pub current_note_id: String,
    pub open_notes: Vec<String>,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            current_note_id: OVERVIEW_ID.to_string(),
            open_notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteHandle {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct NoteData {
    pub id: String,
    pub title: String,
    pub is_unsaved: bool,
}

/// Per-id results of a bulk load; one broken note never aborts the rest.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<NoteHandle>,
    pub failed: Vec<(String, String)>,
}

/// Owns every note plus the Overview, the open/unopened id sets, and the
/// session snapshot. All operations run on one logical actor; every mutation
/// that must survive a restart rewrites the cache.
///
/// Invariant: `open_notes` and `unopened_notes` are disjoint, each plain note
/// id lives in exactly one of them, and `.overview` lives in neither.
pub struct NoteRegistry {
    store: Box<dyn FileStore>,
    settings: UserSettings,
    notes: IndexMap<String, Note>,
    overview: Overview,
    open_notes: Vec<String>,
    unopened_notes: Vec<String>,
    active_note_id: String,
    tz: UtcOffset,
}

impl NoteRegistry {
    pub fn new(store: Box<dyn FileStore>, settings: UserSettings, now: OffsetDateTime) -> Self {
        Self::with_offset(store, settings, now, util::local_offset())
    }

    pub fn with_offset(
        store: Box<dyn FileStore>,
        settings: UserSettings,
        now: OffsetDateTime,
        tz: UtcOffset,
    ) -> Self {
        Self {
            store,
            settings,
            notes: IndexMap::new(),
            overview: Overview::new(now, tz),
            open_notes: Vec::new(),
            unopened_notes: Vec::new(),
            active_note_id: OVERVIEW_ID.to_string(),
            tz,
        }
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn active_note_id(&self) -> &str {
        &self.active_note_id
    }

    pub fn overview(&self) -> &Overview {
        &self.overview
    }

    pub fn overview_mut(&mut self) -> &mut Overview {
        &mut self.overview
    }

    pub fn open_note_ids(&self) -> &[String] {
        &self.open_notes
    }

    pub fn unopened_note_ids(&self) -> &[String] {
        &self.unopened_notes
    }

    fn has_note(&self, id: &str) -> bool {
        id == OVERVIEW_ID || self.notes.contains_key(id)
    }

    fn note_ref(&self, id: &str) -> Option<&Note> {
        if id == OVERVIEW_ID {
            Some(self.overview.as_note())
        } else {
            self.notes.get(id)
        }
    }

    fn note_mut(&mut self, id: &str) -> Option<&mut Note> {
        if id == OVERVIEW_ID {
            Some(self.overview.as_note_mut())
        } else {
            self.notes.get_mut(id)
        }
    }

    /// Read the headings index and load every listed note. Missing index
    /// means a fresh profile: empty registry, Overview active. Per-note
    /// failures are reported, logged, and skipped.
    pub fn load_all_notes(&mut self, now: OffsetDateTime) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let headings_file = self.settings.headings_file();

        if !self.store.exists(BaseDir::Data, &headings_file)? {
            tracing::info!("no headings index, starting with an empty registry");
            self.change_current_note(OVERVIEW_ID);
            return Ok(report);
        }

        let raw = self
            .store
            .read_text(BaseDir::Data, &headings_file)
            .context("reading headings index")?;
        for note_id in raw.lines().map(str::trim).filter(|id| !id.is_empty()) {
            if note_id == OVERVIEW_ID {
                match Overview::load(self.store.as_ref(), now, self.tz) {
                    Ok(overview) => self.overview = overview,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not load the overview");
                        report.failed.push((note_id.to_string(), format!("{err:#}")));
                    }
                }
                continue;
            }
            match Note::load(self.store.as_ref(), note_id) {
                Ok(note) => {
                    report.loaded.push(NoteHandle {
                        id: note_id.to_string(),
                        title: note.title().to_string(),
                    });
                    self.add_note(note);
                }
                Err(err) => {
                    tracing::warn!(note = note_id, error = %err, "could not load note");
                    report.failed.push((note_id.to_string(), format!("{err:#}")));
                }
            }
        }

        if report.loaded.is_empty() {
            self.change_current_note(OVERVIEW_ID);
        }
        Ok(report)
    }

    /// Re-open the notes recorded in the session cache and restore the active
    /// note, falling back to the Overview when the snapshot points nowhere.
    pub fn restore_previous_session(&mut self) -> Result<Vec<NoteHandle>> {
        let cache_file = self.settings.cache_file();
        if !self.store.exists(BaseDir::Cache, &cache_file)? {
            return Ok(Vec::new());
        }

        let raw = self
            .store
            .read_text(BaseDir::Cache, &cache_file)
            .context("reading session cache")?;
        let session: SessionData = serde_json::from_str(&raw).context("parsing session cache")?;

        let mut reopened = Vec::new();
        for note_id in &session.open_notes {
            if self.unopened_notes.contains(note_id) {
                reopened.push(self.open_note(note_id)?);
            } else {
                tracing::warn!(note = %note_id, "session lists an unknown note, skipping");
            }
        }

        self.active_note_id = if self.has_note(&session.current_note_id) {
            session.current_note_id
        } else {
            OVERVIEW_ID.to_string()
        };
        self.write_to_cache()?;
        Ok(reopened)
    }

    pub fn create_note(&mut self, title: Option<&str>, now: OffsetDateTime) -> Result<String> {
        let title = match title {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => format!("Untitled {}", self.notes.len() + 1),
        };
        let note = Note::new(&title, now);
        let id = note.id().to_string();
        if self.has_note(&id) {
            bail!(EngineError::InvalidState(format!(
                "note id {id:?} already registered"
            )));
        }
        self.add_note(note);
        self.save_metadata()?;
        Ok(id)
    }

    fn add_note(&mut self, note: Note) {
        let id = note.id().to_string();
        self.notes.insert(id.clone(), note);
        self.unopened_notes.push(id);
    }

    /// Remove a note entirely. The Overview is not deletable.
    pub fn delete_note(&mut self, id: &str) -> Result<bool> {
        if id == OVERVIEW_ID {
            return Ok(false);
        }
        if self.notes.shift_remove(id).is_none() {
            bail!(EngineError::NotFound(format!("note {id:?}")));
        }
        self.open_notes.retain(|open| open != id);
        self.unopened_notes.retain(|unopened| unopened != id);
        if self.active_note_id == id {
            self.active_note_id = OVERVIEW_ID.to_string();
        }
        self.save_metadata()?;
        Ok(true)
    }

    /// Move an id from the unopened to the open set.
    pub fn open_note(&mut self, id: &str) -> Result<NoteHandle> {
        let Some(position) = self.unopened_notes.iter().position(|n| n == id) else {
            bail!(EngineError::InvalidState(format!(
                "note {id:?} is not in the unopened set"
            )));
        };
        self.unopened_notes.remove(position);
        self.open_notes.push(id.to_string());

        let note = self
            .notes
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("note {id:?}")))?;
        let handle = NoteHandle {
            id: id.to_string(),
            title: note.title().to_string(),
        };
        self.write_to_cache()?;
        Ok(handle)
    }

    /// Close an open note (default: the active one) and fall back to the last
    /// remaining open note, or the Overview when none remain.
    pub fn close_note(&mut self, id: Option<&str>) -> Result<String> {
        let id = id.unwrap_or(&self.active_note_id).to_string();
        let Some(position) = self.open_notes.iter().position(|n| *n == id) else {
            bail!(EngineError::InvalidState(format!(
                "note {id:?} is not in the open set"
            )));
        };
        self.open_notes.remove(position);
        self.unopened_notes.push(id);

        let next_id = self
            .open_notes
            .last()
            .cloned()
            .unwrap_or_else(|| OVERVIEW_ID.to_string());
        self.change_current_note(&next_id);
        self.write_to_cache()?;
        Ok(next_id)
    }

    /// Pure state transition; `None` when the id is unknown. Callers flush
    /// pending persistent-text edits on the previous note first.
    pub fn change_current_note(&mut self, id: &str) -> Option<String> {
        if !self.has_note(id) {
            return None;
        }
        self.active_note_id = id.to_string();
        Some(self.active_note_id.clone())
    }

    /// Rebuild the Overview's aggregation from every note's own entries.
    pub fn update_overview(&mut self) {
        let sources: Vec<(String, Vec<Entry>)> = self
            .notes
            .iter()
            .map(|(id, note)| (id.clone(), note.own_entries().to_vec()))
            .collect();
        self.overview.update_entries(&sources);
    }

    /// Save one note. A first save of an untitled note can change its id;
    /// every structure keyed by the old id is migrated together so the
    /// registry never holds a dangling reference.
    pub fn save_note(
        &mut self,
        id: &str,
        confirm: ConfirmSave,
        now: OffsetDateTime,
    ) -> Result<SaveOutcome> {
        if id == OVERVIEW_ID {
            self.overview.save(self.store.as_ref(), now)?;
            return Ok(SaveOutcome {
                saved: true,
                old_id: OVERVIEW_ID.to_string(),
                new_id: OVERVIEW_ID.to_string(),
                title: self.overview.as_note().title().to_string(),
            });
        }

        let Some(mut note) = self.notes.shift_remove(id) else {
            bail!(EngineError::NotFound(format!("note {id:?}")));
        };
        let save_result = note.save(self.store.as_ref(), confirm, now);
        let new_id = note.id().to_string();
        self.notes.insert(new_id.clone(), note);

        if new_id != id {
            migrate_id(&mut self.open_notes, id, &new_id);
            migrate_id(&mut self.unopened_notes, id, &new_id);
            if self.active_note_id == id {
                self.active_note_id = new_id.clone();
            }
            tracing::debug!(old = id, new = %new_id, "note re-keyed on save");
            self.write_to_cache()?;
        }

        save_result
    }

    /// Save every note plus the Overview, sequentially, then the metadata.
    pub fn save_all_notes(
        &mut self,
        confirm: ConfirmSave,
        now: OffsetDateTime,
    ) -> Result<Vec<SaveOutcome>> {
        let ids: Vec<String> = self.notes.keys().cloned().collect();
        let mut outcomes = Vec::with_capacity(ids.len() + 1);
        for id in ids {
            outcomes.push(self.save_note(&id, confirm, now)?);
        }
        outcomes.push(self.save_note(OVERVIEW_ID, confirm, now)?);
        self.save_metadata()?;
        Ok(outcomes)
    }

    /// Rename a note, re-keying every id-indexed structure atomically.
    pub fn update_note_title(&mut self, old_id: &str, raw_title: &str) -> Option<NoteHandle> {
        if old_id == OVERVIEW_ID {
            return None;
        }
        let mut note = self.notes.shift_remove(old_id)?;
        note.update_title(raw_title);
        let new_id = note.id().to_string();
        let handle = NoteHandle {
            id: new_id.clone(),
            title: note.title().to_string(),
        };
        self.notes.insert(new_id.clone(), note);

        if new_id != old_id {
            migrate_id(&mut self.open_notes, old_id, &new_id);
            migrate_id(&mut self.unopened_notes, old_id, &new_id);
            if self.active_note_id == old_id {
                self.active_note_id = new_id;
            }
        }
        if let Err(err) = self.write_to_cache() {
            tracing::warn!(error = %err, "could not persist session cache after rename");
        }
        Some(handle)
    }

    /// Route new persistent text into a note's edit buffer and undo history.
    /// Returns whether the note's unsaved-ness flipped.
    pub fn update_persistent_text(&mut self, text: &str, id: Option<&str>, now: Instant) -> bool {
        let id = id.unwrap_or(&self.active_note_id).to_string();
        let capacity = self.settings.undo_stack_size;
        let debounce = self.settings.save_debounce();
        let Some(note) = self.note_mut(&id) else {
            return false;
        };
        let was_unsaved = note.is_unsaved();
        note.update_persistent_text(text, now, capacity, debounce);
        was_unsaved != note.is_unsaved()
    }

    pub fn undo(&mut self, now: Instant) -> bool {
        let capacity = self.settings.undo_stack_size;
        let active = self.active_note_id.clone();
        match self.note_mut(&active) {
            Some(note) => note.undo(now, capacity),
            None => false,
        }
    }

    pub fn redo(&mut self, now: Instant) -> bool {
        let capacity = self.settings.undo_stack_size;
        let active = self.active_note_id.clone();
        match self.note_mut(&active) {
            Some(note) => note.redo(now, capacity),
            None => false,
        }
    }

    /// Append an entry to the active note (or the Overview's own stream).
    /// Blank submissions are ignored. The indent level comes from the last
    /// line's leading indent strings.
    pub fn submit_entry(
        &mut self,
        text: &str,
        now: OffsetDateTime,
        quoted_id: Option<u16>,
    ) -> Result<Option<Entry>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let last_line = text.lines().last().unwrap_or("");
        let indent_level = util::count_leading_indents(last_line, &self.settings.indent_string);
        let interval = self.settings.group_interval_duration();

        let entry = if self.active_note_id == OVERVIEW_ID {
            let entry = self
                .overview
                .create_new_entry(text, now, indent_level, interval, quoted_id);
            self.update_overview();
            entry
        } else {
            let active = self.active_note_id.clone();
            let Some(note) = self.notes.get_mut(&active) else {
                return Ok(None);
            };
            note.create_new_entry(text, now, indent_level, interval, quoted_id)
        };

        self.write_to_cache()?;
        Ok(Some(entry))
    }

    pub fn entry_text(&self, display_index: usize) -> Result<String> {
        let note = self
            .note_ref(&self.active_note_id)
            .ok_or_else(|| EngineError::NotFound(format!("note {:?}", self.active_note_id)))?;
        note.displayed_entries()
            .get(display_index)
            .map(|entry| entry.text.clone())
            .ok_or_else(|| EngineError::NotFound(format!("entry {display_index}")).into())
    }

    /// Edit an entry by display index on the active note. On the Overview the
    /// index resolves through the projection back to the source note; the
    /// projection is rebuilt afterwards. Returns the owning note's id.
    pub fn edit_entry(
        &mut self,
        display_index: usize,
        new_text: &str,
        edited: OffsetDateTime,
    ) -> Result<String> {
        if self.active_note_id == OVERVIEW_ID {
            let (source_id, original_id) = self.resolve_overview_index(display_index)?;
            if source_id == OVERVIEW_ID {
                if !self.overview.modify_own_entry(original_id, new_text, edited) {
                    bail!(EngineError::NotFound(format!("overview entry {original_id}")));
                }
            } else {
                let note = self
                    .notes
                    .get_mut(&source_id)
                    .ok_or_else(|| EngineError::NotFound(format!("note {source_id:?}")))?;
                note.modify_entry(original_id, new_text, edited)?;
            }
            self.update_overview();
            return Ok(source_id);
        }

        let active = self.active_note_id.clone();
        let note = self
            .notes
            .get_mut(&active)
            .ok_or_else(|| EngineError::NotFound(format!("note {active:?}")))?;
        note.modify_entry(display_index as u16, new_text, edited)?;
        Ok(active)
    }

    /// Delete an entry by display index; same routing rules as `edit_entry`.
    pub fn delete_entry(&mut self, display_index: usize) -> Result<String> {
        if self.active_note_id == OVERVIEW_ID {
            let (source_id, original_id) = self.resolve_overview_index(display_index)?;
            if source_id == OVERVIEW_ID {
                if !self.overview.delete_own_entry(original_id) {
                    bail!(EngineError::NotFound(format!("overview entry {original_id}")));
                }
            } else {
                let note = self
                    .notes
                    .get_mut(&source_id)
                    .ok_or_else(|| EngineError::NotFound(format!("note {source_id:?}")))?;
                note.delete_entry(original_id)?;
            }
            self.update_overview();
            return Ok(source_id);
        }

        let active = self.active_note_id.clone();
        let note = self
            .notes
            .get_mut(&active)
            .ok_or_else(|| EngineError::NotFound(format!("note {active:?}")))?;
        note.delete_entry(display_index as u16)?;
        Ok(active)
    }

    fn resolve_overview_index(&self, display_index: usize) -> Result<(String, u16)> {
        let sourced = self
            .overview
            .sourced_entry(display_index)
            .ok_or_else(|| EngineError::NotFound(format!("displayed entry {display_index}")))?;
        Ok((sourced.source_note_id.clone(), sourced.original_id))
    }

    /// Move an open note within the tab order. Out-of-bounds indices and
    /// unknown ids are ignored.
    pub fn reorder_open_notes(&mut self, id: &str, new_index: usize) -> Result<()> {
        if new_index > self.open_notes.len() {
            return Ok(());
        }
        let Some(position) = self.open_notes.iter().position(|n| n == id) else {
            return Ok(());
        };
        let id = self.open_notes.remove(position);
        let insert_at = new_index.min(self.open_notes.len());
        self.open_notes.insert(insert_at, id);
        self.write_to_cache()
    }

    pub fn get_note_data(&self, id: Option<&str>) -> Option<NoteData> {
        let id = id.unwrap_or(&self.active_note_id);
        let note = self.note_ref(id)?;
        Some(NoteData {
            id: id.to_string(),
            title: note.title().to_string(),
            is_unsaved: note.is_unsaved(),
        })
    }

    pub fn get_persistent_text(&self, id: Option<&str>) -> String {
        let id = id.unwrap_or(&self.active_note_id);
        self.note_ref(id)
            .map(|note| note.persistent_text().to_string())
            .unwrap_or_default()
    }

    pub fn current_entries(&self) -> Vec<Entry> {
        self.note_ref(&self.active_note_id)
            .map(|note| note.displayed_entries().to_vec())
            .unwrap_or_default()
    }

    pub fn is_anything_unsaved(&self) -> bool {
        self.overview.is_unsaved() || self.notes.values().any(Note::is_unsaved)
    }

    /// Persist the headings index (open order, then unopened, then the
    /// Overview sentinel) and the session cache.
    pub fn save_metadata(&mut self) -> Result<()> {
        let headings: String = self
            .open_notes
            .iter()
            .chain(self.unopened_notes.iter())
            .map(String::as_str)
            .chain(std::iter::once(OVERVIEW_ID))
            .collect::<Vec<_>>()
            .join("\n");
        self.store
            .write_text(BaseDir::Data, &self.settings.headings_file(), &headings)
            .context("writing headings index")?;
        self.write_to_cache()
    }

    pub fn write_to_cache(&self) -> Result<()> {
        let session = SessionData {
            current_note_id: self.active_note_id.clone(),
            open_notes: self.open_notes.clone(),
        };
        let json = serde_json::to_string_pretty(&session).context("serializing session cache")?;
        self.store
            .write_text(BaseDir::Cache, &self.settings.cache_file(), &json)
            .context("writing session cache")
    }
}

fn migrate_id(ids: &mut Vec<String>, old_id: &str, new_id: &str) {
    if let Some(position) = ids.iter().position(|id| id == old_id) {
        ids.remove(position);
        ids.push(new_id.to_string());
    }
}
