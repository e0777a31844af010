use std::collections::BTreeMap;

use anyhow::{Context, Result};
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::entry::{codec, Entry};
use crate::note::{self, Note};
use crate::store::{BaseDir, FileStore};
use crate::util;

/// Reserved id of the aggregator; never a member of the open/unopened sets.
pub const OVERVIEW_ID: &str = ".overview";

/// A displayed Overview entry: a clone carrying its recomputed display group
/// id, plus enough provenance to route edits back to the owning note.
#[derive(Debug, Clone)]
pub struct SourcedEntry {
    pub entry: Entry,
    pub source_note_id: String,
    pub original_id: u16,
}

/// Selected window over the aggregated days: a start day plus a signed length
/// in days. Bound accessors normalise the sign convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Date,
    pub range_days: i64,
}

impl DateRange {
    pub fn single(start: Date) -> Self {
        Self {
            start,
            range_days: 1,
        }
    }

    fn span(&self) -> i64 {
        self.range_days.unsigned_abs().max(1) as i64
    }

    fn other_end(&self) -> Date {
        let offset = if self.range_days >= 0 {
            self.span() - 1
        } else {
            1 - self.span()
        };
        self.start
            .checked_add(Duration::days(offset))
            .unwrap_or(self.start)
    }

    pub fn earlier_date(&self) -> Date {
        self.start.min(self.other_end())
    }

    pub fn later_date(&self) -> Date {
        self.start.max(self.other_end())
    }

    fn shifted(&self, days: i64) -> Self {
        Self {
            start: self
                .start
                .checked_add(Duration::days(days))
                .unwrap_or(self.start),
            range_days: self.range_days,
        }
    }
}

/// The synthetic note that aggregates every note's entries into a single
/// time-windowed view. Its own authored entries are a separate persisted
/// stream; the displayed projection is fully recomputed, never incremental.
#[derive(Debug)]
pub struct Overview {
    base: Note,
    overview_entries: Vec<Entry>,
    aggregated: BTreeMap<Date, Vec<SourcedEntry>>,
    displayed: Vec<SourcedEntry>,
    earliest: Date,
    current: Date,
    selected: DateRange,
    tz: UtcOffset,
}

impl Overview {
    pub fn new(now: OffsetDateTime, tz: UtcOffset) -> Self {
        let today = util::day_of(now, tz);
        let mut base = Note::new("Overview", now);
        base.id = OVERVIEW_ID.to_string();
        base.title_committed = true;
        Self {
            base,
            overview_entries: Vec::new(),
            aggregated: BTreeMap::new(),
            displayed: Vec::new(),
            earliest: today,
            current: today,
            selected: DateRange::single(today),
            tz,
        }
    }

    /// Load the aggregator's own persisted stream. Both files are optional:
    /// a fresh profile simply has no `.overview` state yet.
    pub fn load(store: &dyn FileStore, now: OffsetDateTime, tz: UtcOffset) -> Result<Self> {
        let mut overview = Self::new(now, tz);

        let entries_file = note::entries_file(OVERVIEW_ID);
        if store.exists(BaseDir::Data, &entries_file)? {
            let bytes = store.read_binary(BaseDir::Data, &entries_file)?;
            overview.overview_entries =
                codec::decode_stream(&bytes).context("decoding overview entries")?;
        }

        let persistent_file = note::persistent_file(OVERVIEW_ID);
        if store.exists(BaseDir::Data, &persistent_file)? {
            let loaded = Note::load(store, OVERVIEW_ID).context("loading overview metadata")?;
            overview.base = loaded;
        }

        Ok(overview)
    }

    /// The aggregator persists unconditionally: no title derivation, no
    /// confirmation, the reserved id never changes.
    pub fn save(&mut self, store: &dyn FileStore, now: OffsetDateTime) -> Result<()> {
        // The displayed projection is derived state; the own stream is what
        // gets persisted, so swap it in for the duration of the write.
        let snapshot = std::mem::take(&mut self.base.entries);
        self.base.entries = self.overview_entries.clone();
        let result = {
            let mut keep = |_: &str| true;
            self.base.save(store, &mut keep, now)
        };
        self.base.entries = snapshot;
        result.map(|_| ())
    }

    pub fn as_note(&self) -> &Note {
        &self.base
    }

    pub fn as_note_mut(&mut self) -> &mut Note {
        &mut self.base
    }

    pub fn own_entries(&self) -> &[Entry] {
        &self.overview_entries
    }

    pub fn displayed_entries(&self) -> &[Entry] {
        self.base.displayed_entries()
    }

    pub fn sourced_entry(&self, display_index: usize) -> Option<&SourcedEntry> {
        self.displayed.get(display_index)
    }

    pub fn is_unsaved(&self) -> bool {
        self.base.is_unsaved()
    }

    /// Validated date bounds: earliest bucketed day through today.
    pub fn valid_dates(&self) -> (Date, Date) {
        (self.earliest, self.current)
    }

    /// Bounds of the selected window as `(earlier, later)`.
    pub fn current_date_range(&self) -> (Date, Date) {
        (self.selected.earlier_date(), self.selected.later_date())
    }

    pub fn is_current_date_range_earliest(&self) -> bool {
        self.selected.earlier_date() <= self.earliest
    }

    pub fn is_current_date_range_latest(&self) -> bool {
        self.selected.later_date() >= self.current
    }

    /// Rebuild the aggregation from scratch: merge the aggregator's own
    /// stream with every source note's entries, regroup, bucket by day.
    pub fn update_entries(&mut self, sources: &[(String, Vec<Entry>)]) {
        let mut merged: Vec<(&Entry, &str)> = Vec::new();
        for (source_id, entries) in sources {
            merged.extend(entries.iter().map(|e| (e, source_id.as_str())));
        }
        merged.extend(self.overview_entries.iter().map(|e| (e, OVERVIEW_ID)));

        // Stable: ties keep source registration order.
        merged.sort_by_key(|(entry, _)| entry.created);

        self.aggregated.clear();
        let mut display_group: u16 = 0;
        let mut previous: Option<(&str, u16)> = None;
        for (entry, source_id) in merged {
            let is_new_group = match previous {
                None => true,
                Some((prev_source, prev_group)) => {
                    prev_source != source_id || prev_group != entry.group_id
                }
            };
            if is_new_group {
                display_group = display_group.wrapping_add(1);
            }
            previous = Some((source_id, entry.group_id));

            let mut clone = entry.clone();
            clone.group_id = display_group;
            let day = util::day_of(entry.created, self.tz);
            self.aggregated.entry(day).or_default().push(SourcedEntry {
                entry: clone,
                source_note_id: source_id.to_string(),
                original_id: entry.id,
            });
        }

        // Keep the prior earliest when no entries exist at all.
        if let Some(first_day) = self.aggregated.keys().next() {
            self.earliest = *first_day;
        }

        self.update_entries_shown();
    }

    /// Project the buckets inside the selected window, chronological order.
    pub fn update_entries_shown(&mut self) {
        let (from, to) = (self.selected.earlier_date(), self.selected.later_date());
        self.displayed = self
            .aggregated
            .range(from..=to)
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect();
        self.base.entries = self.displayed.iter().map(|s| s.entry.clone()).collect();
    }

    /// Move the selected window to a new start (and optional end). Rejected
    /// when the window falls entirely outside the valid bounds.
    pub fn update_selected_date(&mut self, start: Date, end: Option<Date>) -> bool {
        let range_days = match end {
            Some(end) => (end - start).whole_days() + 1,
            None => 1,
        };
        let candidate = DateRange { start, range_days };
        if candidate.earlier_date() > self.current || candidate.later_date() < self.earliest {
            return false;
        }
        self.selected = candidate;
        self.update_entries_shown();
        true
    }

    /// Shift the window one span later, clamped to the valid bounds.
    /// Returns whether the window now sits at the latest bound.
    pub fn step_forward(&mut self) -> bool {
        self.selected = self.clamp(self.selected.shifted(self.selected.span()));
        self.update_entries_shown();
        self.is_current_date_range_latest()
    }

    /// Shift one span earlier; returns whether the earliest bound is reached.
    pub fn step_backward(&mut self) -> bool {
        self.selected = self.clamp(self.selected.shifted(-self.selected.span()));
        self.update_entries_shown();
        self.is_current_date_range_earliest()
    }

    fn clamp(&self, candidate: DateRange) -> DateRange {
        let mut clamped = candidate;
        let overshoot = (clamped.later_date() - self.current).whole_days();
        if overshoot > 0 {
            clamped = clamped.shifted(-overshoot);
        }
        let undershoot = (self.earliest - clamped.earlier_date()).whole_days();
        if undershoot > 0 {
            clamped = clamped.shifted(undershoot);
        }
        clamped
    }

    /// Append an authored entry to the aggregator's own stream. On top of the
    /// plain time-gap rule, a new group starts whenever the previous displayed
    /// entry came from a different source note.
    pub fn create_new_entry(
        &mut self,
        text: &str,
        now: OffsetDateTime,
        indent_level: u8,
        group_interval: Duration,
        quoted_id: Option<u16>,
    ) -> Entry {
        let now = util::to_ms_precision(now);
        let group_id = match self.displayed.last() {
            None => 0,
            Some(prev) => {
                let gap = now - prev.entry.created > group_interval;
                let source_changed = prev.source_note_id != OVERVIEW_ID;
                if gap || source_changed {
                    prev.entry.group_id.saturating_add(1)
                } else {
                    prev.entry.group_id
                }
            }
        };
        let entry = Entry::new(
            self.overview_entries.len() as u16,
            group_id,
            text,
            now,
            indent_level,
        )
        .with_quote(quoted_id);
        self.overview_entries.push(entry.clone());
        self.base.entries_dirty = true;
        entry
    }

    pub fn modify_own_entry(&mut self, id: u16, new_text: &str, edited: OffsetDateTime) -> bool {
        match crate::entry::modify_text(&mut self.overview_entries, id, new_text, edited) {
            Some(changed) => {
                if changed {
                    self.base.entries_dirty = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn delete_own_entry(&mut self, id: u16) -> bool {
        if crate::entry::delete_and_renumber(&mut self.overview_entries, id) {
            self.base.entries_dirty = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn at(ms: u64) -> OffsetDateTime {
        util::from_epoch_ms(ms).unwrap()
    }

    fn day_ms(date: Date) -> u64 {
        let midnight = date.midnight().assume_utc();
        util::epoch_ms(midnight)
    }

    fn overview_at(today: Date) -> Overview {
        Overview::new(at(day_ms(today)), UtcOffset::UTC)
    }

    fn entry(id: u16, group: u16, created_ms: u64) -> Entry {
        Entry::new(id, group, format!("e{id}"), at(created_ms), 0)
    }

    #[test]
    fn interleaved_sources_force_separate_display_groups() {
        // A, B, A at identical timestamps: three distinct display groups.
        let mut overview = overview_at(date!(2024 - 01 - 05));
        let sources = vec![
            ("alpha".to_string(), vec![entry(0, 0, 1_000), entry(1, 0, 3_000)]),
            ("beta".to_string(), vec![entry(0, 0, 2_000)]),
        ];
        overview.update_entries(&sources);
        overview.update_selected_date(date!(1970 - 01 - 01), None);

        let groups: Vec<u16> = overview
            .displayed_entries()
            .iter()
            .map(|e| e.group_id)
            .collect();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], 1);
        assert_ne!(groups[0], groups[1]);
        assert_ne!(groups[1], groups[2]);
    }

    #[test]
    fn same_source_same_group_collapses() {
        let mut overview = overview_at(date!(2024 - 01 - 05));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 4, 1_000), entry(1, 4, 2_000), entry(2, 4, 3_000)],
        )];
        overview.update_entries(&sources);
        overview.update_selected_date(date!(1970 - 01 - 01), None);

        let groups: Vec<u16> = overview
            .displayed_entries()
            .iter()
            .map(|e| e.group_id)
            .collect();
        assert_eq!(groups, vec![1, 1, 1]);
    }

    #[test]
    fn source_group_change_splits_even_within_one_source() {
        let mut overview = overview_at(date!(2024 - 01 - 05));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 4, 1_000), entry(1, 5, 2_000)],
        )];
        overview.update_entries(&sources);
        overview.update_selected_date(date!(1970 - 01 - 01), None);

        let groups: Vec<u16> = overview
            .displayed_entries()
            .iter()
            .map(|e| e.group_id)
            .collect();
        assert_eq!(groups, vec![1, 2]);
    }

    #[test]
    fn entries_bucket_by_calendar_day_and_set_earliest() {
        let jan1 = date!(2024 - 01 - 01);
        let jan3 = date!(2024 - 01 - 03);
        let mut overview = overview_at(date!(2024 - 01 - 10));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 0, day_ms(jan3) + 500), entry(1, 1, day_ms(jan1) + 500)],
        )];
        overview.update_entries(&sources);

        assert_eq!(overview.valid_dates(), (jan1, date!(2024 - 01 - 10)));

        assert!(overview.update_selected_date(jan1, None));
        assert_eq!(overview.displayed_entries().len(), 1);
        assert_eq!(overview.displayed_entries()[0].text, "e1");

        assert!(overview.update_selected_date(jan1, Some(jan3)));
        assert_eq!(overview.displayed_entries().len(), 2);
        // Chronological: the jan1 entry first.
        assert_eq!(overview.displayed_entries()[0].text, "e1");
        assert_eq!(overview.displayed_entries()[1].text, "e0");
    }

    #[test]
    fn empty_aggregation_keeps_prior_earliest() {
        let today = date!(2024 - 01 - 10);
        let mut overview = overview_at(today);
        overview.update_entries(&[]);
        assert_eq!(overview.valid_dates(), (today, today));
    }

    #[test]
    fn step_forward_clamps_at_latest_bound() {
        // validDates = [2024-01-01, 2024-01-10], 1-day window at the end.
        let mut overview = overview_at(date!(2024 - 01 - 10));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 0, day_ms(date!(2024 - 01 - 01)) + 500)],
        )];
        overview.update_entries(&sources);
        assert!(overview.update_selected_date(date!(2024 - 01 - 10), None));

        assert!(overview.step_forward());
        let (from, to) = overview.current_date_range();
        assert_eq!(from, date!(2024 - 01 - 10));
        assert_eq!(to, date!(2024 - 01 - 10));
        assert!(overview.is_current_date_range_latest());
    }

    #[test]
    fn step_backward_clamps_at_earliest_bound() {
        let mut overview = overview_at(date!(2024 - 01 - 10));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 0, day_ms(date!(2024 - 01 - 08)) + 500)],
        )];
        overview.update_entries(&sources);
        assert!(overview.update_selected_date(date!(2024 - 01 - 09), None));

        assert!(!overview.is_current_date_range_earliest());
        assert!(overview.step_backward());
        assert_eq!(overview.current_date_range().0, date!(2024 - 01 - 08));
        // Another step cannot leave the bounds.
        assert!(overview.step_backward());
        assert_eq!(overview.current_date_range().0, date!(2024 - 01 - 08));
    }

    #[test]
    fn window_stepping_moves_by_full_span() {
        let mut overview = overview_at(date!(2024 - 01 - 10));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 0, day_ms(date!(2024 - 01 - 01)) + 500)],
        )];
        overview.update_entries(&sources);
        assert!(overview.update_selected_date(date!(2024 - 01 - 05), Some(date!(2024 - 01 - 07))));

        overview.step_backward();
        let (from, to) = overview.current_date_range();
        assert_eq!(from, date!(2024 - 01 - 02));
        assert_eq!(to, date!(2024 - 01 - 04));
    }

    #[test]
    fn authored_entry_starts_new_group_after_foreign_source() {
        let mut overview = overview_at(date!(2024 - 01 - 05));
        let sources = vec![("alpha".to_string(), vec![entry(0, 0, 1_000)])];
        overview.update_entries(&sources);
        overview.update_selected_date(date!(1970 - 01 - 01), None);

        // Previous displayed entry is from "alpha": source change forces a
        // new group even with no time gap.
        let authored = overview.create_new_entry("mine", at(1_000), 0, Duration::minutes(5), None);
        assert_eq!(authored.group_id, 2);
        assert_eq!(authored.id, 0);
        assert!(overview.is_unsaved());

        // A second authored entry right after stays in the authored group.
        let merged = vec![("alpha".to_string(), vec![entry(0, 0, 1_000)])];
        overview.update_entries(&merged);
        overview.update_selected_date(date!(1970 - 01 - 01), None);
        let second = overview.create_new_entry("mine 2", at(2_000), 0, Duration::minutes(5), None);
        assert_eq!(second.id, 1);
        assert_eq!(second.group_id, overview.displayed.last().unwrap().entry.group_id);
    }

    #[test]
    fn rejects_fully_out_of_range_window() {
        let mut overview = overview_at(date!(2024 - 01 - 10));
        let sources = vec![(
            "alpha".to_string(),
            vec![entry(0, 0, day_ms(date!(2024 - 01 - 05)) + 500)],
        )];
        overview.update_entries(&sources);

        assert!(!overview.update_selected_date(date!(2024 - 02 - 01), None));
        assert!(!overview.update_selected_date(date!(2023 - 12 - 01), Some(date!(2023 - 12 - 05))));
        assert!(overview.update_selected_date(date!(2024 - 01 - 05), None));
    }
}
