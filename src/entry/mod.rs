use time::{Duration, OffsetDateTime};

use crate::util;

pub mod codec;

/// One stored log line/paragraph unit. `id` is the dense position index within
/// its owning note; `group_id` clusters consecutive entries into a single
/// timestamped block when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u16,
    pub group_id: u16,
    pub text: String,
    pub created: OffsetDateTime,
    pub last_edited: Option<OffsetDateTime>,
    pub indent_level: u8,
    pub is_pinned: bool,
    pub quoted_id: Option<u16>,
}

impl Entry {
    pub fn new(
        id: u16,
        group_id: u16,
        text: impl Into<String>,
        created: OffsetDateTime,
        indent_level: u8,
    ) -> Self {
        Self {
            id,
            group_id,
            text: text.into(),
            created: util::to_ms_precision(created),
            last_edited: None,
            indent_level,
            is_pinned: false,
            quoted_id: None,
        }
    }

    pub fn with_quote(mut self, quoted_id: Option<u16>) -> Self {
        self.quoted_id = quoted_id;
        self
    }
}

/// Group id for an entry appended after `previous`: the group carries over
/// unless the gap since the previous entry's creation exceeds `interval`.
pub(crate) fn next_group_id(
    previous: Option<&Entry>,
    now: OffsetDateTime,
    interval: Duration,
) -> u16 {
    match previous {
        Some(prev) if now - prev.created > interval => prev.group_id.saturating_add(1),
        Some(prev) => prev.group_id,
        None => 0,
    }
}

/// Update an entry's text in place. Returns `None` when no entry carries `id`,
/// `Some(false)` when the text was identical (no-op, `last_edited` untouched).
pub(crate) fn modify_text(
    entries: &mut [Entry],
    id: u16,
    new_text: &str,
    edited: OffsetDateTime,
) -> Option<bool> {
    let entry = entries.iter_mut().find(|e| e.id == id)?;
    if entry.text == new_text {
        return Some(false);
    }
    entry.text = new_text.to_string();
    entry.last_edited = Some(util::to_ms_precision(edited));
    Some(true)
}

/// Remove the entry carrying `id` and renumber the survivors densely.
/// Quote references above the removed id shift down with the renumbering;
/// references to the removed entry itself are cleared.
pub(crate) fn delete_and_renumber(entries: &mut Vec<Entry>, id: u16) -> bool {
    let Some(position) = entries.iter().position(|e| e.id == id) else {
        return false;
    };
    entries.remove(position);
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.id = index as u16;
        entry.quoted_id = match entry.quoted_id {
            Some(q) if q == id => None,
            Some(q) if q > id => Some(q - 1),
            other => other,
        };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> OffsetDateTime {
        util::from_epoch_ms(ms).unwrap()
    }

    #[test]
    fn group_carries_over_within_interval() {
        let first = Entry::new(0, 3, "a", at(0), 0);
        let two_minutes = at(2 * 60 * 1000);
        assert_eq!(next_group_id(Some(&first), two_minutes, Duration::minutes(5)), 3);
    }

    #[test]
    fn group_increments_past_interval() {
        let first = Entry::new(0, 3, "a", at(0), 0);
        let ten_minutes = at(10 * 60 * 1000);
        assert_eq!(next_group_id(Some(&first), ten_minutes, Duration::minutes(5)), 4);
        assert_eq!(next_group_id(None, ten_minutes, Duration::minutes(5)), 0);
    }

    #[test]
    fn modify_is_noop_on_identical_text() {
        let mut entries = vec![Entry::new(0, 0, "same", at(0), 0)];
        assert_eq!(modify_text(&mut entries, 0, "same", at(1000)), Some(false));
        assert_eq!(entries[0].last_edited, None);

        assert_eq!(modify_text(&mut entries, 0, "changed", at(1000)), Some(true));
        assert_eq!(entries[0].last_edited, Some(at(1000)));
        assert_eq!(modify_text(&mut entries, 9, "ghost", at(0)), None);
    }

    #[test]
    fn delete_renumbers_and_fixes_quotes() {
        let mut entries = vec![
            Entry::new(0, 0, "zero", at(0), 0),
            Entry::new(1, 0, "one", at(1), 0).with_quote(Some(0)),
            Entry::new(2, 0, "two", at(2), 0).with_quote(Some(1)),
            Entry::new(3, 0, "three", at(3), 0).with_quote(Some(3)),
        ];

        assert!(delete_and_renumber(&mut entries, 1));
        let ids: Vec<u16> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        // Quote of the removed entry is cleared, later quotes shift down.
        assert_eq!(entries[1].quoted_id, None);
        assert_eq!(entries[2].quoted_id, Some(2));
        // Quote below the removed id is untouched.
        assert_eq!(entries[0].quoted_id, None);

        assert!(!delete_and_renumber(&mut entries, 42));
    }
}
