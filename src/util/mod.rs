use anyhow::{Context, Result};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use unicode_normalization::UnicodeNormalization;

const SLUG_MAX_LENGTH: usize = 60;

pub const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Derive a filesystem-safe identifier from a title: lowercased, diacritics
/// stripped via NFD, non-alphanumeric runs collapsed to single hyphens,
/// capped at 60 chars on a hyphen boundary.
pub fn slugify(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .trim()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let slug = normalized
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.len() <= SLUG_MAX_LENGTH {
        return slug;
    }

    match slug[..=SLUG_MAX_LENGTH.min(slug.len() - 1)].rfind('-') {
        Some(cutoff) if cutoff > 0 => slug[..cutoff].to_string(),
        _ => slug[..SLUG_MAX_LENGTH].to_string(),
    }
}

pub fn format_date(date: Date) -> String {
    date.format(&DATE_FORMAT).unwrap_or_default()
}

pub fn parse_date(raw: &str) -> Result<Date> {
    Date::parse(raw, &DATE_FORMAT).with_context(|| format!("parsing date {raw:?}"))
}

pub fn add_days_to_date_string(raw: &str, days: i64) -> Result<String> {
    let date = parse_date(raw)?;
    let shifted = date
        .checked_add(Duration::days(days))
        .with_context(|| format!("shifting {raw} by {days} days"))?;
    Ok(format_date(shifted))
}

/// Calendar day of `at` in the given offset. Used for Overview bucketing.
pub fn day_of(at: OffsetDateTime, offset: UtcOffset) -> Date {
    at.to_offset(offset).date()
}

/// Local offset when resolvable, UTC otherwise.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Milliseconds since the unix epoch, clamped at zero for pre-epoch instants
/// (the wire format has no sign bit).
pub fn epoch_ms(at: OffsetDateTime) -> u64 {
    let ms = at.unix_timestamp_nanos() / 1_000_000;
    ms.max(0) as u64
}

pub fn from_epoch_ms(ms: u64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()
}

/// Truncate to the millisecond precision the wire format can carry.
pub fn to_ms_precision(at: OffsetDateTime) -> OffsetDateTime {
    from_epoch_ms(epoch_ms(at)).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Number of leading `indent` repetitions on a line, capped below 31 to stay
/// inside the entry header's indent range.
pub fn count_leading_indents(line: &str, indent: &str) -> u8 {
    if indent.is_empty() {
        return 0;
    }
    let mut rest = line;
    let mut depth: u8 = 0;
    while depth < 30 {
        match rest.strip_prefix(indent) {
            Some(tail) => {
                rest = tail;
                depth += 1;
            }
            None => break,
        }
    }
    depth
}

/// `HH:MM YYYY-MM-DD`, the display stamp used for entry timestamps.
pub fn format_date_time(at: OffsetDateTime, offset: UtcOffset) -> String {
    let local = at.to_offset(offset);
    format!(
        "{:02}:{:02} {}",
        local.hour(),
        local.minute(),
        format_date(local.date())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn slugify_collapses_and_lowercases() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --Spaced   out--  "), "spaced-out");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn slugify_strips_diacritics() {
        assert_eq!(slugify("Café Déjà Vu"), "cafe-deja-vu");
        assert_eq!(slugify("Über Größe"), "uber-gro-e");
    }

    #[test]
    fn slugify_cuts_long_titles_at_hyphen_boundary() {
        let long = "word ".repeat(20); // 100 chars of slug material
        let slug = slugify(&long);
        assert!(slug.len() <= 60);
        assert!(!slug.ends_with('-'));
        assert!(slug.split('-').all(|part| part == "word"));
    }

    #[test]
    fn date_string_arithmetic() {
        assert_eq!(add_days_to_date_string("2024-01-10", 1).unwrap(), "2024-01-11");
        assert_eq!(add_days_to_date_string("2024-03-01", -1).unwrap(), "2024-02-29");
        assert_eq!(format_date(date!(2024 - 01 - 05)), "2024-01-05");
    }

    #[test]
    fn epoch_round_trip_at_ms_precision() {
        let at = from_epoch_ms(1_700_000_123_456).unwrap();
        assert_eq!(epoch_ms(at), 1_700_000_123_456);
        assert_eq!(to_ms_precision(at), at);
    }

    #[test]
    fn counts_leading_indents() {
        assert_eq!(count_leading_indents("\t\tchild", "\t"), 2);
        assert_eq!(count_leading_indents("root", "\t"), 0);
        assert_eq!(count_leading_indents("    two", "  "), 2);
        assert_eq!(count_leading_indents("anything", ""), 0);
    }
}
