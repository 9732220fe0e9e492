//! Helpers for dates as printed in the register.
//!
//! Birth dates are compared verbatim (after trimming), never parsed into a
//! calendar date: the printed string is the matching key. Years can appear
//! in full (`1763`, `12.11.1763`) or abbreviated to two digits (`-63`,
//! `12.11.-63`).

/// A year read from a printed date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Year {
    Full(u16),
    Abbreviated(u8),
}

impl Year {
    /// The last two digits of the year.
    pub fn short(&self) -> u8 {
        match self {
            Year::Full(y) => (y % 100) as u8,
            Year::Abbreviated(y) => *y,
        }
    }
}

/// Trims a printed date and drops inner whitespace so that `09.10. 1726` and
/// `09.10.1726` compare equal. Returns `None` for blank input.
pub fn normalize_date(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        None
    } else {
        Some(compact)
    }
}

/// True when both dates are present and identical as printed.
pub fn same_date(a: &str, b: &str) -> bool {
    match (normalize_date(a), normalize_date(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// True when `text` contains `date` verbatim, ignoring whitespace on both
/// sides the way `same_date` does.
pub fn text_contains_date(text: &str, date: &str) -> bool {
    let Some(needle) = normalize_date(date) else {
        return false;
    };
    let haystack: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    haystack.contains(needle.as_str())
}

/// Extracts the year of a printed date.
///
/// A trailing four-digit run is a full year. A trailing two-digit run is an
/// abbreviated year when it stands alone, follows a dash, or completes a
/// `day.month.year` triple; a bare `day.month` yields `None`.
pub fn year_of(raw: &str) -> Option<Year> {
    let runs: Vec<&str> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect();
    let last = *runs.last()?;
    match last.len() {
        4 => last.parse().ok().map(Year::Full),
        2 if runs.len() == 1 || runs.len() == 3 || raw.contains('-') => {
            last.parse().ok().map(Year::Abbreviated)
        }
        _ => None,
    }
}

/// Compares two marriage dates by year. Two full years must be equal; when
/// either side is abbreviated only the last two digits are compared.
pub fn years_agree(a: &str, b: &str) -> bool {
    match (year_of(a), year_of(b)) {
        (Some(Year::Full(x)), Some(Year::Full(y))) => x == y,
        (Some(x), Some(y)) => x.short() == y.short(),
        _ => false,
    }
}
