//! Spanish month names.

use crate::utils::strip_accents;

const MONTHS: [(&str, u32); 13] = [
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("setiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

/// Month number (1-12) for a Spanish month name, ignoring case, accents
/// and surrounding whitespace.
pub fn month_number(name: &str) -> Option<u32> {
    let key = strip_accents(name.trim()).to_lowercase();
    MONTHS
        .iter()
        .find(|(month, _)| *month == key)
        .map(|(_, number)| *number)
}
