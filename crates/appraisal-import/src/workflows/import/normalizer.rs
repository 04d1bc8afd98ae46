//! Address canonicalisation shared by duplicate lookups and library stores.

const SUFFIXES: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("boul", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("chemin", "ch"),
];

/// Canonical form used for exact address equality.
///
/// Invisible characters and punctuation are dropped, whitespace is collapsed,
/// case is folded and common street suffixes are abbreviated.
pub fn normalize_address(value: &str) -> String {
    let cleaned: String = value
        .replace(['\u{feff}', '\u{200b}'], "")
        .chars()
        .map(|ch| match ch {
            '.' | ',' | '#' | ';' => ' ',
            other => other,
        })
        .collect();

    cleaned
        .split_whitespace()
        .map(|token| {
            let lowered = token.to_lowercase();
            SUFFIXES
                .iter()
                .find(|(long, _)| *long == lowered)
                .map(|(_, short)| (*short).to_string())
                .unwrap_or(lowered)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
