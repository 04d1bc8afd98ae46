//! Loading a property library snapshot from CSV.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::domain::{ExistingProperty, PropertyId};

#[derive(Debug)]
pub enum LibraryLoadError {
    Io(std::io::Error),
    Csv(csv::Error),
    MissingField { row: usize, field: &'static str },
}

impl std::fmt::Display for LibraryLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryLoadError::Io(err) => write!(f, "failed to read property library: {}", err),
            LibraryLoadError::Csv(err) => write!(f, "invalid property library CSV: {}", err),
            LibraryLoadError::MissingField { row, field } => {
                write!(f, "property library row {} has no {}", row, field)
            }
        }
    }
}

impl std::error::Error for LibraryLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryLoadError::Io(err) => Some(err),
            LibraryLoadError::Csv(err) => Some(err),
            LibraryLoadError::MissingField { .. } => None,
        }
    }
}

impl From<std::io::Error> for LibraryLoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for LibraryLoadError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

#[derive(Debug, Deserialize)]
struct LibraryRow {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    address: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    city: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    municipality: Option<String>,
    #[serde(default, deserialize_with = "empty_price_as_none")]
    sale_price: Option<u64>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn empty_price_as_none<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(raw) = empty_string_as_none(deserializer)? else {
        return Ok(None);
    };
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits
        .parse::<u64>()
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("invalid sale price `{raw}`")))
}

/// Parse `id,address,city,municipality,sale_price` rows. Header names are
/// matched exactly; the optional columns may be absent.
pub fn parse_library<R: Read>(reader: R) -> Result<Vec<ExistingProperty>, LibraryLoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut properties = Vec::new();
    for (offset, row) in csv_reader.deserialize::<LibraryRow>().enumerate() {
        let row = row?;
        let line = offset + 2;
        let id = row.id.ok_or(LibraryLoadError::MissingField {
            row: line,
            field: "id",
        })?;
        let address = row.address.ok_or(LibraryLoadError::MissingField {
            row: line,
            field: "address",
        })?;
        properties.push(ExistingProperty {
            id: PropertyId(id),
            address,
            city: row.city,
            municipality: row.municipality,
            sale_price: row.sale_price,
        });
    }

    Ok(properties)
}

pub fn load_library<P: AsRef<Path>>(path: P) -> Result<Vec<ExistingProperty>, LibraryLoadError> {
    let file = std::fs::File::open(path)?;
    parse_library(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_optional_columns() {
        let csv = "\
id,address,city,municipality,sale_price
p1, 12 Maple Street ,Springfield,,\"$450,000\"
p2,3 Elm Ave,,Laval,
";

        let library = parse_library(csv.as_bytes()).expect("valid library");

        assert_eq!(library.len(), 2);
        assert_eq!(library[0].address, "12 Maple Street");
        assert_eq!(library[0].sale_price, Some(450_000));
        assert_eq!(library[0].municipality, None);
        assert_eq!(library[1].municipality.as_deref(), Some("Laval"));
        assert_eq!(library[1].sale_price, None);
    }

    #[test]
    fn missing_address_names_the_row() {
        let csv = "id,address\np1,1 Oak St\np2,\n";

        match parse_library(csv.as_bytes()) {
            Err(LibraryLoadError::MissingField { row: 3, field }) => assert_eq!(field, "address"),
            other => panic!("expected missing address, got {other:?}"),
        }
    }
}
