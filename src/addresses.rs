//! Address source loading.
//!
//! The source is a row-oriented CSV with one column identifying the address
//! per record. Duplicates are collapsed to a unique set before enqueueing,
//! preserving first-seen order so runs are reproducible.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use crate::models::Address;

#[derive(Debug, Error)]
pub enum AddressSourceError {
    #[error("address column {0:?} not found in source file")]
    MissingColumn(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Read the unique addresses from `column` of a CSV file.
pub fn read_unique_addresses(
    path: &Path,
    column: &str,
) -> Result<Vec<Address>, AddressSourceError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?;
    let index = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| AddressSourceError::MissingColumn(column.to_string()))?;

    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(field) = record.get(index) else {
            continue;
        };
        if field.trim().is_empty() {
            continue;
        }
        let address = Address::new(field);
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn collapses_duplicates_preserving_order() {
        let file = write_source(
            "account,amount\n0xAAA,1\n0xbbb,2\n0xaaa,3\n0xCCC,4\n0xBBB,5\n",
        );
        let addresses = read_unique_addresses(file.path(), "account").unwrap();
        assert_eq!(
            addresses,
            vec![
                Address::new("0xaaa"),
                Address::new("0xbbb"),
                Address::new("0xccc"),
            ]
        );
    }

    #[test]
    fn missing_column_is_an_error() {
        let file = write_source("wallet,amount\n0xaaa,1\n");
        let err = read_unique_addresses(file.path(), "account").unwrap_err();
        assert!(matches!(err, AddressSourceError::MissingColumn(_)));
    }

    #[test]
    fn skips_blank_fields() {
        let file = write_source("account\n0xaaa\n\n0xbbb\n");
        let addresses = read_unique_addresses(file.path(), "account").unwrap();
        assert_eq!(addresses.len(), 2);
    }
}
