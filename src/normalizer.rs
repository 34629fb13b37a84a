// 🧹 Row Normalizer - one raw CSV row → one canonical transaction
// Every step can short-circuit into a row error; the batch keeps going

use crate::db::CanonicalTransaction;
use crate::error::{RowError, RowErrorKind};
use crate::fields::{parse_amount, parse_date, AmountFormat};
use crate::schema::SchemaMapping;

/// Category used when the identifier column is absent or blank
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Per-file normalization context: who owns the rows, where they came
/// from and how the columns are laid out
#[derive(Debug, Clone)]
pub struct RowNormalizer<'a> {
    mapping: SchemaMapping,
    owner_id: &'a str,
    source: &'a str,
    amount_format: AmountFormat,
}

impl<'a> RowNormalizer<'a> {
    pub fn new(
        mapping: SchemaMapping,
        owner_id: &'a str,
        source: &'a str,
        amount_format: AmountFormat,
    ) -> Self {
        RowNormalizer {
            mapping,
            owner_id,
            source,
            amount_format,
        }
    }

    /// Normalize one data row. `row_number` is 1-based and excludes the header.
    pub fn normalize<S: AsRef<str>>(
        &self,
        row: &[S],
        row_number: usize,
    ) -> Result<CanonicalTransaction, RowError> {
        let fail = |kind| RowError::new(row_number, kind);

        let expected = self.mapping.required_columns();
        if row.len() < expected {
            return Err(fail(RowErrorKind::RowTooShort {
                expected,
                found: row.len(),
            }));
        }

        let occurred_on = parse_date(row[self.mapping.date].as_ref()).map_err(fail)?;

        // Blank descriptions pass through as ""
        let description = row[self.mapping.description].as_ref().trim().to_string();

        let parsed = parse_amount(row[self.mapping.amount].as_ref(), self.amount_format)
            .map_err(fail)?;

        let category = self
            .mapping
            .identifier
            .and_then(|i| row.get(i))
            .map(|cell| cell.as_ref().trim())
            .filter(|cell| !cell.is_empty())
            .unwrap_or(UNCATEGORIZED)
            .to_string();

        Ok(CanonicalTransaction {
            owner_id: self.owner_id.to_string(),
            occurred_on,
            description,
            category,
            amount: parsed.amount,
            direction: parsed.direction,
            source: self.source.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Direction;
    use crate::schema::detect_schema;
    use chrono::NaiveDate;

    fn nubank_mapping() -> SchemaMapping {
        detect_schema(&["Data", "Descrição", "Valor", "Identificador"]).unwrap()
    }

    #[test]
    fn test_normalize_nubank_row() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let tx = normalizer
            .normalize(&["15/03/2024", " Grocery Store ", "-150", "50"], 1)
            .unwrap();

        assert_eq!(tx.owner_id, "u1");
        assert_eq!(tx.occurred_on, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(tx.description, "Grocery Store");
        assert_eq!(tx.amount, 150.0);
        assert_eq!(tx.direction, Direction::Debit);
        assert_eq!(tx.category, "50");
        assert_eq!(tx.source, "nubank");
    }

    #[test]
    fn test_normalize_credit_with_decimal_comma() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let tx = normalizer
            .normalize(&["01/04/2024", "Salary", "R$ 5.000,25", ""], 1)
            .unwrap();

        assert!((tx.amount - 5000.25).abs() < 1e-9);
        assert_eq!(tx.direction, Direction::Credit);
        assert_eq!(tx.category, UNCATEGORIZED);
    }

    #[test]
    fn test_missing_identifier_cell_is_uncategorized() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let tx = normalizer.normalize(&["01/04/2024", "Coffee", "-7"], 3).unwrap();
        assert_eq!(tx.category, UNCATEGORIZED);
    }

    #[test]
    fn test_empty_description_is_accepted() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let tx = normalizer.normalize(&["01/04/2024", "   ", "-7", "x"], 1).unwrap();
        assert_eq!(tx.description, "");
    }

    #[test]
    fn test_row_too_short() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let err = normalizer.normalize(&["01/04/2024", "Coffee"], 4).unwrap_err();

        assert_eq!(err.row, 4);
        assert_eq!(err.kind, RowErrorKind::RowTooShort { expected: 3, found: 2 });
    }

    #[test]
    fn test_invalid_date_checked_before_amount() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let err = normalizer.normalize(&["not-a-date", "Coffee", "oops", ""], 2).unwrap_err();

        assert_eq!(err.row, 2);
        assert_eq!(err.kind, RowErrorKind::InvalidDate("not-a-date".to_string()));
    }

    #[test]
    fn test_invalid_amount() {
        let normalizer =
            RowNormalizer::new(nubank_mapping(), "u1", "nubank", AmountFormat::brazilian());
        let err = normalizer.normalize(&["01/04/2024", "Coffee", "twelve", ""], 7).unwrap_err();

        assert_eq!(err.to_string(), "Row 7: invalid amount 'twelve'");
    }
}
