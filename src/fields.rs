// 🔢 Field Parsers - locale-aware date and amount parsing
// Pure functions: text in, canonical value out

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RowErrorKind;

// ============================================================================
// DIRECTION
// ============================================================================

/// Money flow of a transaction, captured separately from the amount magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    /// Non-positive raw values are debits, zero included
    pub fn from_signed(raw: f64) -> Self {
        if raw > 0.0 {
            Direction::Credit
        } else {
            Direction::Debit
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Ok(Direction::Credit),
            "debit" => Ok(Direction::Debit),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

// ============================================================================
// DATE PARSING
// ============================================================================

/// Day/month/year is tried first, then the fallbacks in this order
pub const PRIMARY_DATE_FORMAT: &str = "%d/%m/%Y";
pub const FALLBACK_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

/// Years must be written with four digits; `%Y` alone would read "24" as 0024
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

/// Parse a statement date. First format that matches wins.
pub fn parse_date(raw: &str) -> Result<NaiveDate, RowErrorKind> {
    let s = raw.trim();

    std::iter::once(PRIMARY_DATE_FORMAT)
        .chain(FALLBACK_DATE_FORMATS)
        .find_map(|fmt| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .filter(|date| YEAR_RANGE.contains(&date.year()))
        })
        .ok_or_else(|| RowErrorKind::InvalidDate(s.to_string()))
}

// ============================================================================
// AMOUNT PARSING
// ============================================================================

/// Currency tokens stripped before parsing. Longer tokens come first so
/// "R$" is not left behind as "R".
pub const CURRENCY_SYMBOLS: [&str; 5] = ["US$", "R$", "$", "€", "£"];

/// Separator conventions of a statement export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountFormat {
    pub grouping: char,
    pub decimal: char,
}

impl AmountFormat {
    /// "1.234,56" - Nubank and most Brazilian exports
    pub fn brazilian() -> Self {
        AmountFormat {
            grouping: '.',
            decimal: ',',
        }
    }

    /// "1,234.56"
    pub fn international() -> Self {
        AmountFormat {
            grouping: ',',
            decimal: '.',
        }
    }
}

impl Default for AmountFormat {
    fn default() -> Self {
        AmountFormat::brazilian()
    }
}

impl FromStr for AmountFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brazilian" | "br" | "pt-br" => Ok(AmountFormat::brazilian()),
            "international" | "intl" | "en" => Ok(AmountFormat::international()),
            other => Err(format!("unknown amount format '{}'", other)),
        }
    }
}

/// Parsed amount: magnitude plus direction. The signed value never leaves
/// this module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedAmount {
    pub amount: f64,
    pub direction: Direction,
}

/// Parse a statement amount.
///
/// Transform order: strip currency symbols, drop grouping separators,
/// convert the decimal separator to '.', drop whitespace, parse.
pub fn parse_amount(raw: &str, format: AmountFormat) -> Result<ParsedAmount, RowErrorKind> {
    let mut s = raw.to_string();
    for symbol in CURRENCY_SYMBOLS {
        s = s.replace(symbol, "");
    }

    let s: String = s
        .chars()
        .filter(|c| *c != format.grouping)
        .map(|c| if c == format.decimal { '.' } else { c })
        .filter(|c| !c.is_whitespace())
        .collect();

    let signed = s
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowErrorKind::InvalidAmount(raw.trim().to_string()))?;

    Ok(ParsedAmount {
        amount: signed.abs(),
        direction: Direction::from_signed(signed),
    })
}
