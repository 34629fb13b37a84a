// 📐 Schema Detector - maps header text to semantic column roles
// One detection per file; the mapping drives every row of that file

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

// ============================================================================
// ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Date,
    Amount,
    Description,
    Identifier,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Date, Role::Amount, Role::Description, Role::Identifier];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Date => "date",
            Role::Amount => "amount",
            Role::Description => "description",
            Role::Identifier => "identifier",
        }
    }

    /// Accepted header spellings, already lowercased
    pub fn vocabulary(&self) -> &'static [&'static str] {
        match self {
            Role::Date => &["data", "date"],
            Role::Amount => &["valor", "amount"],
            Role::Description => &["descrição", "descricao", "description"],
            Role::Identifier => &["identificador", "identifier"],
        }
    }

    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Role::Identifier)
    }
}

// ============================================================================
// SCHEMA MAPPING
// ============================================================================

/// Column position for each role. Mandatory roles are always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub date: usize,
    pub amount: usize,
    pub description: usize,
    pub identifier: Option<usize>,
}

impl SchemaMapping {
    /// Minimum row length for the mandatory cells to be addressable
    pub fn required_columns(&self) -> usize {
        self.date.max(self.amount).max(self.description) + 1
    }
}

fn normalize_header(cell: &str) -> String {
    cell.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Detect column roles from a header row.
///
/// Each role is matched independently; the first column whose normalized
/// text is in the role's vocabulary wins. A later column that would also
/// match is ignored, even if it looks like a better fit.
pub fn detect_schema<S: AsRef<str>>(headers: &[S]) -> Result<SchemaMapping, IngestError> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();

    let find = |role: Role| {
        normalized
            .iter()
            .position(|h| role.vocabulary().contains(&h.as_str()))
    };

    let date = find(Role::Date);
    let amount = find(Role::Amount);
    let description = find(Role::Description);
    let identifier = find(Role::Identifier);

    match (date, amount, description) {
        (Some(date), Some(amount), Some(description)) => Ok(SchemaMapping {
            date,
            amount,
            description,
            identifier,
        }),
        _ => {
            let missing = Role::ALL
                .into_iter()
                .filter(|r| r.is_mandatory() && find(*r).is_none())
                .collect();
            Err(IngestError::SchemaIncomplete { missing })
        }
    }
}

// ============================================================================
// DELIMITER SNIFFING
// ============================================================================

pub const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Pick the delimiter used by the header line: the most frequent candidate
/// outside double quotes. Ties go to the earlier candidate; no candidate
/// at all means ','.
pub fn sniff_delimiter(data: &[u8]) -> u8 {
    let header_line = data
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();

    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for byte in header_line {
        if *byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| d == byte) {
            counts[i] += 1;
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}
