// 📋 Roster Normalizer
//
// The roster arrives as tabular records (one per patient believed to be
// admitted). This module only turns those records into `RosterEntry`
// values: names normalized, dates parsed tolerantly, malformed rows dropped.
//
// Dropped silently (debug log only):
// - rows without a patient name or without a bed code
// - rows repeating a normalized name already seen (first one wins)

use crate::entities::Sex;
use crate::normalize::{normalize_name, parse_date, parse_datetime};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One raw record, every field as text exactly as the source had it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    #[serde(default, alias = "nome", alias = "patient")]
    pub name: String,

    #[serde(default, alias = "nascimento", alias = "birthDate")]
    pub birth_date: String,

    #[serde(default, alias = "sexo")]
    pub sex: String,

    #[serde(default, alias = "admissao", alias = "admissionDateTime")]
    pub admitted_at: String,

    #[serde(default, alias = "setor", alias = "sectorName")]
    pub sector: String,

    #[serde(default, alias = "leito", alias = "bedCode")]
    pub bed: String,

    #[serde(default, alias = "especialidade")]
    pub specialty: String,
}

impl RosterRow {
    /// Minimal row, the rest left blank
    pub fn new(name: &str, sector: &str, bed: &str) -> Self {
        RosterRow {
            name: name.to_string(),
            sector: sector.to_string(),
            bed: bed.to_string(),
            ..Default::default()
        }
    }

    /// Builder pattern: add birth date text
    pub fn with_birth_date(mut self, raw: &str) -> Self {
        self.birth_date = raw.to_string();
        self
    }

    pub fn with_sex(mut self, raw: &str) -> Self {
        self.sex = raw.to_string();
        self
    }

    pub fn with_admitted_at(mut self, raw: &str) -> Self {
        self.admitted_at = raw.to_string();
        self
    }

    pub fn with_specialty(mut self, raw: &str) -> Self {
        self.specialty = raw.to_string();
        self
    }
}

/// A roster record after normalization. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub normalized_name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub sector_name: String,
    pub bed_code: String,
    pub specialty: Option<String>,
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl RosterEntry {
    /// None when the row lacks a name or a bed code
    pub fn from_row(row: &RosterRow) -> Option<RosterEntry> {
        let name = non_empty(&row.name)?;
        let bed_code = non_empty(&row.bed)?;

        Some(RosterEntry {
            normalized_name: normalize_name(&name),
            name,
            birth_date: parse_date(&row.birth_date),
            sex: Sex::parse(&row.sex),
            admitted_at: parse_datetime(&row.admitted_at),
            sector_name: row.sector.trim().to_string(),
            bed_code,
            specialty: non_empty(&row.specialty),
        })
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

pub fn normalize_rows(rows: &[RosterRow]) -> Vec<RosterEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let Some(entry) = RosterEntry::from_row(row) else {
            tracing::debug!(row = index + 1, "dropping roster row without name or bed code");
            continue;
        };

        if !seen.insert(entry.normalized_name.clone()) {
            tracing::debug!(
                row = index + 1,
                name = %entry.normalized_name,
                "dropping repeated roster name"
            );
            continue;
        }

        entries.push(entry);
    }

    entries
}

// ============================================================================
// CSV READER
// ============================================================================

/// Read roster rows from any CSV source with a header line
pub fn read_roster_rows<R: Read>(reader: R) -> Result<Vec<RosterRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<RosterRow>().enumerate() {
        let row = record.with_context(|| format!("Failed to read roster line {}", index + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Read and normalize a roster CSV file
pub fn load_roster_csv(file_path: &Path) -> Result<Vec<RosterEntry>> {
    let file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open roster {}", file_path.display()))?;
    let rows = read_roster_rows(file)?;
    let entries = normalize_rows(&rows);

    tracing::info!(
        file = %file_path.display(),
        rows = rows.len(),
        entries = entries.len(),
        "roster loaded"
    );
    Ok(entries)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_row_to_entry_normalizes_fields() {
        let row = RosterRow::new("  Maria  Sílva ", " UTI ", " U01 ")
            .with_birth_date("14/07/1961")
            .with_sex("F")
            .with_admitted_at("2025-03-01 08:30")
            .with_specialty("Clínica Médica");

        let entry = RosterEntry::from_row(&row).unwrap();
        assert_eq!(entry.name, "Maria  Sílva");
        assert_eq!(entry.normalized_name, "MARIA SILVA");
        assert_eq!(entry.sector_name, "UTI");
        assert_eq!(entry.bed_code, "U01");
        assert_eq!(entry.birth_date, NaiveDate::from_ymd_opt(1961, 7, 14));
        assert_eq!(entry.sex, Some(Sex::Female));
        assert!(entry.admitted_at.is_some());
        assert_eq!(entry.specialty.as_deref(), Some("Clínica Médica"));
    }

    #[test]
    fn test_unparseable_values_become_none() {
        let row = RosterRow::new("Ana", "UTI", "U02")
            .with_birth_date("not a date")
            .with_sex("?")
            .with_admitted_at("soon");

        let entry = RosterEntry::from_row(&row).unwrap();
        assert_eq!(entry.birth_date, None);
        assert_eq!(entry.sex, None);
        assert_eq!(entry.admitted_at, None);
        assert_eq!(entry.specialty, None);
    }

    #[test]
    fn test_malformed_and_repeated_rows_dropped() {
        let rows = vec![
            RosterRow::new("Ana", "UTI", "U01"),
            RosterRow::new("", "UTI", "U02"),
            RosterRow::new("Bruno", "UTI", "  "),
            RosterRow::new("ANA", "Enfermaria", "301A"),
            RosterRow::new("Carla", "Enfermaria", "302A"),
        ];

        let entries = normalize_rows(&rows);
        let names: Vec<_> = entries.iter().map(|e| e.normalized_name.as_str()).collect();
        assert_eq!(names, vec!["ANA", "CARLA"]);
        assert_eq!(entries[0].bed_code, "U01");
    }

    #[test]
    fn test_read_roster_rows_with_aliases() {
        let data = "nome,nascimento,sexo,admissao,setor,leito,especialidade\n\
                    João Souza,01/02/1950,M,2025-03-01,UTI,U03,Cardio\n\
                    ,,,,UTI,U04,\n";

        let rows = read_roster_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "João Souza");
        assert_eq!(rows[0].bed, "U03");

        let entries = normalize_rows(&rows);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].normalized_name, "JOAO SOUZA");
    }

    #[test]
    fn test_load_roster_csv_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,birth_date,sex,admitted_at,sector,bed,specialty").unwrap();
        writeln!(file, "Maria Silva,1961-07-14,F,,UTI,U01,").unwrap();
        writeln!(file, "Pedro Lima,,M,,Enfermaria 3,301A,Ortopedia").unwrap();

        let entries = load_roster_csv(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sector_name, "Enfermaria 3");
        assert_eq!(entries[1].specialty.as_deref(), Some("Ortopedia"));

        assert!(load_roster_csv(Path::new("/nonexistent/roster.csv")).is_err());
        println!("✅ Roster CSV loaded");
    }
}
