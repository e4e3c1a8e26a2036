// 🚦 Referential Validator - the gate in front of every census mutation
//
// Every roster entry must resolve its sector (by normalized name) and its bed
// (by normalized code inside that sector). If anything is unresolved the
// outcome is `Invalid` with the full list of gaps, and no `ValidatedRoster`
// exists to hand to the planner.
//
// `ValidatedRoster` has private fields: this module is the only place that
// can build one.

use crate::entities::{Bed, Sector};
use crate::error::{CensusError, CensusResult};
use crate::normalize::normalize_name;
use crate::roster::RosterEntry;
use crate::store::CensusSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// CENSUS INDEX
// ============================================================================

/// Name lookups over the current census
#[derive(Debug, Default)]
pub struct CensusIndex {
    sectors: HashMap<String, Sector>,
    /// (sector_id, normalized bed code) -> bed
    beds: HashMap<(String, String), Bed>,
}

impl CensusIndex {
    pub fn build(sectors: &[Sector], beds: &[Bed]) -> Self {
        let mut index = CensusIndex::default();

        for sector in sectors {
            index
                .sectors
                .entry(sector.match_key())
                .or_insert_with(|| sector.clone());
        }
        for bed in beds {
            index
                .beds
                .entry((bed.sector_id.clone(), bed.match_key()))
                .or_insert_with(|| bed.clone());
        }

        index
    }

    pub fn from_snapshot(snapshot: &CensusSnapshot) -> Self {
        Self::build(&snapshot.sectors, &snapshot.beds)
    }

    pub fn sector(&self, name: &str) -> Option<&Sector> {
        self.sectors.get(&normalize_name(name))
    }

    pub fn bed(&self, sector_id: &str, code: &str) -> Option<&Bed> {
        self.beds
            .get(&(sector_id.to_string(), normalize_name(code)))
    }
}

// ============================================================================
// VALIDATION REPORT
// ============================================================================

/// Everything the roster references that the census lacks
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub missing_sectors: BTreeSet<String>,
    /// Sector name -> bed codes not found in it (also used for codes declared
    /// under a sector that is itself missing)
    pub missing_beds_by_sector: BTreeMap<String, BTreeSet<String>>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.missing_sectors.is_empty() && self.missing_beds_by_sector.is_empty()
    }

    pub fn missing_bed_count(&self) -> usize {
        self.missing_beds_by_sector.values().map(|codes| codes.len()).sum()
    }

    fn add_missing_bed(&mut self, sector_name: &str, bed_code: &str) {
        self.missing_beds_by_sector
            .entry(sector_name.to_string())
            .or_default()
            .insert(bed_code.to_string());
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sectors: Vec<&str> = self.missing_sectors.iter().map(String::as_str).collect();
        write!(f, "missing sectors [{}]", sectors.join(", "))?;

        for (sector, codes) in &self.missing_beds_by_sector {
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            write!(f, "; missing beds in {}: [{}]", sector, codes.join(", "))?;
        }
        Ok(())
    }
}

// ============================================================================
// VALIDATED ROSTER
// ============================================================================

/// A roster entry with its sector and bed resolved to census ids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntry {
    pub entry: RosterEntry,
    pub sector_id: String,
    pub bed_id: String,
}

/// Proof that every entry resolved. Only `validate` constructs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRoster {
    entries: Vec<ResolvedEntry>,
}

impl ValidatedRoster {
    pub fn entries(&self) -> &[ResolvedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(ValidatedRoster),
    Invalid(ValidationReport),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    /// Empty report for a valid outcome
    pub fn report(&self) -> ValidationReport {
        match self {
            ValidationOutcome::Valid(_) => ValidationReport::default(),
            ValidationOutcome::Invalid(report) => report.clone(),
        }
    }

    pub fn into_result(self) -> CensusResult<ValidatedRoster> {
        match self {
            ValidationOutcome::Valid(roster) => Ok(roster),
            ValidationOutcome::Invalid(report) => Err(CensusError::ReferentialGap(report)),
        }
    }
}

// ============================================================================
// VALIDATE
// ============================================================================

/// Referential check of a normalized roster against the census.
///
/// Every entry must name a known sector (by normalized name) and a bed of
/// that sector (by normalized code). On success the entries come back
/// resolved to sector and bed ids inside a `ValidatedRoster`, the only input
/// the planner accepts. Otherwise the report lists every unknown sector and,
/// per sector name, every unknown bed code; codes under an unknown sector
/// are listed under that sector too.
///
/// Read-only; running it twice on the same inputs gives the same outcome.
pub fn validate(entries: &[RosterEntry], index: &CensusIndex) -> ValidationOutcome {
    let mut report = ValidationReport::default();
    let mut resolved = Vec::with_capacity(entries.len());

    for entry in entries {
        let sector_key = normalize_name(&entry.sector_name);
        let bed_key = normalize_name(&entry.bed_code);

        let Some(sector) = index.sector(&entry.sector_name) else {
            report.missing_sectors.insert(sector_key.clone());
            report.add_missing_bed(&sector_key, &bed_key);
            continue;
        };

        match index.bed(&sector.id, &entry.bed_code) {
            Some(bed) => resolved.push(ResolvedEntry {
                entry: entry.clone(),
                sector_id: sector.id.clone(),
                bed_id: bed.id.clone(),
            }),
            None => report.add_missing_bed(&sector_key, &bed_key),
        }
    }

    if report.is_empty() {
        ValidationOutcome::Valid(ValidatedRoster { entries: resolved })
    } else {
        tracing::info!(
            missing_sectors = report.missing_sectors.len(),
            missing_beds = report.missing_bed_count(),
            "roster validation failed"
        );
        ValidationOutcome::Invalid(report)
    }
}
