// ⚖️ Reconciliation Planner - three-way diff between roster and census
//
// Given a ValidatedRoster (every sector/bed resolved) and the current
// patients, classify every record exactly once:
//
//   census patient  + roster entry, same bed      -> unchanged
//   census patient  + roster entry, other bed     -> transfer
//   census patient, no roster entry claiming it   -> discharge
//   roster entry, no census patient to claim      -> admission
//
// Matching is by normalized name only. A roster entry claims one census
// patient of the same name, preferring the one already lying in the entry's
// bed; same-name patients nobody claims are discharged.
//
// The planner is pure: it reads nothing and writes nothing. A plan can only
// be built here, so the executor never sees an unvalidated roster.

use crate::entities::Patient;
use crate::roster::RosterEntry;
use crate::validation::{ResolvedEntry, ValidatedRoster};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ============================================================================
// PLAN TYPES
// ============================================================================

/// A census patient the roster places in another bed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    /// Patient as currently stored
    pub patient: Patient,
    /// Bed the patient leaves (None for a patient without a bed)
    pub from_bed_id: Option<String>,
    pub new_bed_id: String,
    pub new_sector_id: String,
    /// Roster line that claimed the patient
    pub entry: RosterEntry,
}

/// A census patient the roster keeps in the same bed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unchanged {
    pub patient: Patient,
    pub entry: RosterEntry,
}

/// Per-category totals shown to the operator before execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub discharges: usize,
    pub transfers: usize,
    pub admissions: usize,
    pub unchanged: usize,
}

impl PlanCounts {
    /// Records that will cause a write
    pub fn changes(&self) -> usize {
        self.discharges + self.transfers + self.admissions
    }
}

/// Reviewable set of changes. Built only by `plan`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    discharges: Vec<Patient>,
    transfers: Vec<Transfer>,
    admissions: Vec<ResolvedEntry>,
    unchanged: Vec<Unchanged>,
    counts: PlanCounts,
    fingerprint: String,
}

impl ReconciliationPlan {
    /// Census patients no roster entry claimed, in census order
    pub fn discharges(&self) -> &[Patient] {
        &self.discharges
    }

    /// Claimed patients whose roster bed differs from the stored one
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Roster entries with no census patient to claim, in roster order
    pub fn admissions(&self) -> &[ResolvedEntry] {
        &self.admissions
    }

    pub fn unchanged(&self) -> &[Unchanged] {
        &self.unchanged
    }

    pub fn counts(&self) -> PlanCounts {
        self.counts
    }

    /// SHA-256 over the plan contents, hex encoded.
    ///
    /// Only the decisions feed the hash (who is discharged, moved, admitted
    /// or left in place, and to which bed), sorted, so two plans with the same
    /// effect on the census share a fingerprint whatever the roster row order.
    /// A client echoes it back to `reconcile_confirmed` to prove it reviewed
    /// the plan that is about to run.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// True when executing would write nothing
    pub fn is_noop(&self) -> bool {
        self.counts.changes() == 0
    }

    /// One-line summary for the review prompt and the audit log
    pub fn summary(&self) -> String {
        format!(
            "{} admissions, {} transfers, {} discharges, {} unchanged",
            self.counts.admissions,
            self.counts.transfers,
            self.counts.discharges,
            self.counts.unchanged
        )
    }
}

// ============================================================================
// PLANNER
// ============================================================================

/// Build the reconciliation plan for a validated roster.
///
/// # Arguments
/// * `roster` - output of `validation::validate`; every entry already carries
///   its resolved sector and bed ids
/// * `patients` - the whole current census
///
/// # Returns
/// A plan in which every census patient and every roster entry appears in
/// exactly one category. Nothing is read from or written to a store.
///
/// # Matching
/// * by normalized name only (accents, case and spacing ignored)
/// * a roster entry claims at most one census patient; among namesakes the
///   one already in the entry's bed wins, otherwise the first in census order
/// * namesakes left unclaimed are discharged
pub fn plan(roster: &ValidatedRoster, patients: &[Patient]) -> ReconciliationPlan {
    // name -> census patients in stable order; claimed ones are taken out
    let mut by_name: HashMap<&str, Vec<&Patient>> = HashMap::new();
    for patient in patients {
        by_name
            .entry(patient.normalized_name.as_str())
            .or_default()
            .push(patient);
    }

    let mut transfers = Vec::new();
    let mut admissions = Vec::new();
    let mut unchanged = Vec::new();

    for resolved in roster.entries() {
        let candidates = by_name
            .get_mut(resolved.entry.normalized_name.as_str())
            .filter(|candidates| !candidates.is_empty());

        let Some(candidates) = candidates else {
            admissions.push(resolved.clone());
            continue;
        };

        let position = candidates
            .iter()
            .position(|p| p.bed_id.as_deref() == Some(resolved.bed_id.as_str()))
            .unwrap_or(0);
        let patient = candidates.remove(position);

        if patient.bed_id.as_deref() == Some(resolved.bed_id.as_str()) {
            unchanged.push(Unchanged {
                patient: patient.clone(),
                entry: resolved.entry.clone(),
            });
        } else {
            transfers.push(Transfer {
                patient: patient.clone(),
                from_bed_id: patient.bed_id.clone(),
                new_bed_id: resolved.bed_id.clone(),
                new_sector_id: resolved.sector_id.clone(),
                entry: resolved.entry.clone(),
            });
        }
    }

    // Whatever nobody claimed, in census order
    let discharges: Vec<Patient> = patients
        .iter()
        .filter(|p| {
            by_name
                .get(p.normalized_name.as_str())
                .is_some_and(|left| left.iter().any(|l| l.id == p.id))
        })
        .cloned()
        .collect();

    let counts = PlanCounts {
        discharges: discharges.len(),
        transfers: transfers.len(),
        admissions: admissions.len(),
        unchanged: unchanged.len(),
    };

    let fingerprint = fingerprint(&discharges, &transfers, &admissions, &unchanged);

    let plan = ReconciliationPlan {
        discharges,
        transfers,
        admissions,
        unchanged,
        counts,
        fingerprint,
    };

    tracing::debug!(summary = %plan.summary(), fingerprint = %plan.fingerprint, "plan computed");
    plan
}

/// Order-independent digest of what the plan will do
fn fingerprint(
    discharges: &[Patient],
    transfers: &[Transfer],
    admissions: &[ResolvedEntry],
    unchanged: &[Unchanged],
) -> String {
    let mut lines: Vec<String> = Vec::new();

    for p in discharges {
        lines.push(format!("D|{}|{}", p.id, p.bed_id.as_deref().unwrap_or("")));
    }
    for t in transfers {
        lines.push(format!(
            "T|{}|{}|{}|{}",
            t.patient.id,
            t.from_bed_id.as_deref().unwrap_or(""),
            t.new_bed_id,
            t.new_sector_id
        ));
    }
    for a in admissions {
        lines.push(format!(
            "A|{}|{}|{}",
            a.entry.normalized_name, a.bed_id, a.sector_id
        ));
    }
    for u in unchanged {
        lines.push(format!(
            "U|{}|{}",
            u.patient.id,
            u.patient.bed_id.as_deref().unwrap_or("")
        ));
    }
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Bed, Sector, SectorType};
    use crate::roster::{normalize_rows, RosterRow};
    use crate::validation::{validate, CensusIndex};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    struct Census {
        sectors: Vec<Sector>,
        beds: Vec<Bed>,
    }

    impl Census {
        fn new() -> Self {
            let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
            let icu = Sector::new("UTI", SectorType::Icu);
            let ward = Sector::new("Enfermaria", SectorType::Ward);
            let mut beds = Vec::new();
            for code in ["U01", "U02"] {
                beds.push(Bed::provision(code, &icu.id, at));
            }
            for code in ["B2", "C1", "C2"] {
                beds.push(Bed::provision(code, &ward.id, at));
            }
            Census {
                sectors: vec![icu, ward],
                beds,
            }
        }

        fn bed(&self, code: &str) -> &Bed {
            self.beds.iter().find(|b| b.code == code).unwrap()
        }

        fn patient(&self, name: &str, code: &str) -> Patient {
            let bed = self.bed(code);
            Patient::new(name, &bed.sector_id).in_bed(&bed.id)
        }

        fn roster(&self, rows: &[(&str, &str, &str)]) -> ValidatedRoster {
            let rows: Vec<RosterRow> = rows
                .iter()
                .map(|(name, sector, bed)| RosterRow::new(name, sector, bed))
                .collect();
            let index = CensusIndex::build(&self.sectors, &self.beds);
            validate(&normalize_rows(&rows), &index).into_result().unwrap()
        }
    }

    #[test]
    fn test_scenario_admission() {
        let census = Census::new();
        let roster = census.roster(&[("Maria Silva", "UTI", "U01")]);

        let plan = plan(&roster, &[]);
        assert_eq!(plan.counts().admissions, 1);
        assert_eq!(plan.admissions()[0].bed_id, census.bed("U01").id);
        assert!(plan.discharges().is_empty());
    }

    #[test]
    fn test_scenario_discharge() {
        let census = Census::new();
        let john = census.patient("John Doe", "B2");
        let roster = census.roster(&[]);

        let plan = plan(&roster, &[john.clone()]);
        assert_eq!(plan.discharges(), &[john]);
        assert_eq!(plan.counts().changes(), 1);
    }

    #[test]
    fn test_scenario_transfer() {
        let census = Census::new();
        let ana = census.patient("Ana", "C1");
        let roster = census.roster(&[("ANA", "Enfermaria", "C2")]);

        let plan = plan(&roster, &[ana.clone()]);
        assert_eq!(plan.transfers().len(), 1);
        let transfer = &plan.transfers()[0];
        assert_eq!(transfer.patient.id, ana.id);
        assert_eq!(transfer.from_bed_id.as_deref(), Some(census.bed("C1").id.as_str()));
        assert_eq!(transfer.new_bed_id, census.bed("C2").id);
    }

    #[test]
    fn test_same_bed_is_unchanged_and_noop() {
        let census = Census::new();
        let ana = census.patient("Ana", "C1");
        let roster = census.roster(&[("ana", "enfermaria", "c1")]);

        let plan = plan(&roster, &[ana]);
        assert_eq!(plan.counts().unchanged, 1);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_partition_covers_every_record_once() {
        let census = Census::new();
        let patients = vec![
            census.patient("Ana", "C1"),
            census.patient("John Doe", "B2"),
            census.patient("Rita", "U02"),
        ];
        let roster = census.roster(&[
            ("Ana", "Enfermaria", "C2"),
            ("Rita", "UTI", "U02"),
            ("Maria Silva", "UTI", "U01"),
        ]);

        let plan = plan(&roster, &patients);

        let mut census_side: Vec<&str> = plan.discharges().iter().map(|p| p.id.as_str()).collect();
        census_side.extend(plan.transfers().iter().map(|t| t.patient.id.as_str()));
        census_side.extend(plan.unchanged().iter().map(|u| u.patient.id.as_str()));
        let unique: HashSet<&str> = census_side.iter().copied().collect();
        assert_eq!(census_side.len(), patients.len());
        assert_eq!(unique.len(), patients.len());

        let roster_side =
            plan.counts().transfers + plan.counts().unchanged + plan.counts().admissions;
        assert_eq!(roster_side, roster.len());
        assert_eq!(
            plan.counts(),
            PlanCounts {
                discharges: 1,
                transfers: 1,
                admissions: 1,
                unchanged: 1
            }
        );
    }

    #[test]
    fn test_duplicate_census_names_prefer_patient_in_roster_bed() {
        let census = Census::new();
        let first = census.patient("Ana", "C1");
        let second = census.patient("Ana", "C2");
        let roster = census.roster(&[("Ana", "Enfermaria", "C2")]);

        let plan = plan(&roster, &[first.clone(), second.clone()]);
        assert_eq!(plan.unchanged()[0].patient.id, second.id);
        assert_eq!(plan.discharges(), &[first]);
        assert!(plan.transfers().is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_plan_contents() {
        let census = Census::new();
        let ana = census.patient("Ana", "C1");
        let to_c2 = census.roster(&[("Ana", "Enfermaria", "C2")]);
        let to_u01 = census.roster(&[("Ana", "UTI", "U01")]);

        let a = plan(&to_c2, &[ana.clone()]);
        let b = plan(&to_c2, &[ana.clone()]);
        let c = plan(&to_u01, &[ana]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
