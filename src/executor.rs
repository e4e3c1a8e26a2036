// ⚡ Transition Executor - applies a ReconciliationPlan as one atomic batch
//
// All patient deletes/updates/creates and every touched bed's new status go
// into a single WriteBatch. Either the store takes all of it or the census is
// left exactly as it was (CommitRejected, safe to retry).
//
// Touched bed rule, evaluated on the census AFTER the plan:
//   referenced by a patient             -> Occupied
//   not referenced, held/cleaning before -> Cleaning
//   not referenced otherwise            -> Vacant
// Each touched bed gets exactly one new history entry. A touched bed with a
// pending regulation also touches the other bed of that move, so no
// half-finished move survives the run.

use crate::audit::{record_or_warn, AuditEntry, AuditSink};
use crate::bed_state::{reconcile_occupancy, BedStatus};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::entities::{Bed, Patient};
use crate::error::{CensusError, CensusResult};
use crate::reconciliation::{PlanCounts, ReconciliationPlan};
use crate::store::{CensusStore, WriteBatch};
use crate::validation::ResolvedEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Status change of one touched bed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedOutcome {
    pub bed_id: String,
    pub code: String,
    pub from: BedStatus,
    pub to: BedStatus,
}

/// What a successful run wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub executed_at: DateTime<Utc>,
    /// Fingerprint of the plan that was applied
    pub fingerprint: String,
    pub counts: PlanCounts,
    pub beds: Vec<BedOutcome>,
    /// Ids of the patients created by admissions, in plan order
    pub admitted_patient_ids: Vec<String>,
}

impl ExecutionReport {
    /// Line written to the log, the audit sink and the CLI
    pub fn summary(&self) -> String {
        format!(
            "Reconciliation applied: {} admissions, {} transfers, {} discharges, {} unchanged; {} beds updated",
            self.counts.admissions,
            self.counts.transfers,
            self.counts.discharges,
            self.counts.unchanged,
            self.beds.len()
        )
    }
}

/// New census patient for an admission; a roster without an admission time
/// gets the reconciliation time
fn admitted_patient(plan_entry: &ResolvedEntry, now: DateTime<Utc>) -> Patient {
    let entry = &plan_entry.entry;
    let mut patient = Patient::new(&entry.name, &plan_entry.sector_id).in_bed(&plan_entry.bed_id);
    patient.normalized_name = entry.normalized_name.clone();
    patient.birth_date = entry.birth_date;
    patient.sex = entry.sex;
    patient.admitted_at = Some(entry.admitted_at.unwrap_or(now));
    patient.specialty = entry.specialty.clone();
    patient
}

/// Apply a reviewed plan to the store as one atomic batch.
///
/// # Arguments
/// * `store` - census store; receives a single `commit`
/// * `clock` - source of the timestamp shared by every history entry of the run
/// * `config` - `reset_admission_on_transfer`, `audit_actor`
/// * `plan` - built by `reconciliation::plan` against the current census
/// * `audit` - receives one summary entry after a successful commit
///
/// # Returns
/// The report of touched beds and created patients. An empty plan commits
/// nothing and returns an empty report.
///
/// # Errors
/// * `BedConflict` - two patients would share a touched bed; nothing written
/// * `NotFound` - the plan names a bed the store no longer has
/// * `CommitRejected` - the store refused the batch; the census is unchanged
///   and the same plan can be retried
///
/// Audit sink failures are logged and never fail the run.
pub fn execute<S: CensusStore + ?Sized>(
    store: &mut S,
    clock: &dyn Clock,
    config: &EngineConfig,
    plan: &ReconciliationPlan,
    audit: &dyn AuditSink,
) -> CensusResult<ExecutionReport> {
    let now = clock.now();

    let beds: HashMap<String, Bed> = store.beds()?.into_iter().map(|b| (b.id.clone(), b)).collect();
    // Final census, keyed by patient id
    let mut census: BTreeMap<String, Patient> = store
        .patients()?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut touched: BTreeSet<String> = BTreeSet::new();
    let mut batch = WriteBatch::new();

    // ------------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------------
    for patient in plan.discharges() {
        census.remove(&patient.id);
        touched.extend(patient.bed_id.clone());
        batch.delete_patient(&patient.id);
    }

    for transfer in plan.transfers() {
        let mut moved = census
            .get(&transfer.patient.id)
            .cloned()
            .unwrap_or_else(|| transfer.patient.clone());
        moved.bed_id = Some(transfer.new_bed_id.clone());
        moved.sector_id = transfer.new_sector_id.clone();
        if config.reset_admission_on_transfer {
            moved.admitted_at = Some(now);
        }

        touched.extend(transfer.from_bed_id.clone());
        touched.insert(transfer.new_bed_id.clone());
        census.insert(moved.id.clone(), moved.clone());
        batch.put_patient(moved);
    }

    let mut admitted_patient_ids = Vec::new();
    for resolved in plan.admissions() {
        let patient = admitted_patient(resolved, now);
        touched.insert(resolved.bed_id.clone());
        admitted_patient_ids.push(patient.id.clone());
        census.insert(patient.id.clone(), patient.clone());
        batch.put_patient(patient);
    }

    // ------------------------------------------------------------------------
    // Regulation partners
    // ------------------------------------------------------------------------
    let partners: Vec<String> = touched
        .iter()
        .filter_map(|bed_id| beds.get(bed_id))
        .filter_map(|bed| {
            let partner = beds.get(bed.regulation.counterpart_bed_id()?)?;
            (partner.regulation.counterpart_bed_id() == Some(bed.id.as_str()))
                .then(|| partner.id.clone())
        })
        .collect();
    if !partners.is_empty() {
        tracing::debug!(beds = partners.len(), "pending regulations dropped by reconciliation");
    }
    touched.extend(partners);

    // ------------------------------------------------------------------------
    // One patient per bed
    // ------------------------------------------------------------------------
    let mut occupants: HashMap<&str, Vec<&Patient>> = HashMap::new();
    for patient in census.values() {
        if let Some(bed_id) = patient.bed_id.as_deref() {
            occupants.entry(bed_id).or_default().push(patient);
        }
    }

    for bed_id in &touched {
        if let Some(on_bed) = occupants.get(bed_id.as_str()).filter(|p| p.len() > 1) {
            let bed_code = beds
                .get(bed_id)
                .map(|b| b.code.clone())
                .unwrap_or_else(|| bed_id.clone());
            return Err(CensusError::BedConflict {
                bed_code,
                patients: on_bed.iter().map(|p| p.name.clone()).collect(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // Beds
    // ------------------------------------------------------------------------
    let mut outcomes = Vec::with_capacity(touched.len());
    for bed_id in &touched {
        let bed = beds
            .get(bed_id)
            .ok_or_else(|| CensusError::not_found("bed", bed_id))?;
        let occupied = occupants.contains_key(bed_id.as_str());
        let next = reconcile_occupancy(bed, occupied, now);

        outcomes.push(BedOutcome {
            bed_id: bed.id.clone(),
            code: bed.code.clone(),
            from: bed.status,
            to: next.status,
        });
        batch.put_bed(next);
    }

    // ------------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------------
    if !batch.is_empty() {
        let writes = batch.len();
        store.commit(batch).map_err(|e| {
            tracing::warn!(error = %format!("{:#}", e), writes, "reconciliation commit rejected");
            CensusError::CommitRejected(format!("{:#}", e))
        })?;
    }

    let report = ExecutionReport {
        executed_at: now,
        fingerprint: plan.fingerprint().to_string(),
        counts: plan.counts(),
        beds: outcomes,
        admitted_patient_ids,
    };

    tracing::info!(fingerprint = %report.fingerprint, "{}", report.summary());

    let entry = AuditEntry::new("reconciliation", "census", plan.fingerprint(), report.summary())
        .at(now)
        .by(&config.audit_actor)
        .with_data(serde_json::json!({
            "counts": report.counts,
            "beds": report.beds.len(),
        }));
    record_or_warn(audit, &entry);

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
