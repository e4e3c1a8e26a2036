// 🛠️ Bed Operations - manual actions from the bed map
//
// Each operation loads what it needs, runs the bed state machine, and
// commits one WriteBatch. Nothing is written when a transition is refused.

use crate::audit::{record_or_warn, AuditEntry, AuditSink};
use crate::bed_state::{apply, reconcile_occupancy, BedEvent, BedStatus, RegulationState};
use crate::clock::Clock;
use crate::entities::{Bed, IsolationStatus, Patient, Sex};
use crate::error::{CensusError, CensusResult};
use crate::normalize::normalize_name;
use crate::store::{CensusSnapshot, CensusStore, WriteBatch};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

// ============================================================================
// CONTEXT
// ============================================================================

/// Who is acting, when, and where it gets reported
pub struct OperationContext<'a> {
    pub clock: &'a dyn Clock,
    pub audit: &'a dyn AuditSink,
    pub actor: &'a str,
}

impl OperationContext<'_> {
    fn report(&self, action: &str, entity_type: &str, entity_id: &str, summary: String) {
        let entry = AuditEntry::new(action, entity_type, entity_id, summary)
            .at(self.clock.now())
            .by(self.actor);
        record_or_warn(self.audit, &entry);
    }
}

/// Manual admission form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPatient {
    pub name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub admitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub specialty: Option<String>,
}

impl NewPatient {
    pub fn named(name: &str) -> Self {
        NewPatient {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn load_bed<S: CensusStore + ?Sized>(store: &S, bed_id: &str) -> CensusResult<Bed> {
    store
        .bed(bed_id)?
        .ok_or_else(|| CensusError::not_found("bed", bed_id))
}

fn load_patient<S: CensusStore + ?Sized>(store: &S, patient_id: &str) -> CensusResult<Patient> {
    store
        .patient(patient_id)?
        .ok_or_else(|| CensusError::not_found("patient", patient_id))
}

fn commit<S: CensusStore + ?Sized>(store: &mut S, batch: WriteBatch) -> CensusResult<()> {
    store
        .commit(batch)
        .map_err(|e| CensusError::CommitRejected(format!("{:#}", e)))
}

/// Apply one event to one bed and store it
fn transition<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    bed_id: &str,
    event: BedEvent,
) -> CensusResult<Bed> {
    let bed = load_bed(store, bed_id)?;
    let action = event.name();
    let next = apply(&bed, event, ctx.clock.now())?;

    let mut batch = WriteBatch::new();
    batch.put_bed(next.clone());
    commit(store, batch)?;

    ctx.report(
        action,
        "bed",
        &next.id,
        format!("Bed {}: {} -> {}", next.code, bed.status, next.status),
    );
    Ok(next)
}

fn pending_destination(origin: &Bed, patient_id: &str) -> Option<String> {
    match &origin.regulation {
        RegulationState::OriginPending {
            patient_id: pending,
            destination_bed_id,
            ..
        } if pending == patient_id => Some(destination_bed_id.clone()),
        _ => None,
    }
}

// ============================================================================
// ADMISSION / DISCHARGE
// ============================================================================

pub fn admit_patient<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    new: NewPatient,
    bed_id: &str,
) -> CensusResult<Patient> {
    let snapshot = CensusSnapshot::load(store)?;
    let bed = snapshot
        .bed(bed_id)
        .cloned()
        .ok_or_else(|| CensusError::not_found("bed", bed_id))?;

    let normalized = normalize_name(&new.name);
    if let Some(existing) = snapshot
        .patients
        .iter()
        .find(|p| p.same_person(&normalized, new.birth_date))
    {
        return Err(CensusError::DuplicatePatient {
            patient_id: existing.id.clone(),
            name: existing.name.clone(),
            location: snapshot.location_of(existing),
        });
    }

    let now = ctx.clock.now();
    let occupied = apply(&bed, BedEvent::Occupy, now)?;

    let mut patient = Patient::new(&new.name, &bed.sector_id).in_bed(&bed.id);
    patient.birth_date = new.birth_date;
    patient.sex = new.sex;
    patient.admitted_at = Some(new.admitted_at.unwrap_or(now));
    patient.specialty = new.specialty;

    let mut batch = WriteBatch::new();
    batch.put_patient(patient.clone());
    batch.put_bed(occupied);
    commit(store, batch)?;

    ctx.report(
        "admission",
        "patient",
        &patient.id,
        format!("{} admitted to bed {}", patient.name, bed.code),
    );
    Ok(patient)
}

/// Deletes the patient; the bed goes to Cleaning. A pending regulation is
/// dropped and its destination bed freed.
pub fn discharge_patient<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
) -> CensusResult<()> {
    let patient = load_patient(store, patient_id)?;
    let now = ctx.clock.now();

    let mut batch = WriteBatch::new();
    batch.delete_patient(&patient.id);

    let mut freed = None;
    if let Some(bed_id) = patient.bed_id.as_deref() {
        let bed = load_bed(store, bed_id)?;
        let released = match bed.status {
            BedStatus::RegulationOrigin => {
                if let Some(destination_id) = pending_destination(&bed, &patient.id) {
                    let destination = load_bed(store, &destination_id)?;
                    batch.put_bed(apply(&destination, BedEvent::CancelRegulation, now)?);
                }
                reconcile_occupancy(&bed, false, now)
            }
            _ => apply(&bed, BedEvent::Release, now)?,
        };
        freed = Some(released.code.clone());
        batch.put_bed(released);
    }

    commit(store, batch)?;

    ctx.report(
        "discharge",
        "patient",
        &patient.id,
        match freed {
            Some(code) => format!("{} discharged from bed {}", patient.name, code),
            None => format!("{} discharged", patient.name),
        },
    );
    Ok(())
}

// ============================================================================
// CLEANING / BLOCKING
// ============================================================================

pub fn finish_cleaning<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    bed_id: &str,
) -> CensusResult<Bed> {
    transition(store, ctx, bed_id, BedEvent::FinishCleaning)
}

/// Only meaningful while the bed waits for cleaning; no history entry
pub fn set_cleaning_priority<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    bed_id: &str,
    priority: bool,
) -> CensusResult<Bed> {
    let mut bed = load_bed(store, bed_id)?;
    if bed.status != BedStatus::Cleaning {
        return Err(CensusError::InvalidTransition {
            bed_code: bed.code.clone(),
            from: bed.status.to_string(),
            event: "set-cleaning-priority".to_string(),
        });
    }

    bed.cleaning_priority = priority;
    let mut batch = WriteBatch::new();
    batch.put_bed(bed.clone());
    commit(store, batch)?;

    ctx.report(
        "cleaning-priority",
        "bed",
        &bed.id,
        format!("Bed {} cleaning priority {}", bed.code, if priority { "on" } else { "off" }),
    );
    Ok(bed)
}

pub fn block_bed<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    bed_id: &str,
    reason: &str,
) -> CensusResult<Bed> {
    transition(
        store,
        ctx,
        bed_id,
        BedEvent::Block {
            reason: reason.to_string(),
        },
    )
}

pub fn unblock_bed<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    bed_id: &str,
) -> CensusResult<Bed> {
    transition(store, ctx, bed_id, BedEvent::Unblock)
}

// ============================================================================
// REGULATION (bed-to-bed move)
// ============================================================================

pub fn begin_regulation<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
    destination_bed_id: &str,
) -> CensusResult<()> {
    let patient = load_patient(store, patient_id)?;
    let origin_id = patient
        .bed_id
        .clone()
        .ok_or_else(|| CensusError::not_found("bed of patient", patient_id))?;
    let origin = load_bed(store, &origin_id)?;
    let destination = load_bed(store, destination_bed_id)?;
    if origin.id == destination.id {
        return Err(CensusError::InvalidTransition {
            bed_code: destination.code,
            from: origin.status.to_string(),
            event: "begin-regulation-destination".to_string(),
        });
    }

    let now = ctx.clock.now();
    let origin_next = apply(
        &origin,
        BedEvent::BeginRegulationOrigin {
            patient_id: patient.id.clone(),
            destination_bed_id: destination.id.clone(),
        },
        now,
    )?;
    let destination_next = apply(
        &destination,
        BedEvent::BeginRegulationDestination {
            patient_id: patient.id.clone(),
            origin_bed_id: origin.id.clone(),
        },
        now,
    )?;

    let mut batch = WriteBatch::new();
    batch.put_bed(origin_next);
    batch.put_bed(destination_next);
    commit(store, batch)?;

    ctx.report(
        "regulation-begin",
        "patient",
        &patient.id,
        format!("{}: {} -> {} requested", patient.name, origin.code, destination.code),
    );
    Ok(())
}

/// (patient, origin bed, destination bed) of a pending regulation
fn pending_regulation<S: CensusStore + ?Sized>(
    store: &S,
    patient_id: &str,
) -> CensusResult<(Patient, Bed, Bed)> {
    let patient = load_patient(store, patient_id)?;
    let origin_id = patient
        .bed_id
        .clone()
        .ok_or_else(|| CensusError::not_found("bed of patient", patient_id))?;
    let origin = load_bed(store, &origin_id)?;

    let destination_id =
        pending_destination(&origin, &patient.id).ok_or_else(|| CensusError::InvalidTransition {
            bed_code: origin.code.clone(),
            from: origin.status.to_string(),
            event: "complete-regulation".to_string(),
        })?;
    let destination = load_bed(store, &destination_id)?;
    Ok((patient, origin, destination))
}

/// Patient moves; origin goes to Cleaning, destination to Occupied
pub fn complete_regulation<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
) -> CensusResult<Patient> {
    let (mut patient, origin, destination) = pending_regulation(store, patient_id)?;
    let now = ctx.clock.now();

    let origin_next = apply(&origin, BedEvent::CompleteRegulation, now)?;
    let destination_next = apply(&destination, BedEvent::CompleteRegulation, now)?;
    patient.bed_id = Some(destination.id.clone());
    patient.sector_id = destination.sector_id.clone();

    let mut batch = WriteBatch::new();
    batch.put_patient(patient.clone());
    batch.put_bed(origin_next);
    batch.put_bed(destination_next);
    commit(store, batch)?;

    ctx.report(
        "regulation-complete",
        "patient",
        &patient.id,
        format!("{} moved {} -> {}", patient.name, origin.code, destination.code),
    );
    Ok(patient)
}

pub fn cancel_regulation<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
) -> CensusResult<()> {
    let (patient, origin, destination) = pending_regulation(store, patient_id)?;
    let now = ctx.clock.now();

    let mut batch = WriteBatch::new();
    batch.put_bed(apply(&origin, BedEvent::CancelRegulation, now)?);
    batch.put_bed(apply(&destination, BedEvent::CancelRegulation, now)?);
    commit(store, batch)?;

    ctx.report(
        "regulation-cancel",
        "patient",
        &patient.id,
        format!("{}: move to {} cancelled", patient.name, destination.code),
    );
    Ok(())
}

// ============================================================================
// ISOLATION
// ============================================================================

pub fn record_isolation<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
    infection_code: &str,
    status: IsolationStatus,
) -> CensusResult<Patient> {
    let mut patient = load_patient(store, patient_id)?;
    patient.set_isolation(infection_code, status, ctx.clock.now());

    let mut batch = WriteBatch::new();
    batch.put_patient(patient.clone());
    commit(store, batch)?;

    ctx.report(
        "isolation",
        "patient",
        &patient.id,
        format!("{}: isolation {} {:?}", patient.name, normalize_name(infection_code), status),
    );
    Ok(patient)
}

/// Returns false (and writes nothing) when the code was not active
pub fn clear_isolation<S: CensusStore + ?Sized>(
    store: &mut S,
    ctx: &OperationContext,
    patient_id: &str,
    infection_code: &str,
) -> CensusResult<bool> {
    let mut patient = load_patient(store, patient_id)?;
    if !patient.clear_isolation(infection_code) {
        return Ok(false);
    }

    let mut batch = WriteBatch::new();
    batch.put_patient(patient.clone());
    commit(store, batch)?;

    ctx.report(
        "isolation-cleared",
        "patient",
        &patient.id,
        format!("{}: isolation {} cleared", patient.name, normalize_name(infection_code)),
    );
    Ok(true)
}

// ============================================================================
// TESTS
// ============================================================================
