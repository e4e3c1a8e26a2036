// 🛏️ Bed State Machine
//
// Every status change of a bed goes through `apply` (manual operations) or
// `reconcile_occupancy` (roster reconciliation). Both return the NEXT value
// of the bed and append exactly one history entry; the bed passed in is
// never mutated.
//
//   Vacant ──Occupy──────────────▶ Occupied ──Release──▶ Cleaning
//     ▲ │                            │   ▲                  │
//     │ └─Block──▶ Blocked           │   └─CancelRegulation─┐
//     │   ◀─Unblock─┘                ▼                       │
//     │                       RegulationOrigin ─Complete──▶ Cleaning
//     └──────FinishCleaning──────────────────────────────────┘
//
//   Vacant ──BeginRegulationDestination──▶ RegulationDestination
//          ◀──Cancel──         ──Complete──▶ Occupied

use crate::entities::Bed;
use crate::error::{CensusError, CensusResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BedStatus {
    Vacant,
    Occupied,
    Cleaning,
    Blocked,
    /// Patient still in this bed, move to another bed pending
    RegulationOrigin,
    /// Bed reserved for a patient coming from another bed
    RegulationDestination,
}

impl BedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BedStatus::Vacant => "Vacant",
            BedStatus::Occupied => "Occupied",
            BedStatus::Cleaning => "Cleaning",
            BedStatus::Blocked => "Blocked",
            BedStatus::RegulationOrigin => "RegulationOrigin",
            BedStatus::RegulationDestination => "RegulationDestination",
        }
    }

    pub fn parse(raw: &str) -> Option<BedStatus> {
        match raw {
            "Vacant" => Some(BedStatus::Vacant),
            "Occupied" => Some(BedStatus::Occupied),
            "Cleaning" => Some(BedStatus::Cleaning),
            "Blocked" => Some(BedStatus::Blocked),
            "RegulationOrigin" => Some(BedStatus::RegulationOrigin),
            "RegulationDestination" => Some(BedStatus::RegulationDestination),
            _ => None,
        }
    }

    /// A patient record points at beds in these states
    pub fn holds_patient(&self) -> bool {
        matches!(self, BedStatus::Occupied | BedStatus::RegulationOrigin)
    }

    /// Free beds that cohort restrictions are attached to
    pub fn is_free(&self) -> bool {
        matches!(self, BedStatus::Vacant | BedStatus::Cleaning)
    }
}

impl fmt::Display for BedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a bed's append-only history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: BedStatus,
    pub at: DateTime<Utc>,
}

// ============================================================================
// REGULATION
// ============================================================================

/// Bed-to-bed move in progress. The origin and destination beds each carry
/// the side they play; `None` whenever no move is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind")]
pub enum RegulationState {
    #[default]
    None,
    OriginPending {
        patient_id: String,
        destination_bed_id: String,
        since: DateTime<Utc>,
    },
    DestinationPending {
        patient_id: String,
        origin_bed_id: String,
        since: DateTime<Utc>,
    },
}

impl RegulationState {
    pub fn is_pending(&self) -> bool {
        !matches!(self, RegulationState::None)
    }

    pub fn patient_id(&self) -> Option<&str> {
        match self {
            RegulationState::None => None,
            RegulationState::OriginPending { patient_id, .. }
            | RegulationState::DestinationPending { patient_id, .. } => Some(patient_id),
        }
    }

    /// The other bed of the pending move
    pub fn counterpart_bed_id(&self) -> Option<&str> {
        match self {
            RegulationState::None => None,
            RegulationState::OriginPending {
                destination_bed_id, ..
            } => Some(destination_bed_id),
            RegulationState::DestinationPending { origin_bed_id, .. } => Some(origin_bed_id),
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BedEvent {
    /// Admission, transfer-in or manual check-in
    Occupy,
    /// Discharge / liberation of the patient
    Release,
    FinishCleaning,
    Block { reason: String },
    Unblock,
    BeginRegulationOrigin {
        patient_id: String,
        destination_bed_id: String,
    },
    BeginRegulationDestination {
        patient_id: String,
        origin_bed_id: String,
    },
    CompleteRegulation,
    CancelRegulation,
}

impl BedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BedEvent::Occupy => "occupy",
            BedEvent::Release => "release",
            BedEvent::FinishCleaning => "finish-cleaning",
            BedEvent::Block { .. } => "block",
            BedEvent::Unblock => "unblock",
            BedEvent::BeginRegulationOrigin { .. } => "begin-regulation-origin",
            BedEvent::BeginRegulationDestination { .. } => "begin-regulation-destination",
            BedEvent::CompleteRegulation => "complete-regulation",
            BedEvent::CancelRegulation => "cancel-regulation",
        }
    }
}

/// Transition table. `None` means the event is not allowed from `from`.
pub fn next_status(from: BedStatus, event: &BedEvent) -> Option<BedStatus> {
    use BedStatus::*;

    match (from, event) {
        (Vacant, BedEvent::Occupy) => Some(Occupied),
        (Occupied, BedEvent::Release) => Some(Cleaning),
        (Cleaning, BedEvent::FinishCleaning) => Some(Vacant),
        (Vacant, BedEvent::Block { .. }) => Some(Blocked),
        (Blocked, BedEvent::Unblock) => Some(Vacant),
        (Occupied, BedEvent::BeginRegulationOrigin { .. }) => Some(RegulationOrigin),
        (Vacant, BedEvent::BeginRegulationDestination { .. }) => Some(RegulationDestination),
        (RegulationOrigin, BedEvent::CompleteRegulation) => Some(Cleaning),
        (RegulationDestination, BedEvent::CompleteRegulation) => Some(Occupied),
        (RegulationOrigin, BedEvent::CancelRegulation) => Some(Occupied),
        (RegulationDestination, BedEvent::CancelRegulation) => Some(Vacant),
        _ => None,
    }
}

/// Apply a manual event, returning the next value of the bed
pub fn apply(bed: &Bed, event: BedEvent, at: DateTime<Utc>) -> CensusResult<Bed> {
    if let BedEvent::Block { reason } = &event {
        if reason.trim().is_empty() {
            return Err(CensusError::BlockReasonRequired);
        }
    }

    let status = next_status(bed.status, &event).ok_or_else(|| CensusError::InvalidTransition {
        bed_code: bed.code.clone(),
        from: bed.status.to_string(),
        event: event.name().to_string(),
    })?;

    let mut next = bed.clone();

    match event {
        BedEvent::Block { reason } => next.block_reason = Some(reason.trim().to_string()),
        BedEvent::Unblock => next.block_reason = None,
        BedEvent::FinishCleaning => next.cleaning_priority = false,
        BedEvent::BeginRegulationOrigin {
            patient_id,
            destination_bed_id,
        } => {
            next.regulation = RegulationState::OriginPending {
                patient_id,
                destination_bed_id,
                since: at,
            }
        }
        BedEvent::BeginRegulationDestination {
            patient_id,
            origin_bed_id,
        } => {
            next.regulation = RegulationState::DestinationPending {
                patient_id,
                origin_bed_id,
                since: at,
            }
        }
        BedEvent::CompleteRegulation | BedEvent::CancelRegulation => {
            next.regulation = RegulationState::None
        }
        BedEvent::Occupy | BedEvent::Release => {}
    }

    next.status = status;
    next.history.push(StatusChange { status, at });

    Ok(next)
}

/// Status a bed must take after reconciliation, given whether a patient
/// references it once the run is applied
pub fn reconciled_status(previous: BedStatus, occupied: bool) -> BedStatus {
    if occupied {
        BedStatus::Occupied
    } else if previous.holds_patient() || previous == BedStatus::Cleaning {
        BedStatus::Cleaning
    } else {
        BedStatus::Vacant
    }
}

/// Roster-driven override: the roster is ground truth, so the bed follows
/// occupancy even when the manual table would refuse the move. Always
/// appends one history entry, even when the status is unchanged.
pub fn reconcile_occupancy(bed: &Bed, occupied: bool, at: DateTime<Utc>) -> Bed {
    let status = reconciled_status(bed.status, occupied);

    let regular = matches!(
        (bed.status, status),
        (BedStatus::Vacant, BedStatus::Occupied)
            | (BedStatus::Occupied, BedStatus::Occupied)
            | (BedStatus::Occupied, BedStatus::Cleaning)
            | (BedStatus::Cleaning, BedStatus::Cleaning)
            | (BedStatus::Vacant, BedStatus::Vacant)
    );
    if !regular {
        tracing::warn!(
            bed = %bed.code,
            from = %bed.status,
            to = %status,
            "reconciliation overrides bed state"
        );
    }

    let mut next = bed.clone();
    next.status = status;
    next.block_reason = None;
    next.regulation = RegulationState::None;
    if status != BedStatus::Cleaning {
        next.cleaning_priority = false;
    }
    next.history.push(StatusChange { status, at });
    next
}

// ============================================================================
// TESTS
// ============================================================================
