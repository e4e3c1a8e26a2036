// ⚠️ Domain errors for the census engine
//
// Storage and I/O plumbing keeps using anyhow (see db.rs); anything an
// operator has to act on gets its own variant here.

use crate::validation::ValidationReport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CensusError {
    /// Roster references sectors/beds the census does not know about
    #[error("roster references unknown locations: {0}")]
    ReferentialGap(ValidationReport),

    /// Manual admission of someone already admitted (same name + birth date)
    #[error("patient {name} is already admitted at {location}")]
    DuplicatePatient {
        patient_id: String,
        name: String,
        location: String,
    },

    #[error("bed {bed_code}: cannot apply {event} while {from}")]
    InvalidTransition {
        bed_code: String,
        from: String,
        event: String,
    },

    #[error("blocking a bed requires a non-empty reason")]
    BlockReasonRequired,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Two patients would end up on the same bed
    #[error("bed {bed_code} would be shared by {patients:?}")]
    BedConflict {
        bed_code: String,
        patients: Vec<String>,
    },

    /// The plan recomputed at execution time differs from the reviewed one
    #[error("plan changed since review (expected {expected}, found {actual})")]
    PlanChanged { expected: String, actual: String },

    /// The store refused the batch; nothing was written
    #[error("atomic commit rejected, census unchanged: {0}")]
    CommitRejected(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CensusError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        CensusError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type CensusResult<T> = Result<T, CensusError>;
