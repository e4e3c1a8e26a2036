// Bed Census - Core Library
// Census reconciliation and bed-state engine, shared by the CLI and the API server

pub mod audit;          // Audit sinks (events table, tracing, memory)
pub mod bed_state;      // Bed state machine + append-only history
pub mod clock;
pub mod cohort;         // Room sex/isolation restrictions, room back-fill
pub mod config;
pub mod db;             // SQLite store
pub mod engine;         // CensusEngine facade
pub mod entities;
pub mod error;
pub mod executor;       // Applies a plan as one atomic batch
pub mod layout;         // Sector/room/bed provisioning from CSV
pub mod normalize;
pub mod operations;     // Manual bed operations
pub mod reconciliation; // Roster vs census planner
pub mod roster;
pub mod stats;
pub mod store;          // Persistence port + MemoryStore
pub mod validation;     // Referential gate

// Re-export commonly used types
pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, SqliteAuditSink, TracingAuditSink};
pub use bed_state::{BedEvent, BedStatus, RegulationState, StatusChange};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cohort::{BedView, CohortRestriction};
pub use config::EngineConfig;
pub use db::{get_events_for_entity, insert_event, setup_database, Event, SqliteStore};
pub use engine::CensusEngine;
pub use entities::{
    Bed, Isolation, IsolationStatus, Patient, PatientFlags, Room, Sector, SectorType, Sex,
};
pub use error::{CensusError, CensusResult};
pub use executor::{BedOutcome, ExecutionReport};
pub use layout::{LayoutImport, LayoutRow};
pub use operations::NewPatient;
pub use reconciliation::{PlanCounts, ReconciliationPlan, Transfer, Unchanged};
pub use roster::{load_roster_csv, normalize_rows, RosterEntry, RosterRow};
pub use stats::{CensusSummary, SectorSummary, StatusCounts};
pub use store::{CensusSnapshot, CensusStore, MemoryStore, WriteBatch, WriteOp};
pub use validation::{
    CensusIndex, ResolvedEntry, ValidatedRoster, ValidationOutcome, ValidationReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
