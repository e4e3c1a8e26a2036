// 💾 Persistence Port
//
// The engine never talks to a concrete database. It reads whole collections
// (or single documents by key) and writes through one primitive: `commit`,
// which applies a WriteBatch atomically - every op or none.
//
// Implementations:
// - SqliteStore (db.rs): rusqlite transaction per batch
// - MemoryStore (here): used by tests, optionally limits batch size the way
//   hosted document stores do

use crate::bed_state::StatusChange;
use crate::entities::{Bed, Patient, Room, Sector};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

// ============================================================================
// WRITE BATCH
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutSector(Sector),
    PutRoom(Room),
    /// Upsert; the stored history must be a prefix of the new one
    PutBed(Bed),
    PutPatient(Patient),
    DeletePatient(String),
}

impl WriteOp {
    pub fn describe(&self) -> String {
        match self {
            WriteOp::PutSector(s) => format!("put sector {}", s.id),
            WriteOp::PutRoom(r) => format!("put room {}", r.id),
            WriteOp::PutBed(b) => format!("put bed {}", b.id),
            WriteOp::PutPatient(p) => format!("put patient {}", p.id),
            WriteOp::DeletePatient(id) => format!("delete patient {}", id),
        }
    }
}

/// Ordered list of writes applied as one unit of work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn put_bed(&mut self, bed: Bed) {
        self.push(WriteOp::PutBed(bed));
    }

    pub fn put_patient(&mut self, patient: Patient) {
        self.push(WriteOp::PutPatient(patient));
    }

    pub fn delete_patient(&mut self, id: &str) {
        self.push(WriteOp::DeletePatient(id.to_string()));
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait CensusStore {
    fn sectors(&self) -> Result<Vec<Sector>>;
    fn sector(&self, id: &str) -> Result<Option<Sector>>;

    fn rooms(&self) -> Result<Vec<Room>>;
    fn room(&self, id: &str) -> Result<Option<Room>>;

    fn beds(&self) -> Result<Vec<Bed>>;
    fn bed(&self, id: &str) -> Result<Option<Bed>>;

    fn patients(&self) -> Result<Vec<Patient>>;
    fn patient(&self, id: &str) -> Result<Option<Patient>>;

    /// Apply every op or none of them
    fn commit(&mut self, batch: WriteBatch) -> Result<()>;
}

/// Shared check for PutBed: history is append-only
pub fn check_history_append(
    bed_code: &str,
    stored: &[StatusChange],
    incoming: &[StatusChange],
) -> Result<()> {
    let prefix_ok = incoming.len() >= stored.len()
        && incoming.iter().zip(stored.iter()).all(|(new, old)| new == old);

    if !prefix_ok {
        bail!(
            "bed {} history rewrite rejected ({} stored entries, {} incoming)",
            bed_code,
            stored.len(),
            incoming.len()
        );
    }
    Ok(())
}

// ============================================================================
// CENSUS SNAPSHOT
// ============================================================================

/// Everything read from the store at one point, used by validation,
/// planning and the bed map
#[derive(Debug, Clone, Default)]
pub struct CensusSnapshot {
    pub sectors: Vec<Sector>,
    pub rooms: Vec<Room>,
    pub beds: Vec<Bed>,
    pub patients: Vec<Patient>,
}

impl CensusSnapshot {
    pub fn load<S: CensusStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(CensusSnapshot {
            sectors: store.sectors()?,
            rooms: store.rooms()?,
            beds: store.beds()?,
            patients: store.patients()?,
        })
    }

    pub fn sector(&self, id: &str) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.id == id)
    }

    pub fn bed(&self, id: &str) -> Option<&Bed> {
        self.beds.iter().find(|b| b.id == id)
    }

    pub fn patient(&self, id: &str) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    /// "UTI / U01" style label for messages
    pub fn location_of(&self, patient: &Patient) -> String {
        let sector = self
            .sector(&patient.sector_id)
            .map(|s| s.name.as_str())
            .unwrap_or("?");
        match patient.bed_id.as_deref().and_then(|id| self.bed(id)) {
            Some(bed) => format!("{} / {}", sector, bed.code),
            None => sector.to_string(),
        }
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sectors: BTreeMap<String, Sector>,
    rooms: BTreeMap<String, Room>,
    beds: BTreeMap<String, Bed>,
    patients: BTreeMap<String, Patient>,

    /// Reject batches with more ops than this
    max_batch_ops: Option<usize>,

    /// Reject the next N commits (simulates connectivity loss)
    fail_commits: usize,

    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_ops(mut self, max: usize) -> Self {
        self.max_batch_ops = Some(max);
        self
    }

    pub fn fail_next_commits(&mut self, n: usize) {
        self.fail_commits = n;
    }

    /// Successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn apply(&mut self, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::PutSector(sector) => {
                self.sectors.insert(sector.id.clone(), sector);
            }
            WriteOp::PutRoom(room) => {
                self.rooms.insert(room.id.clone(), room);
            }
            WriteOp::PutBed(bed) => {
                if let Some(stored) = self.beds.get(&bed.id) {
                    check_history_append(&stored.code, &stored.history, &bed.history)?;
                }
                self.beds.insert(bed.id.clone(), bed);
            }
            WriteOp::PutPatient(patient) => {
                self.patients.insert(patient.id.clone(), patient);
            }
            WriteOp::DeletePatient(id) => {
                self.patients
                    .remove(&id)
                    .ok_or_else(|| anyhow!("patient {} does not exist", id))?;
            }
        }
        Ok(())
    }
}

impl CensusStore for MemoryStore {
    fn sectors(&self) -> Result<Vec<Sector>> {
        Ok(self.sectors.values().cloned().collect())
    }

    fn sector(&self, id: &str) -> Result<Option<Sector>> {
        Ok(self.sectors.get(id).cloned())
    }

    fn rooms(&self) -> Result<Vec<Room>> {
        Ok(self.rooms.values().cloned().collect())
    }

    fn room(&self, id: &str) -> Result<Option<Room>> {
        Ok(self.rooms.get(id).cloned())
    }

    fn beds(&self) -> Result<Vec<Bed>> {
        Ok(self.beds.values().cloned().collect())
    }

    fn bed(&self, id: &str) -> Result<Option<Bed>> {
        Ok(self.beds.get(id).cloned())
    }

    fn patients(&self) -> Result<Vec<Patient>> {
        Ok(self.patients.values().cloned().collect())
    }

    fn patient(&self, id: &str) -> Result<Option<Patient>> {
        Ok(self.patients.get(id).cloned())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        if self.fail_commits > 0 {
            self.fail_commits -= 1;
            bail!("store unavailable");
        }

        if let Some(max) = self.max_batch_ops {
            if batch.len() > max {
                bail!("batch of {} writes exceeds limit of {}", batch.len(), max);
            }
        }

        // Stage on a copy, swap only when every op succeeded
        let mut staged = self.clone();
        for op in batch {
            staged.apply(op)?;
        }

        self.sectors = staged.sectors;
        self.rooms = staged.rooms;
        self.beds = staged.beds;
        self.patients = staged.patients;
        self.commits += 1;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
