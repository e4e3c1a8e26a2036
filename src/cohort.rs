// 👥 Cohort Constraints - who may take a free bed in a shared room
//
// In cohort-bearing sectors (wards by default) a room that already has
// occupants restricts its free beds to:
//   - the sex of the first occupant (occupants ordered by bed code)
//   - the union of the occupants' isolation codes
//
// Restrictions are derived on every read from explicit room membership and
// never stored. Rooms themselves come from the layout or from the one-off
// back-fill at the bottom of this file.

use crate::bed_state::BedStatus;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::entities::{Bed, Patient, Room, Sex};
use crate::error::{CensusError, CensusResult};
use crate::normalize::normalize_name;
use crate::store::{CensusSnapshot, CensusStore, WriteBatch, WriteOp};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CohortRestriction {
    pub sex: Option<Sex>,
    pub isolation_codes: BTreeSet<String>,
}

impl CohortRestriction {
    /// Would a patient with this sex and these isolations fit?
    pub fn admits(&self, sex: Option<Sex>, isolation_codes: &[&str]) -> bool {
        let sex_ok = match (self.sex, sex) {
            (Some(required), Some(candidate)) => required == candidate,
            _ => true,
        };
        let isolation_ok = isolation_codes
            .iter()
            .all(|code| self.isolation_codes.contains(&normalize_name(code)));
        sex_ok && isolation_ok
    }
}

/// Read model of one bed for the bed map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedView {
    pub bed: Bed,
    pub sector_name: String,
    pub room_name: Option<String>,
    pub patient: Option<Patient>,
    pub minutes_in_status: Option<i64>,
    pub restriction: Option<CohortRestriction>,
}

// ============================================================================
// DERIVATION
// ============================================================================

/// room_id -> restriction, for non-empty rooms of cohort sectors
pub fn room_restrictions(
    snapshot: &CensusSnapshot,
    config: &EngineConfig,
) -> HashMap<String, CohortRestriction> {
    let beds_by_id: HashMap<&str, &Bed> =
        snapshot.beds.iter().map(|b| (b.id.as_str(), b)).collect();

    // room_id -> [(bed code, occupant)]
    let mut occupants: HashMap<&str, Vec<(&str, &Patient)>> = HashMap::new();
    for patient in &snapshot.patients {
        let Some(bed) = patient.bed_id.as_deref().and_then(|id| beds_by_id.get(id)) else {
            continue;
        };
        let Some(room_id) = bed.room_id.as_deref() else {
            continue;
        };
        let cohort_sector = snapshot
            .sector(&bed.sector_id)
            .is_some_and(|s| config.is_cohort_sector(s.sector_type));
        if cohort_sector {
            occupants.entry(room_id).or_default().push((bed.code.as_str(), patient));
        }
    }

    occupants
        .into_iter()
        .map(|(room_id, mut in_room)| {
            in_room.sort_by(|a, b| a.0.cmp(b.0));
            let restriction = CohortRestriction {
                sex: in_room.iter().find_map(|(_, p)| p.sex),
                isolation_codes: in_room
                    .iter()
                    .flat_map(|(_, p)| p.isolation_codes().map(str::to_string))
                    .collect(),
            };
            (room_id.to_string(), restriction)
        })
        .collect()
}

/// Every bed with its occupant and, for free beds, its room restriction
pub fn bed_map(
    snapshot: &CensusSnapshot,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Vec<BedView> {
    let restrictions = room_restrictions(snapshot, config);
    let rooms: HashMap<&str, &Room> = snapshot.rooms.iter().map(|r| (r.id.as_str(), r)).collect();
    let patients: HashMap<&str, &Patient> = snapshot
        .patients
        .iter()
        .filter_map(|p| p.bed_id.as_deref().map(|bed_id| (bed_id, p)))
        .collect();

    let mut views: Vec<BedView> = snapshot
        .beds
        .iter()
        .map(|bed| {
            let room_id = bed.room_id.as_deref();
            let restriction = if bed.status.is_free() {
                room_id.and_then(|id| restrictions.get(id)).cloned()
            } else {
                None
            };

            BedView {
                bed: bed.clone(),
                sector_name: snapshot
                    .sector(&bed.sector_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                room_name: room_id.and_then(|id| rooms.get(id)).map(|r| r.name.clone()),
                patient: patients.get(bed.id.as_str()).map(|p| (*p).clone()),
                minutes_in_status: bed.time_in_status(now).map(|d| d.num_minutes()),
                restriction,
            }
        })
        .collect();

    views.sort_by(|a, b| {
        a.sector_name
            .cmp(&b.sector_name)
            .then_with(|| a.bed.code.cmp(&b.bed.code))
    });
    views
}

/// Convenience over a store and clock
pub fn load_bed_map<S: CensusStore + ?Sized>(
    store: &S,
    clock: &dyn Clock,
    config: &EngineConfig,
) -> CensusResult<Vec<BedView>> {
    let snapshot = CensusSnapshot::load(store)?;
    Ok(bed_map(&snapshot, config, clock.now()))
}

// ============================================================================
// ROOM BACK-FILL
// ============================================================================

fn room_key(code: &str, prefix_len: usize) -> String {
    normalize_name(code).chars().take(prefix_len).collect()
}

/// Create rooms for a sector's room-less beds, grouping by bed-code prefix.
/// Beds join an existing room of the same name when there is one. One batch.
pub fn backfill_rooms_from_codes<S: CensusStore + ?Sized>(
    store: &mut S,
    sector_id: &str,
    prefix_len: usize,
) -> CensusResult<Vec<Room>> {
    if store.sector(sector_id)?.is_none() {
        return Err(CensusError::not_found("sector", sector_id));
    }

    let mut rooms: BTreeMap<String, Room> = store
        .rooms()?
        .into_iter()
        .filter(|r| r.sector_id == sector_id)
        .map(|r| (normalize_name(&r.name), r))
        .collect();

    let mut changed: BTreeSet<String> = BTreeSet::new();
    let mut batch = WriteBatch::new();

    for bed in store.beds()? {
        if bed.sector_id != sector_id || bed.room_id.is_some() {
            continue;
        }
        let key = room_key(&bed.code, prefix_len);
        if key.is_empty() {
            continue;
        }

        let room = rooms
            .entry(key.clone())
            .or_insert_with(|| Room::new(sector_id, &key));
        room.add_bed(&bed.id);
        changed.insert(key);

        let room_id = room.id.clone();
        batch.put_bed(bed.in_room(&room_id));
    }

    let updated: Vec<Room> = changed
        .iter()
        .filter_map(|key| rooms.get(key).cloned())
        .collect();
    if updated.is_empty() {
        return Ok(updated);
    }

    for room in &updated {
        batch.push(WriteOp::PutRoom(room.clone()));
    }
    store
        .commit(batch)
        .map_err(|e| CensusError::CommitRejected(format!("{:#}", e)))?;

    tracing::info!(sector = %sector_id, rooms = updated.len(), "rooms back-filled from bed codes");
    Ok(updated)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{IsolationStatus, Sector, SectorType};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 5, 8, 0, 0).unwrap()
    }

    /// Ward with room 301 (301A, 301B, 301C) and an ICU bed in a room too
    fn snapshot() -> CensusSnapshot {
        let ward = Sector::new("Enfermaria", SectorType::Ward);
        let icu = Sector::new("UTI", SectorType::Icu);
        let mut room = Room::new(&ward.id, "301");
        let mut icu_room = Room::new(&icu.id, "U0");

        let mut beds = Vec::new();
        for code in ["301A", "301B", "301C"] {
            let bed = Bed::provision(code, &ward.id, t()).in_room(&room.id);
            room.add_bed(&bed.id);
            beds.push(bed);
        }
        let icu_bed = Bed::provision("U01", &icu.id, t()).in_room(&icu_room.id);
        icu_room.add_bed(&icu_bed.id);
        beds.push(icu_bed);
        let icu_free = Bed::provision("U02", &icu.id, t()).in_room(&icu_room.id);
        icu_room.add_bed(&icu_free.id);
        beds.push(icu_free);

        CensusSnapshot {
            sectors: vec![ward, icu],
            rooms: vec![room, icu_room],
            beds,
            patients: Vec::new(),
        }
    }

    fn occupy(snapshot: &mut CensusSnapshot, code: &str, patient: Patient) {
        let bed = snapshot.beds.iter_mut().find(|b| b.code == code).unwrap();
        bed.status = BedStatus::Occupied;
        let patient = patient.in_bed(&bed.id);
        snapshot.patients.push(patient);
    }

    fn view<'a>(views: &'a [BedView], code: &str) -> &'a BedView {
        views.iter().find(|v| v.bed.code == code).unwrap()
    }

    #[test]
    fn test_occupied_room_restricts_free_beds() {
        let mut snap = snapshot();
        let ward_id = snap.sectors[0].id.clone();
        occupy(
            &mut snap,
            "301A",
            Patient::new("Ana", &ward_id)
                .with_sex(Sex::Female)
                .with_isolation("MRSA", IsolationStatus::Confirmed, t()),
        );

        let views = bed_map(&snap, &EngineConfig::default(), t());
        let restriction = view(&views, "301B").restriction.clone().unwrap();
        assert_eq!(restriction.sex, Some(Sex::Female));
        assert!(restriction.isolation_codes.contains("MRSA"));
        assert!(view(&views, "301C").restriction.is_some());
        // occupied bed itself carries no restriction
        assert!(view(&views, "301A").restriction.is_none());
        assert_eq!(view(&views, "301A").patient.as_ref().unwrap().name, "Ana");
        assert_eq!(view(&views, "301B").room_name.as_deref(), Some("301"));
    }

    #[test]
    fn test_restriction_uses_first_occupant_by_code_and_isolation_union() {
        let mut snap = snapshot();
        let ward_id = snap.sectors[0].id.clone();
        occupy(
            &mut snap,
            "301B",
            Patient::new("Bia", &ward_id)
                .with_sex(Sex::Female)
                .with_isolation("KPC", IsolationStatus::Suspected, t()),
        );
        occupy(
            &mut snap,
            "301A",
            Patient::new("Caio", &ward_id)
                .with_sex(Sex::Male)
                .with_isolation("MRSA", IsolationStatus::Confirmed, t()),
        );

        let views = bed_map(&snap, &EngineConfig::default(), t());
        let restriction = view(&views, "301C").restriction.clone().unwrap();
        assert_eq!(restriction.sex, Some(Sex::Male));
        assert_eq!(
            restriction.isolation_codes.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["KPC", "MRSA"]
        );
    }

    #[test]
    fn test_empty_room_and_non_cohort_sector_unrestricted() {
        let mut snap = snapshot();
        let icu_id = snap.sectors[1].id.clone();
        occupy(&mut snap, "U01", Patient::new("Davi", &icu_id).with_sex(Sex::Male));

        let views = bed_map(&snap, &EngineConfig::default(), t());
        assert!(views.iter().all(|v| v.restriction.is_none()));

        let mut config = EngineConfig::default();
        config.cohort_sector_types.push(SectorType::Icu);
        let views = bed_map(&snap, &config, t());
        assert_eq!(view(&views, "U02").restriction.as_ref().unwrap().sex, Some(Sex::Male));
    }

    #[test]
    fn test_blocked_bed_never_restricted() {
        let mut snap = snapshot();
        let ward_id = snap.sectors[0].id.clone();
        occupy(&mut snap, "301A", Patient::new("Ana", &ward_id).with_sex(Sex::Female));
        snap.beds.iter_mut().find(|b| b.code == "301C").unwrap().status = BedStatus::Blocked;

        let views = bed_map(&snap, &EngineConfig::default(), t());
        assert!(view(&views, "301C").restriction.is_none());
        assert!(view(&views, "301B").restriction.is_some());
    }

    #[test]
    fn test_admits() {
        let restriction = CohortRestriction {
            sex: Some(Sex::Female),
            isolation_codes: ["MRSA".to_string()].into_iter().collect(),
        };
        assert!(restriction.admits(Some(Sex::Female), &["mrsa"]));
        assert!(restriction.admits(None, &[]));
        assert!(!restriction.admits(Some(Sex::Male), &[]));
        assert!(!restriction.admits(Some(Sex::Female), &["KPC"]));
    }

    #[test]
    fn test_backfill_rooms_from_codes() {
        let ward = Sector::new("Enfermaria", SectorType::Ward);
        let mut store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSector(ward.clone()));
        for code in ["301A", "301B", "302A", "PS1"] {
            batch.put_bed(Bed::provision(code, &ward.id, t()));
        }
        let existing = Room::new(&ward.id, "302");
        batch.push(WriteOp::PutRoom(existing.clone()));
        store.commit(batch).unwrap();

        let rooms = backfill_rooms_from_codes(&mut store, &ward.id, 3).unwrap();
        let names: Vec<&str> = rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["301", "302", "PS1"]);

        let room_302 = store.room(&existing.id).unwrap().unwrap();
        assert_eq!(room_302.bed_ids.len(), 1);
        assert_eq!(store.rooms().unwrap().len(), 3);
        assert!(store.beds().unwrap().iter().all(|b| b.room_id.is_some()));

        // nothing left to do
        assert!(backfill_rooms_from_codes(&mut store, &ward.id, 3).unwrap().is_empty());
        assert!(matches!(
            backfill_rooms_from_codes(&mut store, "nope", 3),
            Err(CensusError::NotFound { .. })
        ));
    }
}
