// 🏗️ Layout import - provision sectors, rooms and beds from a CSV
//
// Columns: sector, sector_type, room (optional), bed, pcp (optional).
// Re-importing the same file is a no-op: sectors match by name, rooms by
// (sector, name), beds by (sector, code).

use crate::entities::{Bed, Room, Sector, SectorType};
use crate::error::{CensusError, CensusResult};
use crate::normalize::normalize_name;
use crate::store::{CensusStore, WriteBatch, WriteOp};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayoutRow {
    #[serde(alias = "setor")]
    pub sector: String,
    #[serde(default, alias = "tipo")]
    pub sector_type: String,
    #[serde(default, alias = "quarto")]
    pub room: String,
    #[serde(alias = "leito")]
    pub bed: String,
    #[serde(default)]
    pub pcp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutImport {
    pub sectors_created: usize,
    pub rooms_created: usize,
    pub beds_created: usize,
    pub beds_skipped: usize,
}

pub fn read_layout_rows<R: Read>(reader: R) -> Result<Vec<LayoutRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<LayoutRow>().enumerate() {
        rows.push(record.with_context(|| format!("Failed to read layout line {}", index + 2))?);
    }
    Ok(rows)
}

fn truthy(raw: &str) -> bool {
    matches!(normalize_name(raw).as_str(), "1" | "TRUE" | "SIM" | "YES" | "X" | "S" | "Y")
}

pub fn import_layout<S: CensusStore + ?Sized>(
    store: &mut S,
    rows: &[LayoutRow],
    at: DateTime<Utc>,
) -> CensusResult<LayoutImport> {
    let mut sectors: HashMap<String, Sector> = store
        .sectors()?
        .into_iter()
        .map(|s| (s.match_key(), s))
        .collect();
    let mut rooms: HashMap<(String, String), Room> = store
        .rooms()?
        .into_iter()
        .map(|r| ((r.sector_id.clone(), normalize_name(&r.name)), r))
        .collect();
    let mut beds: HashMap<(String, String), String> = store
        .beds()?
        .into_iter()
        .map(|b| ((b.sector_id.clone(), b.match_key()), b.id))
        .collect();

    let mut report = LayoutImport::default();
    let mut batch = WriteBatch::new();
    let mut touched_rooms: Vec<(String, String)> = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        if row.sector.trim().is_empty() || row.bed.trim().is_empty() {
            continue;
        }

        let sector_key = normalize_name(&row.sector);
        let sector = match sectors.get(&sector_key) {
            Some(sector) => sector.clone(),
            None => {
                let sector_type = SectorType::parse(&row.sector_type).ok_or_else(|| {
                    anyhow!(
                        "layout line {}: unknown sector type {:?} for new sector {}",
                        index + 2,
                        row.sector_type,
                        row.sector
                    )
                })?;
                let sector = Sector::new(&row.sector, sector_type);
                batch.push(WriteOp::PutSector(sector.clone()));
                sectors.insert(sector_key, sector.clone());
                report.sectors_created += 1;
                sector
            }
        };

        let bed_key = (sector.id.clone(), normalize_name(&row.bed));
        if beds.contains_key(&bed_key) {
            report.beds_skipped += 1;
            continue;
        }

        let mut bed = Bed::provision(&row.bed, &sector.id, at);
        if truthy(&row.pcp) {
            bed = bed.as_pcp();
        }

        if !row.room.trim().is_empty() {
            let room_key = (sector.id.clone(), normalize_name(&row.room));
            let room = rooms.entry(room_key.clone()).or_insert_with(|| {
                report.rooms_created += 1;
                Room::new(&sector.id, &row.room)
            });
            room.add_bed(&bed.id);
            bed = bed.in_room(&room.id);
            if !touched_rooms.contains(&room_key) {
                touched_rooms.push(room_key);
            }
        }

        beds.insert(bed_key, bed.id.clone());
        batch.put_bed(bed);
        report.beds_created += 1;
    }

    for key in &touched_rooms {
        if let Some(room) = rooms.get(key) {
            batch.push(WriteOp::PutRoom(room.clone()));
        }
    }

    if !batch.is_empty() {
        store
            .commit(batch)
            .map_err(|e| CensusError::CommitRejected(format!("{:#}", e)))?;
    }

    tracing::info!(
        sectors = report.sectors_created,
        rooms = report.rooms_created,
        beds = report.beds_created,
        skipped = report.beds_skipped,
        "layout imported"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    const LAYOUT: &str = "sector,sector_type,room,bed,pcp\n\
                          UTI,Icu,,U01,\n\
                          UTI,Icu,,U02,sim\n\
                          Enfermaria 3,Enfermaria,301,301A,\n\
                          Enfermaria 3,Enfermaria,301,301B,\n";

    #[test]
    fn test_import_layout_is_idempotent() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows = read_layout_rows(LAYOUT.as_bytes()).unwrap();
        let mut store = MemoryStore::new();

        let first = import_layout(&mut store, &rows, at).unwrap();
        assert_eq!(first.sectors_created, 2);
        assert_eq!(first.rooms_created, 1);
        assert_eq!(first.beds_created, 4);

        let rooms = store.rooms().unwrap();
        assert_eq!(rooms[0].bed_ids.len(), 2);
        let beds = store.beds().unwrap();
        assert_eq!(beds.iter().filter(|b| b.is_pcp).count(), 1);
        assert_eq!(beds.iter().filter(|b| b.room_id.is_some()).count(), 2);

        let second = import_layout(&mut store, &rows, at).unwrap();
        assert_eq!(second.beds_created, 0);
        assert_eq!(second.beds_skipped, 4);
        assert_eq!(store.beds().unwrap().len(), 4);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_unknown_sector_type_aborts_without_writes() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let csv = "sector,sector_type,room,bed,pcp\nGaragem,???,,G1,\n";
        let rows = read_layout_rows(csv.as_bytes()).unwrap();
        let mut store = MemoryStore::new();

        assert!(import_layout(&mut store, &rows, at).is_err());
        assert!(store.sectors().unwrap().is_empty());
    }
}
