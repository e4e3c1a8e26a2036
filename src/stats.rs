// 📊 Census Summary - bed counts per sector
//
// occupancy_rate = beds holding a patient / beds not blocked

use crate::bed_state::BedStatus;
use crate::entities::SectorType;
use crate::store::CensusSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub occupied: usize,
    pub blocked: usize,
    pub occupancy_rate: f64,
}

impl StatusCounts {
    fn add(&mut self, status: BedStatus) {
        self.total += 1;
        *self.by_status.entry(status.as_str().to_string()).or_insert(0) += 1;
        if status.holds_patient() {
            self.occupied += 1;
        }
        if status == BedStatus::Blocked {
            self.blocked += 1;
        }
    }

    fn finish(&mut self) {
        let available = self.total - self.blocked;
        self.occupancy_rate = if available == 0 {
            0.0
        } else {
            self.occupied as f64 / available as f64
        };
    }

    pub fn count(&self, status: BedStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorSummary {
    pub sector_id: String,
    pub sector_name: String,
    pub sector_type: SectorType,
    pub beds: StatusCounts,
    pub cleaning_priority: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CensusSummary {
    pub generated_at: DateTime<Utc>,
    pub sectors: Vec<SectorSummary>,
    pub totals: StatusCounts,
    pub patients: usize,
    pub pending_regulations: usize,
}

pub fn summarize(snapshot: &CensusSnapshot, now: DateTime<Utc>) -> CensusSummary {
    let mut totals = StatusCounts::default();
    let mut sectors: Vec<SectorSummary> = snapshot
        .sectors
        .iter()
        .map(|sector| {
            let mut counts = StatusCounts::default();
            let mut cleaning_priority = 0;
            for bed in snapshot.beds.iter().filter(|b| b.sector_id == sector.id) {
                counts.add(bed.status);
                totals.add(bed.status);
                if bed.cleaning_priority {
                    cleaning_priority += 1;
                }
            }
            counts.finish();

            SectorSummary {
                sector_id: sector.id.clone(),
                sector_name: sector.name.clone(),
                sector_type: sector.sector_type,
                beds: counts,
                cleaning_priority,
            }
        })
        .collect();
    totals.finish();
    sectors.sort_by(|a, b| a.sector_name.cmp(&b.sector_name));

    CensusSummary {
        generated_at: now,
        sectors,
        totals,
        patients: snapshot.patients.len(),
        // both beds of a move carry the state; count origins only
        pending_regulations: snapshot
            .beds
            .iter()
            .filter(|b| b.status == BedStatus::RegulationOrigin)
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Bed, Sector};
    use chrono::TimeZone;

    #[test]
    fn test_summary_counts_and_rate() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let uti = Sector::new("UTI", SectorType::Icu);
        let ps = Sector::new("PS", SectorType::Emergency);

        let mut beds = Vec::new();
        for (code, status) in [
            ("U01", BedStatus::Occupied),
            ("U02", BedStatus::Vacant),
            ("U03", BedStatus::Blocked),
            ("U04", BedStatus::RegulationOrigin),
        ] {
            let mut bed = Bed::provision(code, &uti.id, at);
            bed.status = status;
            beds.push(bed);
        }
        let mut cleaning = Bed::provision("PS1", &ps.id, at);
        cleaning.status = BedStatus::Cleaning;
        cleaning.cleaning_priority = true;
        beds.push(cleaning);

        let snapshot = CensusSnapshot {
            sectors: vec![uti, ps],
            rooms: Vec::new(),
            beds,
            patients: Vec::new(),
        };
        let summary = summarize(&snapshot, at);

        assert_eq!(summary.sectors[0].sector_name, "PS");
        assert_eq!(summary.sectors[0].cleaning_priority, 1);
        let uti = &summary.sectors[1].beds;
        assert_eq!(uti.total, 4);
        assert_eq!(uti.occupied, 2);
        assert_eq!(uti.count(BedStatus::Blocked), 1);
        assert!((uti.occupancy_rate - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(summary.totals.total, 5);
        assert_eq!(summary.totals.count(BedStatus::Cleaning), 1);
        assert_eq!(summary.pending_regulations, 1);
    }

    #[test]
    fn test_empty_census() {
        let summary = summarize(&CensusSnapshot::default(), Utc::now());
        assert_eq!(summary.totals.occupancy_rate, 0.0);
        assert!(summary.sectors.is_empty());
    }
}
