// 🛏️ Bed Entity
//
// Identity (id) never changes; status only moves through bed_state.rs and
// every move is kept in `history`. Time in the current status is always
// derived from the last history entry, never stored.

use crate::bed_state::{BedStatus, RegulationState, StatusChange};
use crate::normalize::normalize_name;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bed {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub id: String,

    /// Human code printed on the bed ("UTI-01", "203B")
    pub code: String,

    pub sector_id: String,

    #[serde(default)]
    pub room_id: Option<String>,

    // ========================================================================
    // STATE
    // ========================================================================
    pub status: BedStatus,

    /// Append-only, oldest first
    pub history: Vec<StatusChange>,

    #[serde(default)]
    pub regulation: RegulationState,

    #[serde(default)]
    pub block_reason: Option<String>,

    // ========================================================================
    // FLAGS
    // ========================================================================
    /// Reserved for the PCP protocol
    #[serde(default)]
    pub is_pcp: bool,

    /// Cleaning team should take this bed first
    #[serde(default)]
    pub cleaning_priority: bool,
}

impl Bed {
    /// New bed, Vacant from `at`
    pub fn provision(code: &str, sector_id: &str, at: DateTime<Utc>) -> Self {
        Bed {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.trim().to_string(),
            sector_id: sector_id.to_string(),
            room_id: None,
            status: BedStatus::Vacant,
            history: vec![StatusChange {
                status: BedStatus::Vacant,
                at,
            }],
            regulation: RegulationState::None,
            block_reason: None,
            is_pcp: false,
            cleaning_priority: false,
        }
    }

    /// Builder pattern: place the bed in a room
    pub fn in_room(mut self, room_id: &str) -> Self {
        self.room_id = Some(room_id.to_string());
        self
    }

    /// Builder pattern: mark as PCP bed
    pub fn as_pcp(mut self) -> Self {
        self.is_pcp = true;
        self
    }

    /// Key used when roster bed codes are resolved
    pub fn match_key(&self) -> String {
        normalize_name(&self.code)
    }

    pub fn last_change(&self) -> Option<&StatusChange> {
        self.history.last()
    }

    /// now - timestamp of the last status change
    pub fn time_in_status(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_change().map(|change| now - change.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_provision_starts_vacant_with_history() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let bed = Bed::provision(" u01 ", "sector-icu", at).in_room("room-1").as_pcp();

        assert_eq!(bed.code, "u01");
        assert_eq!(bed.match_key(), "U01");
        assert_eq!(bed.status, BedStatus::Vacant);
        assert_eq!(bed.history.len(), 1);
        assert_eq!(bed.room_id.as_deref(), Some("room-1"));
        assert!(bed.is_pcp);
        assert!(!bed.regulation.is_pending());
    }

    #[test]
    fn test_time_in_status_derived_from_history() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let bed = Bed::provision("A1", "s", at);

        assert_eq!(bed.time_in_status(at + Duration::minutes(45)), Some(Duration::minutes(45)));
    }
}
