// 🚪 Room Entity - beds sharing one physical room
//
// Rooms scope cohort restrictions: whoever lies in a room decides who may
// take its free beds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub sector_id: String,
    pub name: String,
    pub bed_ids: Vec<String>,
}

impl Room {
    pub fn new(sector_id: &str, name: &str) -> Self {
        Room {
            id: uuid::Uuid::new_v4().to_string(),
            sector_id: sector_id.to_string(),
            name: name.trim().to_string(),
            bed_ids: Vec::new(),
        }
    }

    pub fn add_bed(&mut self, bed_id: &str) {
        if !self.contains(bed_id) {
            self.bed_ids.push(bed_id.to_string());
        }
    }

    pub fn contains(&self, bed_id: &str) -> bool {
        self.bed_ids.iter().any(|id| id == bed_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_add_bed_is_idempotent() {
        let mut room = Room::new("sector-1", "101");
        room.add_bed("bed-a");
        room.add_bed("bed-a");
        room.add_bed("bed-b");

        assert_eq!(room.bed_ids, vec!["bed-a", "bed-b"]);
        assert!(room.contains("bed-b"));
        assert!(!room.contains("bed-c"));
    }
}
