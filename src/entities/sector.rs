// 🏥 Sector Entity - a hospital area grouping beds
//
// The sector type decides which rules apply: cohort restrictions only make
// sense where rooms are shared (wards), never in the emergency hall.

use crate::normalize::normalize_name;
use serde::{Deserialize, Serialize};

// ============================================================================
// SECTOR TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorType {
    /// Emergency department (PS)
    Emergency,

    /// Inpatient ward with shared rooms
    Ward,

    /// Intensive care unit
    Icu,

    /// Surgical center / recovery
    SurgicalCenter,
}

impl SectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectorType::Emergency => "Emergency",
            SectorType::Ward => "Ward",
            SectorType::Icu => "Icu",
            SectorType::SurgicalCenter => "SurgicalCenter",
        }
    }

    /// Accepts the stored name plus the labels operators actually type
    pub fn parse(raw: &str) -> Option<SectorType> {
        match normalize_name(raw).as_str() {
            "EMERGENCY" | "PS" | "PRONTO SOCORRO" | "EMERGENCIA" => Some(SectorType::Emergency),
            "WARD" | "ENFERMARIA" => Some(SectorType::Ward),
            "ICU" | "UTI" => Some(SectorType::Icu),
            "SURGICALCENTER" | "SURGICAL CENTER" | "CENTRO CIRURGICO" | "CC" => {
                Some(SectorType::SurgicalCenter)
            }
            _ => None,
        }
    }
}

// ============================================================================
// SECTOR ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub id: String,
    pub name: String,
    pub sector_type: SectorType,
}

impl Sector {
    pub fn new(name: &str, sector_type: SectorType) -> Self {
        Sector {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            sector_type,
        }
    }

    /// Key used when roster sector names are resolved
    pub fn match_key(&self) -> String {
        normalize_name(&self.name)
    }
}
