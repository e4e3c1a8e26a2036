// Entity Models
//
// Explicit records for everything the census stores. Each entity has a
// stable identity (UUID); names and codes are values matched through
// normalize.rs.

pub mod bed;
pub mod patient;
pub mod room;
pub mod sector;

pub use bed::Bed;
pub use patient::{Isolation, IsolationStatus, Patient, PatientFlags, Sex};
pub use room::Room;
pub use sector::{Sector, SectorType};
