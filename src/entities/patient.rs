// 🧑‍⚕️ Patient Entity
//
// A patient exists only while admitted: created by admission, moved by
// transfer, deleted on discharge. `normalized_name` is the matching key used
// by reconciliation and duplicate checks.

use crate::normalize::normalize_name;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SEX
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Female => "F",
            Sex::Male => "M",
        }
    }

    pub fn parse(raw: &str) -> Option<Sex> {
        match normalize_name(raw).as_str() {
            "F" | "FEM" | "FEMININO" | "FEMALE" => Some(Sex::Female),
            "M" | "MASC" | "MASCULINO" | "MALE" => Some(Sex::Male),
            _ => None,
        }
    }
}

// ============================================================================
// ISOLATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationStatus {
    Suspected,
    Confirmed,
}

/// Active isolation precaution, keyed by infection code ("MRSA", "KPC")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isolation {
    pub infection_code: String,
    pub status: IsolationStatus,
    pub since: DateTime<Utc>,
}

// ============================================================================
// FLAGS
// ============================================================================

/// Independent markers set by the care team; reconciliation never reads them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientFlags {
    #[serde(default)]
    pub icu_requested: bool,

    #[serde(default)]
    pub probable_discharge: bool,

    #[serde(default)]
    pub relocation_requested: Option<String>,
}

// ============================================================================
// PATIENT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub normalized_name: String,

    #[serde(default)]
    pub birth_date: Option<NaiveDate>,

    #[serde(default)]
    pub sex: Option<Sex>,

    /// Start of the current stay
    #[serde(default)]
    pub admitted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub specialty: Option<String>,

    #[serde(default)]
    pub bed_id: Option<String>,

    pub sector_id: String,

    #[serde(default)]
    pub isolations: Vec<Isolation>,

    #[serde(default)]
    pub flags: PatientFlags,
}

impl Patient {
    pub fn new(name: &str, sector_id: &str) -> Self {
        Patient {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            normalized_name: normalize_name(name),
            birth_date: None,
            sex: None,
            admitted_at: None,
            specialty: None,
            bed_id: None,
            sector_id: sector_id.to_string(),
            isolations: Vec::new(),
            flags: PatientFlags::default(),
        }
    }

    /// Builder pattern: bind to a bed
    pub fn in_bed(mut self, bed_id: &str) -> Self {
        self.bed_id = Some(bed_id.to_string());
        self
    }

    pub fn with_sex(mut self, sex: Sex) -> Self {
        self.sex = Some(sex);
        self
    }

    pub fn with_birth_date(mut self, birth_date: NaiveDate) -> Self {
        self.birth_date = Some(birth_date);
        self
    }

    pub fn with_isolation(
        mut self,
        code: &str,
        status: IsolationStatus,
        since: DateTime<Utc>,
    ) -> Self {
        self.set_isolation(code, status, since);
        self
    }

    /// Upsert by normalized infection code
    pub fn set_isolation(&mut self, code: &str, status: IsolationStatus, since: DateTime<Utc>) {
        let code = normalize_name(code);
        match self.isolations.iter_mut().find(|i| i.infection_code == code) {
            Some(existing) => existing.status = status,
            None => self.isolations.push(Isolation {
                infection_code: code,
                status,
                since,
            }),
        }
    }

    /// Returns true when an isolation was removed
    pub fn clear_isolation(&mut self, code: &str) -> bool {
        let code = normalize_name(code);
        let before = self.isolations.len();
        self.isolations.retain(|i| i.infection_code != code);
        before != self.isolations.len()
    }

    pub fn isolation_codes(&self) -> impl Iterator<Item = &str> {
        self.isolations.iter().map(|i| i.infection_code.as_str())
    }

    /// Same person for duplicate-admission purposes
    pub fn same_person(&self, normalized_name: &str, birth_date: Option<NaiveDate>) -> bool {
        self.normalized_name == normalized_name && self.birth_date == birth_date
    }

    /// Whole years at `today`; None without a birth date
    pub fn age_at(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|born| today.years_since(born))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_patient_creation_normalizes_name() {
        let p = Patient::new(" Ana Lúcia ", "s1").in_bed("b1").with_sex(Sex::Female);

        assert_eq!(p.name, "Ana Lúcia");
        assert_eq!(p.normalized_name, "ANA LUCIA");
        assert_eq!(p.bed_id.as_deref(), Some("b1"));
        assert_eq!(p.id.len(), 36);
    }

    #[test]
    fn test_sex_parse() {
        assert_eq!(Sex::parse("f"), Some(Sex::Female));
        assert_eq!(Sex::parse("Masculino"), Some(Sex::Male));
        assert_eq!(Sex::parse("?"), None);
    }

    #[test]
    fn test_isolation_upsert_and_clear() {
        let mut p = Patient::new("Ana", "s1")
            .with_isolation("mrsa", IsolationStatus::Suspected, now());
        p.set_isolation("MRSA", IsolationStatus::Confirmed, now());
        p.set_isolation("kpc", IsolationStatus::Suspected, now());

        assert_eq!(p.isolations.len(), 2);
        assert_eq!(p.isolations[0].status, IsolationStatus::Confirmed);
        assert_eq!(p.isolation_codes().collect::<Vec<_>>(), vec!["MRSA", "KPC"]);

        assert!(p.clear_isolation("Kpc"));
        assert!(!p.clear_isolation("VRE"));
        assert_eq!(p.isolations.len(), 1);
    }

    #[test]
    fn test_same_person_needs_name_and_birth_date() {
        let born = NaiveDate::from_ymd_opt(1950, 3, 3).unwrap();
        let p = Patient::new("John Doe", "s1").with_birth_date(born);

        assert!(p.same_person("JOHN DOE", Some(born)));
        assert!(!p.same_person("JOHN DOE", None));
        assert!(!p.same_person("JANE DOE", Some(born)));
    }

    #[test]
    fn test_age_at() {
        let p = Patient::new("X", "s")
            .with_birth_date(NaiveDate::from_ymd_opt(1980, 6, 2).unwrap());
        assert_eq!(p.age_at(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), Some(44));
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(Patient::new("Y", "s").age_at(today), None);
    }
}
