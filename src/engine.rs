// 🏥 Census Engine - one handle over store, clock, config and audit sink
//
//   validate(entries) ─▶ ValidationOutcome
//        │ Valid(ValidatedRoster)
//        ▼
//   plan(roster) ─▶ ReconciliationPlan ─▶ (operator review) ─▶ execute(plan)
//
// `reconcile_confirmed` recomputes the plan right before executing and
// refuses to run when its fingerprint differs from the one the operator saw.

use crate::audit::{AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::cohort::{backfill_rooms_from_codes, bed_map, BedView};
use crate::config::EngineConfig;
use crate::entities::{Bed, IsolationStatus, Patient, Room, Sector};
use crate::error::{CensusError, CensusResult};
use crate::executor::{execute, ExecutionReport};
use crate::layout::{import_layout, LayoutImport, LayoutRow};
use crate::operations::{self, NewPatient, OperationContext};
use crate::reconciliation::{plan, ReconciliationPlan};
use crate::roster::RosterEntry;
use crate::stats::{summarize, CensusSummary};
use crate::store::{CensusSnapshot, CensusStore};
use crate::validation::{validate, CensusIndex, ValidatedRoster, ValidationOutcome};
use std::sync::Arc;

pub struct CensusEngine<S: CensusStore> {
    store: S,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl<S: CensusStore> CensusEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        CensusEngine {
            store,
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            config,
        }
    }

    /// Builder pattern: inject the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builder pattern: inject the audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn snapshot(&self) -> CensusResult<CensusSnapshot> {
        Ok(CensusSnapshot::load(&self.store)?)
    }

    /// Store and operation context borrowed side by side
    fn split(&mut self) -> (&mut S, OperationContext<'_>) {
        let ctx = OperationContext {
            clock: self.clock.as_ref(),
            audit: self.audit.as_ref(),
            actor: &self.config.audit_actor,
        };
        (&mut self.store, ctx)
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    pub fn validate(&self, entries: &[RosterEntry]) -> CensusResult<ValidationOutcome> {
        let snapshot = self.snapshot()?;
        Ok(validate(entries, &CensusIndex::from_snapshot(&snapshot)))
    }

    pub fn plan(&self, roster: &ValidatedRoster) -> CensusResult<ReconciliationPlan> {
        Ok(plan(roster, &self.store.patients()?))
    }

    /// Validate then plan; a referential gap becomes `ReferentialGap`
    pub fn prepare(&self, entries: &[RosterEntry]) -> CensusResult<ReconciliationPlan> {
        let roster = self.validate(entries)?.into_result()?;
        self.plan(&roster)
    }

    pub fn execute(&mut self, plan: &ReconciliationPlan) -> CensusResult<ExecutionReport> {
        execute(
            &mut self.store,
            self.clock.as_ref(),
            &self.config,
            plan,
            self.audit.as_ref(),
        )
    }

    /// Prepare and execute without a review step
    pub fn reconcile(&mut self, entries: &[RosterEntry]) -> CensusResult<ExecutionReport> {
        let plan = self.prepare(entries)?;
        self.execute(&plan)
    }

    /// Execute only if the plan still matches the reviewed fingerprint
    pub fn reconcile_confirmed(
        &mut self,
        entries: &[RosterEntry],
        reviewed_fingerprint: &str,
    ) -> CensusResult<ExecutionReport> {
        let plan = self.prepare(entries)?;
        if plan.fingerprint() != reviewed_fingerprint {
            return Err(CensusError::PlanChanged {
                expected: reviewed_fingerprint.to_string(),
                actual: plan.fingerprint().to_string(),
            });
        }
        self.execute(&plan)
    }

    // ========================================================================
    // READ MODELS
    // ========================================================================

    pub fn bed_map(&self) -> CensusResult<Vec<BedView>> {
        let snapshot = self.snapshot()?;
        Ok(bed_map(&snapshot, &self.config, self.clock.now()))
    }

    pub fn summary(&self) -> CensusResult<CensusSummary> {
        let snapshot = self.snapshot()?;
        Ok(summarize(&snapshot, self.clock.now()))
    }

    pub fn find_sector(&self, name: &str) -> CensusResult<Sector> {
        let snapshot = self.snapshot()?;
        CensusIndex::from_snapshot(&snapshot)
            .sector(name)
            .cloned()
            .ok_or_else(|| CensusError::not_found("sector", name))
    }

    // ========================================================================
    // LAYOUT
    // ========================================================================

    pub fn import_layout(&mut self, rows: &[LayoutRow]) -> CensusResult<LayoutImport> {
        let now = self.clock.now();
        import_layout(&mut self.store, rows, now)
    }

    pub fn backfill_rooms(&mut self, sector_id: &str) -> CensusResult<Vec<Room>> {
        let prefix_len = self.config.room_prefix_len;
        backfill_rooms_from_codes(&mut self.store, sector_id, prefix_len)
    }

    // ========================================================================
    // BED OPERATIONS
    // ========================================================================

    pub fn admit_patient(&mut self, new: NewPatient, bed_id: &str) -> CensusResult<Patient> {
        let (store, ctx) = self.split();
        operations::admit_patient(store, &ctx, new, bed_id)
    }

    pub fn discharge_patient(&mut self, patient_id: &str) -> CensusResult<()> {
        let (store, ctx) = self.split();
        operations::discharge_patient(store, &ctx, patient_id)
    }

    pub fn finish_cleaning(&mut self, bed_id: &str) -> CensusResult<Bed> {
        let (store, ctx) = self.split();
        operations::finish_cleaning(store, &ctx, bed_id)
    }

    pub fn set_cleaning_priority(&mut self, bed_id: &str, priority: bool) -> CensusResult<Bed> {
        let (store, ctx) = self.split();
        operations::set_cleaning_priority(store, &ctx, bed_id, priority)
    }

    pub fn block_bed(&mut self, bed_id: &str, reason: &str) -> CensusResult<Bed> {
        let (store, ctx) = self.split();
        operations::block_bed(store, &ctx, bed_id, reason)
    }

    pub fn unblock_bed(&mut self, bed_id: &str) -> CensusResult<Bed> {
        let (store, ctx) = self.split();
        operations::unblock_bed(store, &ctx, bed_id)
    }

    pub fn begin_regulation(
        &mut self,
        patient_id: &str,
        destination_bed_id: &str,
    ) -> CensusResult<()> {
        let (store, ctx) = self.split();
        operations::begin_regulation(store, &ctx, patient_id, destination_bed_id)
    }

    pub fn complete_regulation(&mut self, patient_id: &str) -> CensusResult<Patient> {
        let (store, ctx) = self.split();
        operations::complete_regulation(store, &ctx, patient_id)
    }

    pub fn cancel_regulation(&mut self, patient_id: &str) -> CensusResult<()> {
        let (store, ctx) = self.split();
        operations::cancel_regulation(store, &ctx, patient_id)
    }

    pub fn record_isolation(
        &mut self,
        patient_id: &str,
        infection_code: &str,
        status: IsolationStatus,
    ) -> CensusResult<Patient> {
        let (store, ctx) = self.split();
        operations::record_isolation(store, &ctx, patient_id, infection_code, status)
    }

    pub fn clear_isolation(
        &mut self,
        patient_id: &str,
        infection_code: &str,
    ) -> CensusResult<bool> {
        let (store, ctx) = self.split();
        operations::clear_isolation(store, &ctx, patient_id, infection_code)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::bed_state::BedStatus;
    use crate::clock::FixedClock;
    use crate::db::SqliteStore;
    use crate::entities::Sex;
    use crate::layout::read_layout_rows;
    use crate::roster::{normalize_rows, RosterRow};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    const LAYOUT: &str = "sector,sector_type,room,bed,pcp\n\
                          UTI,Icu,,U01,\n\
                          UTI,Icu,,U02,\n\
                          Enfermaria,Ward,B,B2,\n\
                          Enfermaria,Ward,C,C1,\n\
                          Enfermaria,Ward,C,C2,\n";

    fn engine<S: CensusStore>(
        store: S,
    ) -> (CensusEngine<S>, Arc<FixedClock>, Arc<MemoryAuditSink>) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap()));
        let audit = Arc::new(MemoryAuditSink::new());
        let mut engine = CensusEngine::new(store, EngineConfig::default())
            .with_clock(clock.clone())
            .with_audit(audit.clone());
        engine
            .import_layout(&read_layout_rows(LAYOUT.as_bytes()).unwrap())
            .unwrap();
        (engine, clock, audit)
    }

    fn roster(rows: &[(&str, &str, &str)]) -> Vec<RosterEntry> {
        let rows: Vec<RosterRow> = rows
            .iter()
            .map(|(n, s, b)| RosterRow::new(n, s, b))
            .collect();
        normalize_rows(&rows)
    }

    fn bed<S: CensusStore>(engine: &CensusEngine<S>, code: &str) -> Bed {
        engine
            .store()
            .beds()
            .unwrap()
            .into_iter()
            .find(|b| b.code == code)
            .unwrap()
    }

    #[test]
    fn test_unknown_sector_blocks_everything() {
        let (mut engine, _, audit) = engine(MemoryStore::new());
        let before = engine.store().clone();
        let entries = roster(&[("Maria Silva", "UTI", "U01"), ("José", "ANEXO X", "X1")]);

        let outcome = engine.validate(&entries).unwrap();
        let report = outcome.report();
        assert_eq!(report.missing_sectors.iter().collect::<Vec<_>>(), vec!["ANEXO X"]);

        let err = engine.reconcile(&entries).unwrap_err();
        assert!(matches!(err, CensusError::ReferentialGap(_)));
        assert_eq!(engine.store().commit_count(), before.commit_count());
        assert_eq!(engine.store().patients().unwrap(), before.patients().unwrap());
        assert_eq!(engine.store().beds().unwrap(), before.beds().unwrap());
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn test_full_cycle_on_sqlite() {
        let (mut engine, clock, audit) = engine(SqliteStore::open_in_memory().unwrap());

        let first = roster(&[
            ("Maria Silva", "UTI", "U01"),
            ("John Doe", "Enfermaria", "B2"),
            ("Ana", "Enfermaria", "C1"),
        ]);
        let report = engine.reconcile(&first).unwrap();
        assert_eq!(report.counts.admissions, 3);
        assert_eq!(bed(&engine, "U01").status, BedStatus::Occupied);

        clock.advance(Duration::hours(6));
        // John leaves, Ana moves C1 -> C2
        let second = roster(&[("Maria Silva", "UTI", "U01"), ("Ana", "Enfermaria", "C2")]);
        let plan = engine.prepare(&second).unwrap();
        assert_eq!(plan.summary(), "0 admissions, 1 transfers, 1 discharges, 1 unchanged");
        engine.execute(&plan).unwrap();

        assert_eq!(bed(&engine, "B2").status, BedStatus::Cleaning);
        assert_eq!(bed(&engine, "C1").status, BedStatus::Cleaning);
        assert_eq!(bed(&engine, "C2").status, BedStatus::Occupied);
        let ana = engine
            .store()
            .patients()
            .unwrap()
            .into_iter()
            .find(|p| p.normalized_name == "ANA")
            .unwrap();
        assert_eq!(ana.admitted_at, Some(clock.now()));

        // idempotent
        let again = engine.prepare(&second).unwrap();
        assert!(again.is_noop());
        assert_eq!(audit.entries().len(), 2);
    }

    #[test]
    fn test_confirmed_reconcile_refuses_changed_plan() {
        let (mut engine, _, _) = engine(MemoryStore::new());
        let entries = roster(&[("Maria Silva", "UTI", "U01")]);
        let reviewed = engine.prepare(&entries).unwrap();

        // someone admits Maria manually in between
        let u02 = bed(&engine, "U02").id;
        engine.admit_patient(NewPatient::named("Maria Silva"), &u02).unwrap();

        let err = engine
            .reconcile_confirmed(&entries, reviewed.fingerprint())
            .unwrap_err();
        assert!(matches!(err, CensusError::PlanChanged { .. }));
        assert_eq!(bed(&engine, "U01").status, BedStatus::Vacant);

        let fresh = engine.prepare(&entries).unwrap();
        assert_eq!(fresh.counts().transfers, 1);
        engine.reconcile_confirmed(&entries, fresh.fingerprint()).unwrap();
        assert_eq!(bed(&engine, "U01").status, BedStatus::Occupied);
        assert_eq!(bed(&engine, "U02").status, BedStatus::Cleaning);
    }

    #[test]
    fn test_reconcile_settles_pending_move_on_both_beds() {
        let (mut engine, _, _) = engine(SqliteStore::open_in_memory().unwrap());
        let u01 = bed(&engine, "U01").id;
        let u02 = bed(&engine, "U02").id;
        let ana = engine.admit_patient(NewPatient::named("Ana"), &u01).unwrap();
        engine.begin_regulation(&ana.id, &u02).unwrap();

        // the roster gives the reserved bed to someone else
        let entries = roster(&[("Ana", "UTI", "U01"), ("Bia", "UTI", "U02")]);
        engine.reconcile(&entries).unwrap();

        let origin = bed(&engine, "U01");
        assert_eq!(origin.status, BedStatus::Occupied);
        assert!(!origin.regulation.is_pending());
        assert!(!bed(&engine, "U02").regulation.is_pending());

        // no move left to cancel, and the origin bed works normally again
        assert!(engine.cancel_regulation(&ana.id).is_err());
        engine.discharge_patient(&ana.id).unwrap();
        assert_eq!(bed(&engine, "U01").status, BedStatus::Cleaning);
    }

    #[test]
    fn test_bed_map_restrictions_follow_admissions() {
        let (mut engine, _, _) = engine(MemoryStore::new());
        let c1 = bed(&engine, "C1").id;
        let mut new = NewPatient::named("Bia");
        new.sex = Some(Sex::Female);
        let bia = engine.admit_patient(new, &c1).unwrap();
        engine
            .record_isolation(&bia.id, "KPC", IsolationStatus::Confirmed)
            .unwrap();

        let views = engine.bed_map().unwrap();
        let c2 = views.iter().find(|v| v.bed.code == "C2").unwrap();
        let restriction = c2.restriction.as_ref().unwrap();
        assert_eq!(restriction.sex, Some(Sex::Female));
        assert!(restriction.isolation_codes.contains("KPC"));

        // room B is empty
        assert!(views.iter().find(|v| v.bed.code == "B2").unwrap().restriction.is_none());

        engine.discharge_patient(&bia.id).unwrap();
        let views = engine.bed_map().unwrap();
        assert!(views.iter().all(|v| v.restriction.is_none()));
    }

    #[test]
    fn test_summary_and_find_sector() {
        let (mut engine, _, _) = engine(MemoryStore::new());
        let u01 = bed(&engine, "U01").id;
        engine.block_bed(&u01, "ventilator check").unwrap();

        let summary = engine.summary().unwrap();
        assert_eq!(summary.totals.total, 5);
        assert_eq!(summary.totals.blocked, 1);

        assert_eq!(engine.find_sector("uti").unwrap().name, "UTI");
        assert!(matches!(
            engine.find_sector("Anexo X"),
            Err(CensusError::NotFound { .. })
        ));
    }
}
