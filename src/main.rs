use anyhow::{bail, Context, Result};
use bed_census::layout::read_layout_rows;
use bed_census::{
    load_roster_csv, BedStatus, CensusEngine, CensusError, EngineConfig, ReconciliationPlan,
    SqliteAuditSink, SqliteStore, ValidationOutcome,
};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bed-census", version, about = "Hospital bed census reconciliation")]
struct Cli {
    /// Configuration file (defaults to bed-census.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the census database
    Init,
    /// Provision sectors, rooms and beds from a layout CSV
    ImportLayout { csv: PathBuf },
    /// Create rooms for a sector from bed-code prefixes
    BackfillRooms { sector: String },
    /// Check that every roster sector/bed exists
    Validate { roster: PathBuf },
    /// Plan and (after confirmation) apply a roster
    Reconcile {
        roster: PathBuf,
        /// Apply without asking
        #[arg(long)]
        yes: bool,
    },
    /// Bed map with room restrictions
    Beds {
        #[arg(long)]
        sector: Option<String>,
    },
    /// Counts per sector
    Summary,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_engine(config: EngineConfig) -> Result<CensusEngine<SqliteStore>> {
    let store = SqliteStore::open(&config.database_path)?;
    let audit = SqliteAuditSink::open(&config.database_path)?;
    Ok(CensusEngine::new(store, config).with_audit(Arc::new(audit)))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init => run_init(config),
        Command::ImportLayout { csv } => run_import_layout(config, &csv),
        Command::BackfillRooms { sector } => run_backfill(config, &sector),
        Command::Validate { roster } => run_validate(config, &roster),
        Command::Reconcile { roster, yes } => run_reconcile(config, &roster, yes),
        Command::Beds { sector } => run_beds(config, sector.as_deref()),
        Command::Summary => run_summary(config),
    }
}

fn run_init(config: EngineConfig) -> Result<()> {
    println!("🗄️  Bed Census - database setup");
    let path = config.database_path.clone();
    let engine = open_engine(config)?;
    let snapshot = engine.snapshot()?;
    println!("✓ Database ready at {} (WAL mode)", path.display());
    println!(
        "✓ {} sectors, {} beds, {} patients",
        snapshot.sectors.len(),
        snapshot.beds.len(),
        snapshot.patients.len()
    );
    Ok(())
}

fn run_import_layout(config: EngineConfig, csv: &Path) -> Result<()> {
    let file = std::fs::File::open(csv)
        .with_context(|| format!("Failed to open layout {}", csv.display()))?;
    let rows = read_layout_rows(file)?;

    let mut engine = open_engine(config)?;
    let report = engine.import_layout(&rows)?;
    println!("✓ Sectors created: {}", report.sectors_created);
    println!("✓ Rooms created:   {}", report.rooms_created);
    println!("✓ Beds created:    {}", report.beds_created);
    if report.beds_skipped > 0 {
        println!("  (already present: {})", report.beds_skipped);
    }
    Ok(())
}

fn run_backfill(config: EngineConfig, sector_name: &str) -> Result<()> {
    let mut engine = open_engine(config)?;
    let sector = engine.find_sector(sector_name)?;
    let rooms = engine.backfill_rooms(&sector.id)?;

    if rooms.is_empty() {
        println!("✓ Every bed in {} already has a room", sector.name);
    }
    for room in rooms {
        println!("✓ Room {} ({} beds)", room.name, room.bed_ids.len());
    }
    Ok(())
}

fn print_gaps(outcome: &ValidationOutcome) {
    let report = outcome.report();
    for sector in &report.missing_sectors {
        println!("❌ Unknown sector: {}", sector);
    }
    for (sector, codes) in &report.missing_beds_by_sector {
        let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
        println!("❌ Unknown beds in {}: {}", sector, codes.join(", "));
    }
}

fn run_validate(config: EngineConfig, roster: &Path) -> Result<()> {
    let entries = load_roster_csv(roster)?;
    let engine = open_engine(config)?;
    let outcome = engine.validate(&entries)?;

    if outcome.is_valid() {
        println!("✅ {} roster entries resolve against the census", entries.len());
        return Ok(());
    }
    print_gaps(&outcome);
    bail!("roster references unknown sectors or beds");
}

fn print_plan(plan: &ReconciliationPlan) {
    println!("\n📋 Reconciliation plan: {}", plan.summary());
    for patient in plan.discharges() {
        println!("  - discharge {}", patient.name);
    }
    for transfer in plan.transfers() {
        println!("  ~ transfer  {} -> {}", transfer.patient.name, transfer.entry.bed_code);
    }
    for admission in plan.admissions() {
        println!("  + admit     {} -> {}", admission.entry.name, admission.entry.bed_code);
    }
    println!("  fingerprint {}", plan.fingerprint());
}

fn confirm() -> Result<bool> {
    print!("\nApply this plan? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "s" | "sim"))
}

fn run_reconcile(config: EngineConfig, roster: &Path, yes: bool) -> Result<()> {
    let entries = load_roster_csv(roster)?;
    let mut engine = open_engine(config)?;

    let plan = match engine.prepare(&entries) {
        Ok(plan) => plan,
        Err(CensusError::ReferentialGap(report)) => {
            print_gaps(&ValidationOutcome::Invalid(report));
            bail!("nothing applied: fix the layout and validate again");
        }
        Err(e) => return Err(e.into()),
    };

    print_plan(&plan);
    if plan.is_noop() {
        println!("\n✓ Census already matches the roster");
        return Ok(());
    }
    if !yes && !confirm()? {
        println!("Discarded, nothing written.");
        return Ok(());
    }

    let report = engine.execute(&plan)?;
    println!("\n✅ {}", report.summary());
    Ok(())
}

fn run_beds(config: EngineConfig, sector: Option<&str>) -> Result<()> {
    let engine = open_engine(config)?;
    let views = engine.bed_map()?;
    let filter = sector.map(bed_census::normalize::normalize_name);

    for view in views {
        if let Some(filter) = &filter {
            if bed_census::normalize::normalize_name(&view.sector_name) != *filter {
                continue;
            }
        }

        let occupant = view.patient.as_ref().map(|p| p.name.as_str()).unwrap_or("");
        let minutes = view
            .minutes_in_status
            .map(|m| format!("{}h{:02}", m / 60, m % 60))
            .unwrap_or_default();
        let restriction = view
            .restriction
            .as_ref()
            .map(|r| {
                let sex = r.sex.map(|s| s.as_str()).unwrap_or("-");
                let codes: Vec<&str> = r.isolation_codes.iter().map(String::as_str).collect();
                format!("[{} {}]", sex, codes.join(","))
            })
            .unwrap_or_default();
        let marker = if view.bed.status == BedStatus::Cleaning && view.bed.cleaning_priority {
            "!"
        } else {
            ""
        };

        println!(
            "{:<16} {:<8} {:<22}{:1} {:>7}  {:<28} {}",
            view.sector_name,
            view.bed.code,
            view.bed.status.as_str(),
            marker,
            minutes,
            occupant,
            restriction
        );
    }
    Ok(())
}

fn run_summary(config: EngineConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let summary = engine.summary()?;

    println!("📊 Census summary");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for sector in &summary.sectors {
        println!(
            "{:<20} {:>3} beds  {:>3} occupied  {:>3} cleaning  {:>3} blocked  {:>5.1}%",
            sector.sector_name,
            sector.beds.total,
            sector.beds.occupied,
            sector.beds.count(BedStatus::Cleaning),
            sector.beds.blocked,
            sector.beds.occupancy_rate * 100.0
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{:<20} {:>3} beds  {:>3} occupied  {} patients, {} pending moves",
        "TOTAL",
        summary.totals.total,
        summary.totals.occupied,
        summary.patients,
        summary.pending_regulations
    );
    Ok(())
}
