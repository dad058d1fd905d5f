use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use roadlog_core::commands::{Commands, data_root, ensure_initialized};
use roadlog_core::model::{ArchiveOutcome, Datestamp, MonthlyHistorySummary};
use roadlog_core::utils::geo::mps_to_mph;

#[derive(Parser)]
#[command(name = "roadlog", about = "Trip detection and monthly driving history")]
struct Cli {
    /// Data root (defaults to $ROADLOG_ROOT, then .roadlog)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the data root, database directory and default config
    Init,
    /// Feed a JSONL file of fixes through the trip detector
    Ingest { file: PathBuf },
    /// Turn finished journal segments into trips
    Process,
    /// Archive one trip into its month
    Archive {
        /// Origination timestamp, RFC 3339
        #[arg(long)]
        trip: DateTime<Utc>,
    },
    /// Archive every trip not yet in history
    ArchiveAll,
    /// Show a month's totals rebuilt from its archived trips
    Recompute {
        #[arg(long)]
        month: Datestamp,
    },
    /// Rebuild a month's totals and store them
    Repair {
        #[arg(long)]
        month: Datestamp,
    },
    /// List monthly totals
    History,
    /// Row counts
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = data_root(cli.root.as_deref());

    if let Cmd::Init = cli.cmd {
        let report = ensure_initialized(&root)?;
        println!("data root: {}", report.root.display());
        for c in &report.created {
            println!("  created  {c}");
        }
        for e in &report.existed {
            println!("  exists   {e}");
        }
        return Ok(());
    }

    let commands = Commands::open(&root)?;
    match cli.cmd {
        Cmd::Init => {}
        Cmd::Ingest { file } => {
            let f = File::open(&file).with_context(|| format!("opening {}", file.display()))?;
            let r = commands.ingest_lines(BufReader::new(f))?;
            println!(
                "{} lines ({} malformed), {} fixes, {} rejected, {} persisted, {} failed",
                r.lines, r.malformed, r.received, r.rejected, r.persisted, r.failed
            );
        }
        Cmd::Process => {
            let r = commands.process_journal()?;
            for t in &r.trips {
                println!(
                    "trip {} -> {}  {:.0} m  {:.0} s  max {:.1} mph",
                    t.origination_timestamp.to_rfc3339(),
                    t.destination_timestamp.to_rfc3339(),
                    t.distance,
                    t.duration,
                    mps_to_mph(t.max_speed)
                );
            }
            for n in &r.notes {
                println!("note: {n}");
            }
            println!(
                "{} trips, {} entries discarded, {} pending",
                r.trips.len(),
                r.discarded,
                r.pending
            );
        }
        Cmd::Archive { trip } => match commands.archive_trip(trip)? {
            ArchiveOutcome::Archived => println!("archived {}", trip.to_rfc3339()),
            ArchiveOutcome::AlreadyArchived => {
                println!("{} already archived", trip.to_rfc3339())
            }
        },
        Cmd::ArchiveAll => {
            let r = commands.archive_pending()?;
            for n in &r.notes {
                println!("failed: {n}");
            }
            println!(
                "{} archived, {} already archived, {} failed",
                r.archived, r.already_archived, r.failed
            );
            anyhow::ensure!(r.failed == 0, "{} trips could not be archived", r.failed);
        }
        Cmd::Recompute { month } => print_month(&commands.recompute_month(&month)?),
        Cmd::Repair { month } => print_month(&commands.repair_month(&month)?),
        Cmd::History => {
            let months = commands.history()?;
            if months.is_empty() {
                println!("no history yet");
            }
            for m in &months {
                print_month(m);
            }
        }
        Cmd::Stats => {
            let s = commands.stats()?;
            println!(
                "journal entries:   {} ({} unprocessed)",
                s.journal_entries, s.unprocessed_entries
            );
            println!(
                "trips:             {} ({} not archived)",
                s.trips, s.unarchived_trips
            );
            println!("history months:    {}", s.months);
            println!("archived trips:    {}", s.archived_trips);
        }
    }
    Ok(())
}

fn print_month(m: &MonthlyHistorySummary) {
    println!(
        "{}  trips {}  {:.0} m  {:.0} s  max {:.1} mph  accel {}  decel {}  smooth {:.2}",
        m.datestamp,
        m.total_trips,
        m.total_distance.as_f64(),
        m.total_duration.as_f64(),
        mps_to_mph(m.highest_speed),
        m.total_acceleration.as_f64(),
        m.total_deceleration.as_f64(),
        m.total_smoothness.as_f64()
    );
}
