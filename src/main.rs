use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::EnvFilter;

mod batches;
mod db;
mod error;
mod models;
mod normalize;
mod percentage;
mod report;
mod roster;

use batches::{BatchAction, BatchPlan};
use normalize::GroupBy;

#[derive(Parser)]
#[command(name = "attendance-desk")]
#[command(about = "Attendance percentages, lab batches and combined rosters for a school", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import attendance events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute attendance from a JSON export of one student's events
    Tally {
        #[arg(long)]
        events: PathBuf,
        #[arg(long, value_enum, default_value_t = GroupBy::Id)]
        group_by: GroupBy,
    },
    /// Merge regular and day-to-day roster JSON exports
    MergeRoster {
        #[arg(long)]
        regular: PathBuf,
        #[arg(long)]
        day_to_day: PathBuf,
    },
    /// Show per-subject and overall attendance for one student
    Attendance {
        #[arg(long)]
        student: String,
        #[arg(long, value_enum, default_value_t = GroupBy::Id)]
        group_by: GroupBy,
    },
    /// List regular and day-to-day students of a class together
    Roster {
        #[arg(long)]
        class: String,
    },
    /// Edit and save lab batches for a subject
    Batches {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        class: String,
        /// Number of batches; defaults to what is already saved
        #[arg(long)]
        count: Option<i64>,
        /// Toggle students in a batch, e.g. `2:stu-001,stu-002`
        #[arg(long)]
        assign: Vec<String>,
        /// Print the result without saving it
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a markdown attendance report for a class
    Report {
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = GroupBy::Id)]
        group_by: GroupBy,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tally { events, group_by } => {
            let payload = read_json(&events)?;
            let events = normalize::events_from_value(&payload);
            let tallies = normalize::tally_by_subject(&events, group_by);
            let summary = serde_json::json!({
                "subjects": percentage::subject_breakdown(&tallies),
                "overall": percentage::overall_percentage(&tallies),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::MergeRoster {
            regular,
            day_to_day,
        } => {
            let regular = read_json(&regular)?;
            let day_to_day = read_json(&day_to_day)?;
            let students = roster::merge_values(&regular, &day_to_day);
            println!("{}", serde_json::to_string_pretty(&students)?);
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv)
                .await
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("Inserted {inserted} attendance events from {}.", csv.display());
        }
        Commands::Attendance { student, group_by } => {
            let pool = connect().await?;
            let events = db::fetch_attendance(&pool, &student).await?;
            let tallies = normalize::tally_by_subject(&events, group_by);

            if tallies.is_empty() {
                println!("No attendance recorded for {student}.");
                return Ok(());
            }

            println!("Attendance for {student}:");
            for subject in percentage::subject_breakdown(&tallies) {
                println!(
                    "- {}: {} ({} of {} sessions)",
                    subject.subject_name,
                    subject.percentage,
                    subject.present_count,
                    subject.sessions_defined
                );
            }
            println!("Overall: {}", percentage::overall_percentage(&tallies));
        }
        Commands::Roster { class } => {
            let pool = connect().await?;
            let (regular, day_to_day) = db::fetch_roster(&pool, &class).await?;
            let collisions = roster::find_id_collisions(&regular, &day_to_day);
            let students = roster::merge(regular, day_to_day);

            if students.is_empty() {
                println!("No students found for {class}.");
                return Ok(());
            }

            for student in &students {
                println!(
                    "- {} ({}, roll {}) {}",
                    student.name,
                    student.id,
                    student.roll_num,
                    student.origin.label()
                );
            }
            for id in collisions {
                println!("Warning: {id} is on both the regular and day-to-day roster.");
            }
        }
        Commands::Batches {
            subject,
            class,
            count,
            assign,
            dry_run,
        } => {
            let pool = connect().await?;
            let saved = db::fetch_batches(&pool, &subject).await?;
            let mut plan = BatchPlan::from_assignments(&saved);
            if let Some(count) = count {
                plan = batches::apply_action(plan, BatchAction::SetBatchCount(count));
            }
            for spec in &assign {
                for action in parse_assignment(spec, plan.batch_count())? {
                    plan = batches::apply_action(plan, action);
                }
            }

            let (regular, day_to_day) = db::fetch_roster(&pool, &class).await?;
            let roster_ids: Vec<String> = roster::merge(regular, day_to_day)
                .into_iter()
                .map(|student| student.id)
                .collect();

            let warnings = if dry_run {
                batches::validate(&plan, &roster_ids)
            } else {
                let sink = db::PgBatchSink { pool: &pool };
                batches::commit(&plan, &subject, &roster_ids, &sink)
                    .await
                    .with_context(|| format!("failed to save batches for {subject}"))?
                    .warnings
            };

            for batch in plan.snapshot() {
                println!("{}: {}", batch.batch_name, batch.students.join(", "));
            }
            for warning in &warnings {
                println!("Warning: {warning}");
            }
            if !dry_run {
                println!("Saved {} batches for {subject}.", plan.batch_count());
            }
        }
        Commands::Report {
            class,
            out,
            group_by,
        } => {
            let pool = connect().await?;
            let (regular, day_to_day) = db::fetch_roster(&pool, &class).await?;
            let students = roster::merge(regular, day_to_day);

            let mut attendance = HashMap::new();
            for student in &students {
                let events = db::fetch_attendance(&pool, &student.id).await?;
                attendance.insert(student.id.clone(), events);
            }

            let report = report::build_report(&class, &students, &attendance, group_by);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the attendance Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_json(path: &std::path::Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

// Turns `N:id,id` into a move to batch N followed by one toggle per id.
fn parse_assignment(spec: &str, batch_count: usize) -> anyhow::Result<Vec<BatchAction>> {
    let Some((batch, ids)) = spec.split_once(':') else {
        bail!("assignment `{spec}` must look like BATCH:ID[,ID...]");
    };
    let batch: usize = batch
        .trim()
        .parse()
        .with_context(|| format!("batch number in `{spec}` must be a positive integer"))?;
    if batch == 0 || batch > batch_count {
        bail!("batch {batch} is outside 1..={batch_count}");
    }

    let mut actions = vec![BatchAction::SetCurrentBatch(batch - 1)];
    actions.extend(
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| BatchAction::ToggleStudent(id.to_string())),
    );
    Ok(actions)
}
