use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod completion;
mod db;
mod dispatch;
mod eligibility;
mod ledger;
mod mailer;
mod message;
mod models;
mod score;

use dispatch::{DispatchSettings, Dispatcher};
use ledger::PgLedger;
use mailer::{MailConfig, SmtpMailer};
use score::ScoringPolicy;

#[derive(Parser)]
#[command(name = "attendance-reminders")]
#[command(about = "Attendance scoring and reminder dispatch for QR check-in sessions", long_about = None)]
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
    /// Import check-in events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print cumulative standings for a course, lowest attendance first
    Score {
        #[arg(long)]
        course: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        single_window_full_credit: bool,
    },
    /// Evaluate recently completed occurrences and send reminder emails
    Run {
        #[arg(long, default_value_t = 30)]
        lookback_minutes: i64,
        #[arg(long)]
        retry_failed: bool,
        #[arg(long, default_value_t = 4)]
        max_in_flight: usize,
        #[arg(long, default_value_t = 10)]
        send_timeout_secs: u64,
        #[arg(long)]
        single_window_full_credit: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_reminders=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the attendance Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let (inserted, skipped) = db::import_checkins_csv(&pool, &csv).await?;
            println!(
                "Inserted {inserted} check-ins from {} ({skipped} rows skipped).",
                csv.display()
            );
        }
        Commands::Score {
            course,
            email,
            limit,
            single_window_full_credit,
        } => {
            let policy = ScoringPolicy {
                single_window_full_credit,
            };
            let course = db::fetch_course_by_code(&pool, &course).await?;
            let threshold = course.required_threshold.with_context(|| {
                format!("course {} has no attendance threshold configured", course.code)
            })?;

            let now = Utc::now();
            let roster = db::fetch_roster(&pool, course.id).await?;
            let closed = db::fetch_closed_occurrences(&pool, course.id, now).await?;
            let closed_ids: Vec<Uuid> = closed.iter().map(|record| record.id).collect();
            let checkins = db::fetch_checkins(&pool, &closed_ids).await?;

            let mut standings =
                eligibility::course_standings(policy, &course, threshold, &closed, &roster, &checkins);
            if let Some(email) = email {
                standings.retain(|standing| standing.student_email == email);
            }
            standings.sort_by(|a, b| {
                a.cumulative_percentage
                    .partial_cmp(&b.cumulative_percentage)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            if standings.is_empty() {
                println!("No enrolled students match.");
                return Ok(());
            }

            println!(
                "Standings for {} {} ({} closed occurrences):",
                course.code,
                course.name,
                closed.len()
            );
            for standing in standings.iter().take(limit) {
                println!(
                    "- {} ({}) {:.1}% across {} closed sessions, {} full absences to spare{}",
                    standing.student_name,
                    standing.student_email,
                    standing.cumulative_percentage,
                    standing.closed_occurrences,
                    standing.classes_remaining,
                    if standing.is_low_attendance {
                        " [LOW]"
                    } else {
                        ""
                    }
                );
            }
        }
        Commands::Run {
            lookback_minutes,
            retry_failed,
            max_in_flight,
            send_timeout_secs,
            single_window_full_credit,
        } => {
            let mail_config = MailConfig::from_env()
                .context("SMTP_HOST must be set to send reminder emails")?;
            let mailer = SmtpMailer::new(&mail_config)?;
            let settings = DispatchSettings {
                retry_failed,
                max_in_flight,
                send_timeout: Duration::from_secs(send_timeout_secs),
                scoring: ScoringPolicy {
                    single_window_full_credit,
                },
            };
            let dispatcher = Dispatcher::new(mailer, PgLedger::new(pool.clone()), settings);

            let report = dispatcher.run(&pool, lookback_minutes).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
