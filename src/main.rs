use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use guest_match::config::ClientConfig;
use guest_match::models::job::{EventToken, MatchState};
use guest_match::models::payload::{ImageSource, PickedFile};
use guest_match::services::api_client::FaceApiClient;
use guest_match::services::capture::SelfieCapture;
use guest_match::services::downloads;
use guest_match::services::orchestrator::MatchOrchestrator;

/// Find your photos from an event with a selfie
#[derive(Parser, Debug)]
#[command(name = "guest-match")]
#[command(version)]
struct Args {
    /// Selfie image to match
    selfie: PathBuf,

    /// Event token
    #[arg(short, long, required_unless_present = "guest_link")]
    event: Option<String>,

    /// Guest join link (`https://host/guest/<token>`), instead of --event
    #[arg(long, conflicts_with = "event")]
    guest_link: Option<String>,

    /// Download matched photos into this directory
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env().expect("Failed to load configuration from environment");

    describe_metrics();

    let event = match (&args.event, &args.guest_link) {
        (Some(token), _) => EventToken::new(token.as_str()),
        (None, Some(link)) => EventToken::from_guest_path(link),
        (None, None) => EventToken::new(""),
    };
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Invalid event");
            return ExitCode::FAILURE;
        }
    };

    let bytes = match tokio::fs::read(&args.selfie).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(path = %args.selfie.display(), error = %e, "Failed to read selfie");
            return ExitCode::FAILURE;
        }
    };
    let file_name = args
        .selfie
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "selfie".to_string());

    let mut capture = SelfieCapture::new(config.max_upload_mib);
    let payload = match capture.acquire(ImageSource::File(PickedFile {
        file_name,
        content_type: None,
        bytes,
    })) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Selfie rejected");
            return ExitCode::FAILURE;
        }
    };

    let client = Arc::new(FaceApiClient::new(&config).expect("Failed to initialize API client"));
    let mut orchestrator = MatchOrchestrator::new(client.clone(), config.orchestrator_config());

    let mut updates = orchestrator.subscribe();
    let progress = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            tracing::info!(
                state = %snapshot.state,
                progress = snapshot.progress_percent,
                step = ?snapshot.step,
                "{}",
                snapshot.headline()
            );
        }
    });

    tracing::info!(event = %event, "Looking for matching photos");
    let state = orchestrator.find_matches(payload, event).await;
    progress.abort();

    let Some(job) = orchestrator.job() else {
        return ExitCode::FAILURE;
    };

    let summary = serde_json::json!({
        "state": state,
        "job_id": job.id(),
        "headline": orchestrator.snapshot().headline(),
        "matches": job.matches(),
        "bulk_download_url": client.bulk_download_url(job),
        "failure": job.failure(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => tracing::error!(error = %e, "Failed to render result"),
    }

    if state != MatchState::Complete {
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.out {
        let report = downloads::save_all(&client, job.matches(), dir).await;
        if !report.is_complete() {
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn describe_metrics() {
    metrics::describe_counter!(
        "guest_match_jobs_submitted_total",
        "Total selfies submitted for matching"
    );
    metrics::describe_counter!(
        "guest_match_jobs_completed_total",
        "Total match jobs that reached a result"
    );
    metrics::describe_counter!(
        "guest_match_jobs_failed_total",
        "Total match jobs that ended in an error"
    );
    metrics::describe_counter!(
        "guest_match_channel_wins_total",
        "Terminal results delivered first, by channel"
    );
    metrics::describe_histogram!(
        "guest_match_job_duration_seconds",
        "Time from selfie submission to a terminal state"
    );
}
