//! HemoLink CLI - Operator console for the offline core.
//!
//! This tool drives the offline hub end to end: capture emergency
//! requests and delivery dispatches into the local queues, inspect and
//! cancel pending items, sync either queue against an HTTP endpoint (or
//! rehearse without one), and manage the cached facility directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use hemolink_app::{HubConfig, OfflineHub};
use hemolink_common::{Error, QueueKind};
use hemolink_store::{
    DeliveryRecord, EmergencyRequest, Facility, QueueItem, QueueRecord, DEFAULT_MAX_AGE,
};
use hemolink_sync::{StatusSubscription, SyncReport, UploadAck, Uploader};

#[derive(Parser)]
#[command(name = "hemolink")]
#[command(about = "HemoLink - Offline-first emergency blood logistics")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the local store (defaults to the user data directory).
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage queued emergency blood requests.
    #[command(subcommand)]
    Request(RequestCommands),

    /// Manage queued delivery dispatches.
    #[command(subcommand)]
    Delivery(DeliveryCommands),

    /// Upload pending items to the remote service.
    Sync {
        /// Which queue to sync: emergency, delivery or all.
        #[arg(short, long, default_value = "all")]
        queue: String,

        /// Remote endpoint uploads are POSTed to.
        #[arg(short, long)]
        endpoint: Option<Url>,

        /// Skip the network: acknowledge items locally with generated
        /// server ids, as a stand-in service would.
        #[arg(long, conflicts_with = "endpoint")]
        dry_run: bool,
    },

    /// Manage the cached facility directory.
    #[command(subcommand)]
    Facilities(FacilityCommands),

    /// Show queue counts and cache freshness.
    Status,
}

#[derive(Subcommand)]
enum RequestCommands {
    /// Capture a new emergency request in the local queue.
    Add(RequestAddArgs),

    /// List queued requests.
    List {
        /// Include items already confirmed by the remote service.
        #[arg(short, long)]
        all: bool,
    },

    /// Cancel a queued request before it uploads.
    Cancel {
        /// Queue id of the request.
        id: String,
    },
}

#[derive(clap::Args)]
struct RequestAddArgs {
    /// Patient the request is for.
    #[arg(short, long)]
    patient: String,

    /// Hospital the blood must reach.
    #[arg(long)]
    hospital: String,

    /// Blood type code: A+, A-, B+, B-, AB+, AB-, O+ or O-.
    #[arg(short, long)]
    blood_type: String,

    /// Units of blood requested.
    #[arg(short, long, default_value_t = 1)]
    units: u32,

    /// How fast the request must move: routine, urgent or critical.
    #[arg(long, default_value = "urgent")]
    urgency: String,

    /// Callback phone number.
    #[arg(long)]
    phone: Option<String>,

    /// Free-form notes for the blood bank.
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum DeliveryCommands {
    /// Capture a new delivery dispatch in the local queue.
    Add(DeliveryAddArgs),

    /// List queued deliveries.
    List {
        /// Include items already confirmed by the remote service.
        #[arg(short, long)]
        all: bool,
    },

    /// Cancel a queued delivery before it uploads.
    Cancel {
        /// Queue id of the delivery.
        id: String,
    },
}

#[derive(clap::Args)]
struct DeliveryAddArgs {
    /// Blood bank dispatching the units.
    #[arg(long)]
    blood_bank: String,

    /// Hospital the delivery is headed to.
    #[arg(long)]
    hospital: String,

    /// Blood type code: A+, A-, B+, B-, AB+, AB-, O+ or O-.
    #[arg(short, long)]
    blood_type: String,

    /// Units of blood dispatched.
    #[arg(short, long, default_value_t = 1)]
    units: u32,

    /// Courier carrying the delivery.
    #[arg(long)]
    courier: Option<String>,

    /// Server id of the request this delivery fulfils.
    #[arg(long)]
    request: Option<String>,
}

#[derive(Subcommand)]
enum FacilityCommands {
    /// Load facility listings from a JSON file into the cache.
    Import {
        /// File holding a JSON array of facilities.
        file: PathBuf,
    },

    /// List cached facilities and the cache's freshness.
    List,

    /// Drop listings older than the retention window.
    Cleanup {
        /// Retention window in hours.
        #[arg(long, default_value_t = DEFAULT_MAX_AGE.as_secs() / 3600)]
        max_age_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let hub = OfflineHub::new(HubConfig::new(resolve_db_path(cli.db)?));

    match cli.command {
        Commands::Request(command) => match command {
            RequestCommands::Add(args) => cmd_request_add(&hub, args).await,
            RequestCommands::List { all } => cmd_request_list(&hub, all).await,
            RequestCommands::Cancel { id } => cmd_cancel::<EmergencyRequest>(&hub, &id).await,
        },

        Commands::Delivery(command) => match command {
            DeliveryCommands::Add(args) => cmd_delivery_add(&hub, args).await,
            DeliveryCommands::List { all } => cmd_delivery_list(&hub, all).await,
            DeliveryCommands::Cancel { id } => cmd_cancel::<DeliveryRecord>(&hub, &id).await,
        },

        Commands::Sync {
            queue,
            endpoint,
            dry_run,
        } => cmd_sync(&hub, &queue, endpoint, dry_run).await,

        Commands::Facilities(command) => match command {
            FacilityCommands::Import { file } => cmd_facilities_import(&hub, &file).await,
            FacilityCommands::List => cmd_facilities_list(&hub).await,
            FacilityCommands::Cleanup { max_age_hours } => {
                cmd_facilities_cleanup(&hub, max_age_hours).await
            }
        },

        Commands::Status => cmd_status(&hub).await,
    }
}

/// Pick the store location: an explicit `--db`, or the platform's local
/// data directory.
fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let base = dirs::data_local_dir()
        .context("No local data directory on this platform; pass --db")?;
    Ok(base.join("hemolink").join("hemolink.db"))
}

/// Capture an emergency request.
async fn cmd_request_add(hub: &OfflineHub, args: RequestAddArgs) -> Result<()> {
    let record = EmergencyRequest {
        patient_name: args.patient,
        hospital: args.hospital,
        blood_type: args.blood_type.parse().context("Invalid blood type")?,
        units: args.units,
        urgency: args.urgency.parse().context("Invalid urgency")?,
        contact_phone: args.phone,
        notes: args.notes,
    };

    let id = hub.enqueue(&record).await;
    println!("Request queued: {}", id);
    println!("  Run `hemolink sync` once online to upload it.");
    Ok(())
}

/// Capture a delivery dispatch.
async fn cmd_delivery_add(hub: &OfflineHub, args: DeliveryAddArgs) -> Result<()> {
    let record = DeliveryRecord {
        request_ref: args.request,
        blood_bank: args.blood_bank,
        hospital: args.hospital,
        blood_type: args.blood_type.parse().context("Invalid blood type")?,
        units: args.units,
        courier: args.courier,
        dispatched_at: Utc::now(),
    };

    let id = hub.enqueue(&record).await;
    println!("Delivery queued: {}", id);
    Ok(())
}

/// List queued emergency requests.
async fn cmd_request_list(hub: &OfflineHub, all: bool) -> Result<()> {
    let items = if all {
        hub.list_all::<EmergencyRequest>().await?
    } else {
        hub.list_pending::<EmergencyRequest>().await?
    };

    if items.is_empty() {
        println!("No {} requests.", if all { "queued" } else { "pending" });
        return Ok(());
    }

    for item in items {
        let r = &item.record;
        println!(
            "{} [{}] {} {}u for {} at {} ({}, captured {})",
            item.id,
            item.state,
            r.blood_type,
            r.units,
            r.patient_name,
            r.hospital,
            r.urgency,
            item.created_at.format("%Y-%m-%d %H:%M"),
        );
        print_sync_error(&item.sync_error);
    }
    Ok(())
}

/// List queued delivery dispatches.
async fn cmd_delivery_list(hub: &OfflineHub, all: bool) -> Result<()> {
    let items = if all {
        hub.list_all::<DeliveryRecord>().await?
    } else {
        hub.list_pending::<DeliveryRecord>().await?
    };

    if items.is_empty() {
        println!("No {} deliveries.", if all { "queued" } else { "pending" });
        return Ok(());
    }

    for item in items {
        let r = &item.record;
        let courier = r.courier.as_deref().unwrap_or("unassigned");
        println!(
            "{} [{}] {} {}u {} -> {} (courier: {}, dispatched {})",
            item.id,
            item.state,
            r.blood_type,
            r.units,
            r.blood_bank,
            r.hospital,
            courier,
            r.dispatched_at.format("%Y-%m-%d %H:%M"),
        );
        print_sync_error(&item.sync_error);
    }
    Ok(())
}

fn print_sync_error(sync_error: &Option<String>) {
    if let Some(message) = sync_error {
        println!("    last attempt failed: {}", message);
    }
}

/// Cancel one queued item.
async fn cmd_cancel<R: QueueRecord>(hub: &OfflineHub, id: &str) -> Result<()> {
    hub.cancel::<R>(id)
        .await
        .with_context(|| format!("Failed to cancel {}", id))?;
    println!("Cancelled {}.", id);
    Ok(())
}

/// Sync one or both queues.
async fn cmd_sync(
    hub: &OfflineHub,
    queue: &str,
    endpoint: Option<Url>,
    dry_run: bool,
) -> Result<()> {
    let kinds: Vec<QueueKind> = match queue {
        "all" => vec![QueueKind::Emergency, QueueKind::Delivery],
        other => vec![other.parse()?],
    };

    if endpoint.is_none() && !dry_run {
        anyhow::bail!("Pass --endpoint URL, or --dry-run to rehearse without a service");
    }

    // Mirror what an embedding UI would do with the status channel.
    let _subscriptions: Vec<StatusSubscription> = kinds
        .iter()
        .map(|&kind| {
            hub.subscribe_status(kind, move |status| info!("{}: status {}", kind, status))
        })
        .collect();

    for kind in kinds {
        let report = match kind {
            QueueKind::Emergency => {
                run_one::<EmergencyRequest>(hub, endpoint.as_ref(), dry_run).await?
            }
            QueueKind::Delivery => {
                run_one::<DeliveryRecord>(hub, endpoint.as_ref(), dry_run).await?
            }
        };
        println!("{}: {} synced, {} failed", kind, report.synced, report.failed);
    }
    Ok(())
}

async fn run_one<R: QueueRecord>(
    hub: &OfflineHub,
    endpoint: Option<&Url>,
    dry_run: bool,
) -> Result<SyncReport> {
    let report = if dry_run {
        hub.run_sync::<R>(&DryRunUploader).await?
    } else if let Some(endpoint) = endpoint {
        let uploader = HttpUploader::new(endpoint.clone())?;
        hub.run_sync::<R>(&uploader).await?
    } else {
        unreachable!("caller checked for an endpoint");
    };
    Ok(report)
}

/// Load facility listings from a JSON file.
async fn cmd_facilities_import(hub: &OfflineHub, file: &PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let facilities: Vec<Facility> =
        serde_json::from_str(&raw).context("Expected a JSON array of facilities")?;

    hub.cache_facilities(&facilities).await?;
    println!("Cached {} facilities.", facilities.len());
    Ok(())
}

/// Show the cached facility directory.
async fn cmd_facilities_list(hub: &OfflineHub) -> Result<()> {
    print_cache_freshness(hub).await?;

    let cached = hub.cached_facilities().await?;
    if cached.is_empty() {
        println!("No cached facilities.");
        return Ok(());
    }

    for entry in cached {
        let f = &entry.facility;
        let distance = f
            .distance_km
            .map(|km| format!(", {:.1} km", km))
            .unwrap_or_default();
        println!(
            "  {} ({}) - {}{}, phone: {}",
            f.name,
            f.kind.as_str(),
            f.city,
            distance,
            f.phone.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Sweep expired facility listings.
async fn cmd_facilities_cleanup(hub: &OfflineHub, max_age_hours: u64) -> Result<()> {
    let dropped = hub
        .cleanup_facility_cache(Duration::from_secs(max_age_hours * 3600))
        .await?;
    println!("Dropped {} expired listings.", dropped);
    Ok(())
}

/// Show per-queue counts and cache freshness.
async fn cmd_status(hub: &OfflineHub) -> Result<()> {
    println!("Queues:");
    for kind in [QueueKind::Emergency, QueueKind::Delivery] {
        let counts = hub.queue_counts(kind).await?;
        println!(
            "  {:<9} {} pending / {} failed ({} synced)",
            kind, counts.pending, counts.failed, counts.synced
        );
    }
    print_cache_freshness(hub).await
}

async fn print_cache_freshness(hub: &OfflineHub) -> Result<()> {
    let cache = hub.facility_sync_status().await?;
    match cache.last_sync {
        Some(at) => println!(
            "Facility cache: refreshed {}{}",
            at.format("%Y-%m-%d %H:%M UTC"),
            if cache.is_stale { " (stale)" } else { "" }
        ),
        None => println!("Facility cache: never refreshed"),
    }
    Ok(())
}

/// Upload body POSTed for each queue item.
#[derive(Serialize)]
struct UploadBody<'a, R> {
    client_ref: &'a str,
    created_at: DateTime<Utc>,
    record: &'a R,
}

/// Acknowledgement returned by the coordination service.
#[derive(Deserialize)]
struct UploadResponse {
    /// Canonical id the service filed the write under, when it assigned one.
    #[serde(default)]
    id: Option<String>,
}

/// Uploads queue items to the remote coordination service.
///
/// One POST per item to `{endpoint}/{queue}`, carrying the client id and
/// the captured payload. The service answers with the canonical id it
/// filed the write under, and the queue reconciles to it.
struct HttpUploader {
    http: Client,
    endpoint: Url,
}

impl HttpUploader {
    fn new(endpoint: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("HemoLink/0.1")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl<R: QueueRecord> Uploader<R> for HttpUploader {
    async fn upload(&self, item: &QueueItem<R>) -> hemolink_common::Result<UploadAck> {
        let url = self
            .endpoint
            .join(R::QUEUE.as_str())
            .map_err(|e| Error::Upload(format!("Bad endpoint: {}", e)))?;

        let body = UploadBody {
            client_ref: &item.id,
            created_at: item.created_at,
            record: &item.record,
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upload(format!("Failed to reach service: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("Service error: {} - {}", status, body)));
        }

        let ack: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("Failed to parse response: {}", e)))?;

        Ok(UploadAck {
            server_id: ack.id,
        })
    }
}

/// Stands in for the remote service: logs each item and acknowledges it
/// with a generated id, so the whole sync path (reconciliation included)
/// can be exercised with no service at hand.
struct DryRunUploader;

#[async_trait]
impl<R: QueueRecord> Uploader<R> for DryRunUploader {
    async fn upload(&self, item: &QueueItem<R>) -> hemolink_common::Result<UploadAck> {
        let server_id = format!("srv-{}", uuid::Uuid::new_v4());
        info!("{}: acknowledging {} as {}", R::QUEUE, item.id, server_id);
        Ok(UploadAck::with_server_id(server_id))
    }
}
