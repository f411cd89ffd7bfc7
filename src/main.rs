//! hostel-sync - Local-first complaint and feedback outbox
//!
//! Complaints and feedback are saved locally first, pushed to the portal's
//! endpoints, and retried from a pending queue until they are delivered.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

mod api;
mod commands;
mod config;
mod db;
mod error;
mod models;
mod outbox;
mod store;
mod sync;

use config::Config;
use models::{Collection, ComplaintDraft, FeedbackDraft, FeedbackType};

#[derive(Parser)]
#[command(name = "hostel-sync")]
#[command(about = "Local-first complaint and feedback outbox for the residence portal")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// File, edit and review complaints
    Complaint {
        #[command(subcommand)]
        action: ComplaintAction,
    },

    /// Give, edit and review feedback
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },

    /// Show or override the delivery endpoints
    Endpoint {
        #[command(subcommand)]
        action: EndpointAction,
    },

    /// Retry every pending record once
    Flush,

    /// Retry pending records now and then periodically until interrupted
    Run,

    /// Start the reference receiver for delivered records
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand)]
enum ComplaintAction {
    /// File a new complaint
    Add(ComplaintFields),

    /// Change fields of an existing complaint and resend it
    Edit {
        id: i64,
        #[command(flatten)]
        fields: ComplaintFields,
    },

    /// Delete a complaint and cancel its pending delivery
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List complaints, newest first
    List {
        /// Only show complaints whose name contains this text
        #[arg(short, long)]
        name: Option<String>,

        /// Only show entries still waiting for delivery
        #[arg(long)]
        pending: bool,
    },

    /// Delete all complaints
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
struct ComplaintFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    urgency: Option<String>,
    /// Severity from 1 (minor) to 5 (severe)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    severity: Option<u8>,
}

impl ComplaintFields {
    fn apply(self, draft: &mut ComplaintDraft) {
        if let Some(name) = self.name {
            draft.name = name;
        }
        if let Some(category) = self.category {
            draft.category = category;
        }
        if let Some(room) = self.room {
            draft.room = room;
        }
        if let Some(description) = self.description {
            draft.description = description;
        }
        if self.urgency.is_some() {
            draft.urgency = self.urgency;
        }
        if self.severity.is_some() {
            draft.severity = self.severity;
        }
    }
}

#[derive(Subcommand)]
enum FeedbackAction {
    /// Give new feedback
    Add(FeedbackFields),

    /// Change fields of existing feedback and resend it
    Edit {
        id: i64,
        #[command(flatten)]
        fields: FeedbackFields,
    },

    /// Delete feedback and cancel its pending delivery
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List feedback, newest first
    List {
        /// Only show feedback whose name contains this text
        #[arg(short, long)]
        name: Option<String>,

        /// Only show entries still waiting for delivery
        #[arg(long)]
        pending: bool,
    },

    /// Delete all feedback
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
struct FeedbackFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    room: Option<String>,
    #[arg(long = "type", value_enum)]
    kind: Option<FeedbackType>,
    #[arg(long)]
    comments: Option<String>,
    /// Facilities rating, 1-5
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    facilities: Option<u8>,
    /// Food rating, 1-5
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    food: Option<u8>,
    /// Cleanliness rating, 1-5
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    clean: Option<u8>,
}

impl FeedbackFields {
    fn apply(self, draft: &mut FeedbackDraft) {
        if let Some(name) = self.name {
            draft.name = name;
        }
        if let Some(room) = self.room {
            draft.room = room;
        }
        if let Some(kind) = self.kind {
            draft.kind = kind;
        }
        if let Some(comments) = self.comments {
            draft.comments = comments;
        }
        if self.facilities.is_some() {
            draft.ratings.facilities = self.facilities;
        }
        if self.food.is_some() {
            draft.ratings.food = self.food;
        }
        if self.clean.is_some() {
            draft.ratings.clean = self.clean;
        }
    }
}

#[derive(Subcommand)]
enum EndpointAction {
    /// Print the endpoint each collection delivers to
    Show,

    /// Override the endpoint of a collection
    Set {
        #[arg(value_enum)]
        collection: Collection,
        /// Absolute URL, or a path resolved against remote.base_url
        url: String,
    },

    /// Return a collection to its default endpoint
    Reset {
        #[arg(value_enum)]
        collection: Collection,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hostel_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            let cfg = Config::default();
            cfg.save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Point remote.base_url at the portal server");
            println!(
                "  2. File a complaint: hostel-sync complaint add --room B-204 --category plumbing --description leak"
            );
            println!("  3. Keep retrying in the background: hostel-sync run");

            Ok(())
        }

        Commands::Complaint { action } => {
            let portal = commands::Portal::open(&load_config(config_path.as_deref())?)?;
            let outbox = &portal.complaints;
            match action {
                ComplaintAction::Add(fields) => {
                    let mut draft = ComplaintDraft::default();
                    fields.apply(&mut draft);
                    commands::submit(outbox, draft).await
                }
                ComplaintAction::Edit { id, fields } => {
                    commands::edit(outbox, id, |draft| fields.apply(draft)).await
                }
                ComplaintAction::Delete { id, yes } => commands::delete(outbox, id, yes),
                ComplaintAction::List { name, pending } => {
                    commands::list(outbox, name.as_deref(), pending)
                }
                ComplaintAction::Clear { yes } => commands::clear(outbox, yes),
            }
        }

        Commands::Feedback { action } => {
            let portal = commands::Portal::open(&load_config(config_path.as_deref())?)?;
            let outbox = &portal.feedback;
            match action {
                FeedbackAction::Add(fields) => {
                    let mut draft = FeedbackDraft::default();
                    fields.apply(&mut draft);
                    commands::submit(outbox, draft).await
                }
                FeedbackAction::Edit { id, fields } => {
                    commands::edit(outbox, id, |draft| fields.apply(draft)).await
                }
                FeedbackAction::Delete { id, yes } => commands::delete(outbox, id, yes),
                FeedbackAction::List { name, pending } => {
                    commands::list(outbox, name.as_deref(), pending)
                }
                FeedbackAction::Clear { yes } => commands::clear(outbox, yes),
            }
        }

        Commands::Endpoint { action } => {
            let cfg = load_config(config_path.as_deref())?;
            let db = commands::open_storage(&cfg)?;
            match action {
                EndpointAction::Show => commands::show_endpoints(&db, &cfg),
                EndpointAction::Set { collection, url } => {
                    commands::set_endpoint(&db, &cfg, collection, &url)
                }
                EndpointAction::Reset { collection } => {
                    commands::reset_endpoint(&db, &cfg, collection)
                }
            }
        }

        Commands::Flush => {
            let portal = commands::Portal::open(&load_config(config_path.as_deref())?)?;
            commands::flush(&portal).await
        }

        Commands::Run => {
            let cfg = load_config(config_path.as_deref())?;
            let portal = commands::Portal::open(&cfg)?;
            commands::run(&portal, cfg.remote.flush_interval()).await
        }

        Commands::Serve { port, bind } => {
            let mut cfg = load_config(config_path.as_deref())?;

            // Override with CLI args
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

async fn run_server(config: Config) -> Result<()> {
    let db = db::Database::open(&config.server.database).context("Failed to open database")?;

    let state = api::AppState::new(db);
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 hostel-sync receiver listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
