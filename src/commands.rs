//! Command handlers for the hostel-sync CLI

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::Database;
use crate::models::{Collection, Complaint, Feedback, Record};
use crate::outbox::{FlushReport, Outbox, capitalize};
use crate::sync::{HttpSyncClient, SyncClient};

/// Both collections, wired to local storage and their endpoints
pub struct Portal {
    pub complaints: Outbox<Complaint, HttpSyncClient>,
    pub feedback: Outbox<Feedback, HttpSyncClient>,
}

impl Portal {
    pub fn open(cfg: &Config) -> Result<Self> {
        let db = Arc::new(open_storage(cfg)?);
        let client =
            HttpSyncClient::new(cfg.remote.timeout()).context("Failed to build HTTP client")?;

        let complaints = Outbox::new(
            db.clone(),
            client.clone(),
            endpoint_for(&db, cfg, Collection::Complaints)?,
        );
        let feedback = Outbox::new(
            db.clone(),
            client,
            endpoint_for(&db, cfg, Collection::Feedback)?,
        )
        .with_rules(cfg.feedback.rules());

        Ok(Self {
            complaints,
            feedback,
        })
    }
}

pub fn open_storage(cfg: &Config) -> Result<Database> {
    Database::open(&cfg.storage.path).with_context(|| {
        format!(
            "Failed to open local storage at {}",
            cfg.storage.path.display()
        )
    })
}

/// Stored override for a collection, if one is set
fn endpoint_override(db: &Database, collection: Collection) -> Result<Option<String>> {
    let value = db.get(collection.endpoint_key())?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Absolute endpoint a collection delivers to
pub fn endpoint_for(db: &Database, cfg: &Config, collection: Collection) -> Result<String> {
    let raw = endpoint_override(db, collection)?
        .unwrap_or_else(|| collection.default_endpoint().to_string());
    cfg.remote.resolve(&raw)
}

/// How a record appears in `list` output
pub trait Listing: Record {
    /// Most records shown at once
    const LIMIT: Option<usize>;

    fn summary(&self, pending: bool) -> String;
}

impl Listing for Complaint {
    const LIMIT: Option<usize> = Some(20);

    fn summary(&self, pending: bool) -> String {
        let status = if pending {
            "PENDING".to_string()
        } else {
            self.status.to_string()
        };

        let mut out = format!(
            "#{} [{}] {} | room {} | {}",
            self.id, status, self.category, self.room, self.date
        );
        if let Some(urgency) = &self.urgency {
            out.push_str(&format!(" | urgency {urgency}"));
        }
        if !self.name.is_empty() {
            out.push_str(&format!("\n    by {}", self.name));
        }
        out.push_str(&format!("\n    {}", self.description));
        if let Some(severity) = self.severity {
            out.push_str(&format!("\n    severity {} {}", severity, mood(severity)));
        }
        out
    }
}

impl Listing for Feedback {
    const LIMIT: Option<usize> = None;

    fn summary(&self, pending: bool) -> String {
        let name = if self.name.is_empty() {
            "Anonymous"
        } else {
            self.name.as_str()
        };
        let when = self.created_at.format("%Y-%m-%d %H:%M");
        let mut out = format!("#{} {} ({}) {}", self.id, name, self.kind, when);
        if pending {
            out.push_str(" [PENDING]");
        }
        if !self.room.is_empty() {
            out.push_str(&format!(" | room {}", self.room));
        }
        out.push_str(&format!(
            "\n    Facilities: {}  Food: {}  Cleanliness: {}",
            score(self.ratings.facilities),
            score(self.ratings.food),
            score(self.ratings.clean)
        ));
        if !self.comments.is_empty() {
            out.push_str(&format!("\n    {}", self.comments));
        }
        out
    }
}

fn mood(value: u8) -> &'static str {
    match value {
        1 => "😡",
        2 => "😕",
        3 => "😐",
        4 => "🙂",
        5 => "😁",
        _ => "",
    }
}

fn score(value: Option<u8>) -> String {
    match value {
        Some(v) => format!("{} {}", v, mood(v)),
        None => "—".to_string(),
    }
}

/// Display lines, newest first, capped at `R::LIMIT`
pub fn listing<R: Listing>(records: Vec<R>, pending_ids: &[i64]) -> Vec<String> {
    let limit = R::LIMIT.unwrap_or(usize::MAX);
    records
        .iter()
        .rev()
        .take(limit)
        .map(|r| r.summary(pending_ids.contains(&r.id())))
        .collect()
}

pub async fn submit<R: Record, C: SyncClient>(
    outbox: &Outbox<R, C>,
    draft: R::Draft,
) -> Result<()> {
    let submission = outbox.submit(draft).await?;
    println!("{}", submission.notice());
    println!("id: {}", submission.record.id());
    Ok(())
}

pub async fn edit<R: Record, C: SyncClient>(
    outbox: &Outbox<R, C>,
    id: i64,
    change: impl FnOnce(&mut R::Draft),
) -> Result<()> {
    let submission = outbox.edit(id, change).await?;
    println!("{}", submission.notice());
    Ok(())
}

pub fn delete<R: Record, C: SyncClient>(outbox: &Outbox<R, C>, id: i64, yes: bool) -> Result<()> {
    let noun = R::COLLECTION.noun();
    if !yes && !confirm(&format!("Delete this {noun}? This cannot be undone."))? {
        println!("Nothing deleted.");
        return Ok(());
    }

    if outbox.delete(id)? {
        println!("{} deleted", capitalize(noun));
    } else {
        println!("No {noun} with id {id}.");
    }
    Ok(())
}

pub fn clear<R: Record, C: SyncClient>(outbox: &Outbox<R, C>, yes: bool) -> Result<()> {
    let collection = R::COLLECTION;
    if !yes
        && !confirm(&format!(
            "Are you sure you want to delete ALL {collection}? This cannot be undone."
        ))?
    {
        println!("Nothing deleted.");
        return Ok(());
    }

    outbox.clear()?;
    println!("All {collection} cleared");
    Ok(())
}

pub fn list<R: Listing, C: SyncClient>(
    outbox: &Outbox<R, C>,
    name: Option<&str>,
    pending_only: bool,
) -> Result<()> {
    let mut records = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => outbox.search(name)?,
        None => outbox.list()?,
    };
    if pending_only {
        let queued = outbox.pending()?;
        records.retain(|r| queued.iter().any(|q| q.id() == r.id()));
    }

    if records.is_empty() {
        if pending_only {
            println!("No {} waiting for delivery.", R::COLLECTION);
        } else {
            println!("No {} submitted yet.", R::COLLECTION);
        }
        return Ok(());
    }

    let pending_ids = outbox.pending_ids()?;
    for line in listing(records, &pending_ids) {
        println!("{line}");
    }
    Ok(())
}

pub fn show_endpoints(db: &Database, cfg: &Config) -> Result<()> {
    for collection in [Collection::Complaints, Collection::Feedback] {
        let source = if endpoint_override(db, collection)?.is_some() {
            "override"
        } else {
            "default"
        };
        println!(
            "{:<10} {} ({})",
            collection,
            endpoint_for(db, cfg, collection)?,
            source
        );
    }
    Ok(())
}

pub fn set_endpoint(db: &Database, cfg: &Config, collection: Collection, url: &str) -> Result<()> {
    let url = url.trim();
    let resolved = cfg.remote.resolve(url)?;
    db.set(collection.endpoint_key(), url)?;
    println!("{collection} endpoint set to {resolved}");
    Ok(())
}

pub fn reset_endpoint(db: &Database, cfg: &Config, collection: Collection) -> Result<()> {
    db.remove(collection.endpoint_key())?;
    println!(
        "{collection} endpoint reset to {}",
        endpoint_for(db, cfg, collection)?
    );
    Ok(())
}

pub async fn flush(portal: &Portal) -> Result<()> {
    let complaints = portal.complaints.flush().await?;
    print_report(Collection::Complaints, complaints);

    let feedback = portal.feedback.flush().await?;
    print_report(Collection::Feedback, feedback);
    Ok(())
}

fn print_report(collection: Collection, report: FlushReport) {
    if report.attempted == 0 {
        println!("{collection}: nothing pending");
    } else {
        println!(
            "{collection}: delivered {} of {}, {} still pending",
            report.delivered, report.attempted, report.remaining
        );
    }
}

/// Run both flush loops until Ctrl-C
pub async fn run(portal: &Portal, period: Duration) -> Result<()> {
    tracing::info!(
        complaints = portal.complaints.endpoint(),
        feedback = portal.feedback.endpoint(),
        period_secs = period.as_secs(),
        "Retrying pending records"
    );

    tokio::select! {
        _ = portal.complaints.run_flusher(period) => {}
        _ = portal.feedback.run_flusher(period) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Stopping");
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
