//! Record models for the two portal collections
//!
//! Both collections share one storage and delivery path; the `Record` trait
//! carries everything that differs between them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

use crate::error::ValidationError;

/// The named collections persisted by the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Complaints,
    Feedback,
}

impl Collection {
    /// Storage key holding the full collection
    pub const fn store_key(self) -> &'static str {
        match self {
            Self::Complaints => "complaints",
            Self::Feedback => "feedback_entries",
        }
    }

    /// Storage key holding records awaiting delivery
    pub const fn pending_key(self) -> &'static str {
        match self {
            Self::Complaints => "complaint_pending",
            Self::Feedback => "feedback_pending",
        }
    }

    /// Storage key holding an endpoint override
    pub const fn endpoint_key(self) -> &'static str {
        match self {
            Self::Complaints => "complaint_endpoint",
            Self::Feedback => "feedback_endpoint",
        }
    }

    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::Complaints => "/api/complaints",
            Self::Feedback => "/api/feedback",
        }
    }

    /// Singular noun used in user-facing messages
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Complaints => "complaint",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complaints => f.pad("complaints"),
            Self::Feedback => f.pad("feedback"),
        }
    }
}

/// Checks applied to user input before it is persisted
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationRules {
    /// Feedback must rate every category instead of at least one
    pub require_all_ratings: bool,
}

pub trait Validate {
    fn validate(&self, rules: &ValidationRules) -> Result<(), ValidationError>;
}

/// A user-submitted record stored in one collection
///
/// `id` is the only identity used for edits, deletes and pending-queue
/// matching. Everything else is payload the sync layer never inspects.
pub trait Record:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Editable fields, as entered on the form
    type Draft: Validate + Send;

    const COLLECTION: Collection;

    fn id(&self) -> i64;

    /// Field matched by name filters
    fn name(&self) -> &str;

    /// Builds a new record from a validated draft
    fn create(id: i64, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    /// Applies a draft to this record, keeping its id and capture time
    fn revise(&self, draft: Self::Draft) -> Self;

    /// The editable fields of this record, for prefilling an edit
    fn to_draft(&self) -> Self::Draft;
}

/// Processing state of a complaint, set by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    #[default]
    Pending,
    InProgress,
    Resolved,
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::InProgress => f.write_str("IN PROGRESS"),
            Self::Resolved => f.write_str("RESOLVED"),
        }
    }
}

/// A maintenance complaint filed by a resident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub category: String,
    pub room: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(default)]
    pub status: ComplaintStatus,
    /// Day the complaint was filed
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintDraft {
    pub name: String,
    pub category: String,
    pub room: String,
    pub description: String,
    pub urgency: Option<String>,
    pub severity: Option<u8>,
}

impl Validate for ComplaintDraft {
    fn validate(&self, _rules: &ValidationRules) -> Result<(), ValidationError> {
        require("category", &self.category)?;
        require("room", &self.room)?;
        require("description", &self.description)?;
        if let Some(severity) = self.severity {
            check_score("severity", severity)?;
        }
        Ok(())
    }
}

impl Record for Complaint {
    type Draft = ComplaintDraft;

    const COLLECTION: Collection = Collection::Complaints;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(id: i64, draft: ComplaintDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            category: draft.category.trim().to_string(),
            room: draft.room.trim().to_string(),
            description: draft.description.trim().to_string(),
            urgency: non_empty(draft.urgency),
            severity: draft.severity,
            status: ComplaintStatus::Pending,
            date: now.date_naive(),
        }
    }

    fn revise(&self, draft: ComplaintDraft) -> Self {
        Self {
            id: self.id,
            status: self.status,
            date: self.date,
            ..Self::create(self.id, draft, Utc::now())
        }
    }

    fn to_draft(&self) -> ComplaintDraft {
        ComplaintDraft {
            name: self.name.clone(),
            category: self.category.clone(),
            room: self.room.clone(),
            description: self.description.clone(),
            urgency: self.urgency.clone(),
            severity: self.severity,
        }
    }
}

/// Kind of feedback being given
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    #[default]
    General,
    Food,
    Facilities,
    Cleanliness,
    Suggestion,
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::General => "General",
            Self::Food => "Food",
            Self::Facilities => "Facilities",
            Self::Cleanliness => "Cleanliness",
            Self::Suggestion => "Suggestion",
        };
        f.write_str(label)
    }
}

/// 1-5 scores; an unset score means the category was not rated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default)]
    pub facilities: Option<u8>,
    #[serde(default)]
    pub food: Option<u8>,
    #[serde(default)]
    pub clean: Option<u8>,
}

impl Ratings {
    fn scores(&self) -> [(&'static str, Option<u8>); 3] {
        [
            ("facilities", self.facilities),
            ("food", self.food),
            ("cleanliness", self.clean),
        ]
    }
}

/// Resident feedback on facilities, food and cleanliness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub room: String,
    #[serde(rename = "type", default)]
    pub kind: FeedbackType,
    #[serde(default)]
    pub comments: String,
    pub ratings: Ratings,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackDraft {
    pub name: String,
    pub room: String,
    pub kind: FeedbackType,
    pub comments: String,
    pub ratings: Ratings,
}

impl Validate for FeedbackDraft {
    fn validate(&self, rules: &ValidationRules) -> Result<(), ValidationError> {
        let scores = self.ratings.scores();
        for (field, score) in scores {
            if let Some(value) = score {
                check_score(field, value)?;
            }
        }

        let rated = scores.iter().filter(|(_, score)| score.is_some()).count();
        if rules.require_all_ratings && rated < scores.len() {
            return Err(ValidationError::IncompleteRatings);
        }
        if rated == 0 {
            return Err(ValidationError::NoRatings);
        }
        Ok(())
    }
}

impl Record for Feedback {
    type Draft = FeedbackDraft;

    const COLLECTION: Collection = Collection::Feedback;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(id: i64, draft: FeedbackDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            room: draft.room.trim().to_string(),
            kind: draft.kind,
            comments: draft.comments.trim().to_string(),
            ratings: draft.ratings,
            created_at: now,
        }
    }

    fn revise(&self, draft: FeedbackDraft) -> Self {
        Self::create(self.id, draft, self.created_at)
    }

    fn to_draft(&self) -> FeedbackDraft {
        FeedbackDraft {
            name: self.name.clone(),
            room: self.room.clone(),
            kind: self.kind,
            comments: self.comments.clone(),
            ratings: self.ratings,
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn check_score(field: &'static str, value: u8) -> Result<(), ValidationError> {
    if !(1..=5).contains(&value) {
        return Err(ValidationError::RatingOutOfRange { field, value });
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
