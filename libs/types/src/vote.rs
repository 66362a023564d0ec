//! Candidate and vote event types
//!
//! A [`VoteEvent`] is minted once per accepted submission and travels
//! through the log as a flat string map. [`VoteFields`] is the boundary
//! record for that map: it checks that every required field is present, and
//! [`VoteFields::parse`] checks that every field is well formed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ParseFailure;
use crate::ids::{CandidateId, VoteId};

/// Raw field map of a log entry.
pub type Fields = BTreeMap<String, String>;

/// Log field carrying the candidate id.
pub const FIELD_CANDIDATE_ID: &str = "candidateID";
/// Log field carrying the vote id.
pub const FIELD_VOTE_ID: &str = "voteID";
/// Log field carrying the time bucket label.
pub const FIELD_TIME_BUCKET: &str = "timeBucket";

const BUCKET_FORMAT: &str = "%Y-%m-%d-%H";

/// A registered candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
}

/// Coarse, hourly UTC label used to cluster durable rows (`YYYY-MM-DD-HH`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeBucket(String);

impl TimeBucket {
    /// Bucket containing the given Unix millisecond timestamp.
    ///
    /// Timestamps outside chrono's range fall into the epoch bucket.
    pub fn from_millis(millis: i64) -> Self {
        let at: DateTime<Utc> = DateTime::from_timestamp_millis(millis).unwrap_or_default();
        Self(at.format(BUCKET_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TimeBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono needs a minute to build a NaiveDateTime
        let parsed = NaiveDateTime::parse_from_str(&format!("{s}:00"), "%Y-%m-%d-%H:%M")
            .map_err(|e| e.to_string())?;
        let canonical = parsed.format(BUCKET_FORMAT).to_string();
        if canonical != s {
            return Err(format!("expected {canonical}"));
        }
        Ok(Self(canonical))
    }
}

/// One accepted vote intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub vote_id: VoteId,
    pub candidate_id: CandidateId,
    pub time_bucket: TimeBucket,
}

impl VoteEvent {
    /// Mint a vote with a fresh identity in the bucket of `now_millis`.
    pub fn mint(candidate_id: CandidateId, now_millis: i64) -> Self {
        Self {
            vote_id: VoteId::new(),
            candidate_id,
            time_bucket: TimeBucket::from_millis(now_millis),
        }
    }

    /// Log fields for this vote: exactly `candidateID`, `voteID`, `timeBucket`.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_CANDIDATE_ID.to_string(), self.candidate_id.to_string());
        fields.insert(FIELD_VOTE_ID.to_string(), self.vote_id.to_string());
        fields.insert(FIELD_TIME_BUCKET.to_string(), self.time_bucket.to_string());
        fields
    }

    /// Extract and validate a vote from raw log fields.
    pub fn from_fields(fields: &Fields) -> Result<Self, ParseFailure> {
        VoteFields::extract(fields)?.parse()
    }
}

/// Required fields of a vote entry, still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteFields<'a> {
    pub candidate_id: &'a str,
    pub vote_id: &'a str,
    pub time_bucket: &'a str,
}

impl<'a> VoteFields<'a> {
    /// Fails with `MissingField` for the first absent required field.
    pub fn extract(fields: &'a Fields) -> Result<Self, ParseFailure> {
        Ok(Self {
            candidate_id: required(fields, FIELD_CANDIDATE_ID)?,
            vote_id: required(fields, FIELD_VOTE_ID)?,
            time_bucket: required(fields, FIELD_TIME_BUCKET)?,
        })
    }

    /// Fails with `MalformedField` for the first field that does not parse.
    pub fn parse(&self) -> Result<VoteEvent, ParseFailure> {
        let candidate_id = self
            .candidate_id
            .parse::<CandidateId>()
            .map_err(|e| malformed(FIELD_CANDIDATE_ID, self.candidate_id, e.to_string()))?;
        let vote_id = self
            .vote_id
            .parse::<VoteId>()
            .map_err(|e| malformed(FIELD_VOTE_ID, self.vote_id, e.to_string()))?;
        let time_bucket = self
            .time_bucket
            .parse::<TimeBucket>()
            .map_err(|e| malformed(FIELD_TIME_BUCKET, self.time_bucket, e))?;

        Ok(VoteEvent {
            vote_id,
            candidate_id,
            time_bucket,
        })
    }
}

fn required<'a>(fields: &'a Fields, field: &'static str) -> Result<&'a str, ParseFailure> {
    fields
        .get(field)
        .map(String::as_str)
        .ok_or(ParseFailure::MissingField { field })
}

fn malformed(field: &'static str, value: &str, reason: String) -> ParseFailure {
    ParseFailure::MalformedField {
        field,
        value: value.to_string(),
        reason,
    }
}
