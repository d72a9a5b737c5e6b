//! Scheduler-managed jobs.
//!
//! A job is created through the API (outside this crate), validated here,
//! loaded by the scheduler at start and on every poll, and fired by its cron
//! trigger until someone deletes it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobValidationError {
    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("{job_type} script must not be empty")]
    EmptyScript { job_type: JobType },

    #[error("SQL script must be a single statement")]
    MultipleStatements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Sql,
    /// Reserved: accepted at creation, refused by the job executor.
    Bash,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Sql => "SQL",
            JobType::Bash => "BASH",
        }
    }

    /// Checks a script against this type.
    pub fn validate_script(self, script: &str) -> Result<(), JobValidationError> {
        let trimmed = script.trim();
        if trimmed.is_empty() {
            return Err(JobValidationError::EmptyScript { job_type: self });
        }
        match self {
            JobType::Sql => {
                let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
                if has_statement_separator(body) {
                    return Err(JobValidationError::MultipleStatements);
                }
                Ok(())
            }
            JobType::Bash => Ok(()),
        }
    }
}

/// `true` if `sql` has a `;` outside quoted literals and identifiers. A
/// doubled quote inside a literal closes and reopens it, which leaves the
/// scan in the right state.
fn has_statement_separator(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (None, ';') => return true,
            (Some(open), c) if c == open => quote = None,
            _ => {}
        }
    }
    false
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SQL" => Ok(JobType::Sql),
            "BASH" => Ok(JobType::Bash),
            other => Err(JobValidationError::UnknownType(other.to_string())),
        }
    }
}

/// Crontab weekday numbers (0-7, both ends Sunday) as `cron` crate names.
const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn weekday_name(token: &str) -> Option<&'static str> {
    token.parse::<usize>().ok().and_then(|n| WEEKDAYS.get(n)).copied()
}

/// Rewrites a crontab day-of-week field for the `cron` crate, which counts
/// weekdays from 1 (Sunday). Numbers become names; a range ending in 7 is
/// split so that it does not wrap. Anything else is left for the crate to
/// judge.
fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = match base.split_once('-') {
                Some(("0", "7")) => "Sun-Sat".to_string(),
                Some((from, "7")) if step.is_none() && from != "0" && from != "7" => {
                    match weekday_name(from) {
                        Some("Sat") => "Sat,Sun".to_string(),
                        Some(from) => format!("{from}-Sat,Sun"),
                        None => base.to_string(),
                    }
                }
                Some((from, to)) => format!(
                    "{}-{}",
                    weekday_name(from).unwrap_or(from),
                    weekday_name(to).unwrap_or(to)
                ),
                None => weekday_name(base).unwrap_or(base).to_string(),
            };
            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// A validated cron expression.
///
/// Standard 5-field crontab is accepted alongside the `cron` crate's own
/// 6- and 7-field syntax. The crate wants second granularity and numbers
/// weekdays from 1, so a 5-field expression gets a leading `0` seconds
/// field and its day-of-week numbers rewritten as names. `source` keeps the
/// text as given; that is what gets stored and displayed.
#[derive(Clone)]
pub struct CronSchedule {
    source: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, JobValidationError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = if let [minute, hour, dom, month, dow] = fields.as_slice() {
            format!(
                "0 {minute} {hour} {dom} {month} {}",
                crontab_weekdays(dow)
            )
        } else {
            fields.join(" ")
        };
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| JobValidationError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: expr.trim().to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `from`.
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(from).next()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.source).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronSchedule {}

impl Serialize for CronSchedule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for CronSchedule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CronSchedule::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub script: String,
    pub cron: CronSchedule,
}

impl Job {
    pub fn new(
        id: JobId,
        job_type: JobType,
        script: impl Into<String>,
        cron: &str,
    ) -> Result<Self, JobValidationError> {
        let script = script.into();
        job_type.validate_script(&script)?;
        Ok(Self {
            id,
            job_type,
            script,
            cron: CronSchedule::parse(cron)?,
        })
    }
}
