// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Deterministic build versions
//!
//! A build version is `{YYYY}{MM}{DD}_{count}`, where `count` is the number
//! of commits reachable from the built revision. The same commit on the same
//! date always yields the same identifier; a later commit on the same date
//! yields a strictly greater one.
//!
//! The clock and the commit count are injected so the generator stays a
//! pure function of its inputs.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::process::Command;

use crate::errors::ShipflowError;

/// Separator between the date and the commit count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VersionSeparator {
    #[default]
    Underscore,
    Dot,
}

impl VersionSeparator {
    pub fn as_char(self) -> char {
        match self {
            Self::Underscore => '_',
            Self::Dot => '.',
        }
    }
}

impl FromStr for VersionSeparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "underscore" | "_" => Ok(Self::Underscore),
            "dot" | "." => Ok(Self::Dot),
            _ => Err(format!("Unknown version separator: {}", s)),
        }
    }
}

/// A computed build identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildVersion {
    date: NaiveDate,
    commit_count: u64,
    separator: VersionSeparator,
}

impl BuildVersion {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    pub fn separator(&self) -> VersionSeparator {
        self.separator
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}{}{}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.separator.as_char(),
            self.commit_count
        )
    }
}

// Numeric ordering: "20251229_10" sorts after "20251229_9".
impl Ord for BuildVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.date, self.commit_count).cmp(&(other.date, other.commit_count))
    }
}

impl PartialOrd for BuildVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for BuildVersion {
    type Err = ShipflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ShipflowError::validation(format!("'{}' is not a build version", s));

        let (date, count, separator) = match (s.split_once('_'), s.split_once('.')) {
            (Some((d, c)), _) => (d, c, VersionSeparator::Underscore),
            (None, Some((d, c))) => (d, c, VersionSeparator::Dot),
            (None, None) => return Err(invalid()),
        };

        if date.len() != 8 {
            return Err(invalid());
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        let commit_count: u64 = count.parse().map_err(|_| invalid())?;
        if commit_count == 0 {
            return Err(invalid());
        }

        Ok(Self {
            date,
            commit_count,
            separator,
        })
    }
}

impl Serialize for BuildVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Compute a build version from a date and a commit count
///
/// A missing or zero count means the history could not be counted, which
/// is fatal: the caller has to supply the full history.
pub fn generate(
    date: NaiveDate,
    commit_count: Option<u64>,
    separator: VersionSeparator,
) -> Result<BuildVersion, ShipflowError> {
    match commit_count {
        Some(count) if count > 0 => Ok(BuildVersion {
            date,
            commit_count: count,
            separator,
        }),
        Some(_) => Err(ShipflowError::IncompleteHistory {
            reason: "no commits are reachable from the revision".into(),
        }),
        None => Err(ShipflowError::IncompleteHistory {
            reason: "the commit count could not be determined".into(),
        }),
    }
}

/// Source of the current calendar date (UTC)
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock frozen on one date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Source of the number of commits reachable from the built revision
#[async_trait]
pub trait CommitCounter: Send + Sync {
    async fn commit_count(&self) -> Result<u64, ShipflowError>;
}

/// A count supplied by the caller
#[derive(Debug, Clone, Copy)]
pub struct KnownCount(pub Option<u64>);

#[async_trait]
impl CommitCounter for KnownCount {
    async fn commit_count(&self) -> Result<u64, ShipflowError> {
        self.0.ok_or_else(|| ShipflowError::IncompleteHistory {
            reason: "no commit count was supplied".into(),
        })
    }
}

/// Counts commits with the `git` CLI
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo: PathBuf,
    revision: String,
}

impl GitHistory {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            revision: "HEAD".into(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    async fn git(&self, args: &[&str]) -> Result<String, ShipflowError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|e| ShipflowError::IncompleteHistory {
                reason: format!("git could not be started: {}", e),
            })?;

        if !output.status.success() {
            return Err(ShipflowError::IncompleteHistory {
                reason: format!(
                    "'git {}' failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CommitCounter for GitHistory {
    async fn commit_count(&self) -> Result<u64, ShipflowError> {
        if self.git(&["rev-parse", "--is-shallow-repository"]).await? == "true" {
            return Err(ShipflowError::IncompleteHistory {
                reason: format!("'{}' is a shallow clone", self.repo.display()),
            });
        }

        let count = self.git(&["rev-list", "--count", &self.revision]).await?;
        tracing::debug!(revision = %self.revision, count = %count, "Counted commits");

        count.parse().map_err(|_| ShipflowError::IncompleteHistory {
            reason: format!("unexpected commit count '{}'", count),
        })
    }
}
