//! Queue operations over a queue file
//!
//! Each operation is a full read-modify-write of the file. Order matters:
//! the next job is always the first `PENDING` line, not the oldest one.

use crate::store::{append_lines, for_each, read_all, update_matching, write_all};
use crate::{Clock, Error, Record, Result, Status, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const STALE_CLAIM_MESSAGE: &str = "Reset from stale SENDING claim";

/// Aggregate counts per status
///
/// `total` counts parsed records only; malformed lines are excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
    pub unsubscribed: usize,
}

/// A recipient still waiting for (or in) delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEmail {
    pub email: String,
    pub sending: bool,
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Addresses offered for import
    pub found: usize,
    /// Addresses appended as new `PENDING` records
    pub added: usize,
    /// Addresses already present (in the file or earlier in the batch)
    pub skipped: usize,
}

/// Ownership of one record taken by [`Queue::claim_next_pending`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Zero-based line index of the claimed record
    pub line: usize,

    /// The record as written, status `SENDING`
    pub record: Record,
}

impl Claim {
    pub fn email(&self) -> &str {
        &self.record.email
    }
}

/// Handle to a queue file
#[derive(Debug, Clone)]
pub struct Queue {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl Queue {
    /// Open a queue at `path` using the system clock
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Check that the queue file exists and is readable
    pub fn verify(&self) -> Result<()> {
        read_all(&self.path).map(|_| ())
    }

    /// Claim the first `PENDING` record in file order
    ///
    /// The record is rewritten as `SENDING` stamped with the current time.
    /// Returns [`Error::NoPendingRecipients`] when there is nothing to claim.
    pub fn claim_next_pending(&self) -> Result<Claim> {
        let mut lines = read_all(&self.path)?;

        for (index, line) in lines.iter_mut().enumerate() {
            let Ok(mut record) = Record::parse_line(line) else {
                continue;
            };
            if record.status != Status::Pending {
                continue;
            }

            record.stamp(Status::Sending, self.clock.now());
            *line = record.format();
            write_all(&self.path, &lines)?;

            tracing::debug!(email = %record.email, line = index, "Claimed pending recipient");
            return Ok(Claim {
                line: index,
                record,
            });
        }

        Err(Error::NoPendingRecipients)
    }

    /// Set status (and optionally error) on the first record with `email`
    ///
    /// Matching is by address only. An empty `error_message` keeps whatever
    /// error the record already carried. Returns whether a record matched.
    pub fn update_status(&self, email: &str, status: Status, error_message: &str) -> Result<bool> {
        let now = self.clock.now();
        let updated = update_matching(
            &self.path,
            |r| r.email == email,
            |r| {
                r.stamp(status, now);
                r.set_error(error_message);
            },
        )?;

        if updated.is_none() {
            tracing::warn!(email, %status, "No queue record matched status update");
        }
        Ok(updated.is_some())
    }

    /// Finish a claim with a final status
    ///
    /// Targets the claimed line when it still holds the same address in
    /// `SENDING`. If the file was reshuffled in the meantime, falls back to
    /// the first `SENDING` record for the address, then to any record for it.
    pub fn complete_claim(&self, claim: &Claim, status: Status, error_message: &str) -> Result<bool> {
        self.rewrite_claim(claim, |record, now| {
            record.stamp(status, now);
            record.set_error(error_message);
        })
    }

    /// Hand an unsent claim back to the queue as `PENDING`
    pub fn release_claim(&self, claim: &Claim) -> Result<bool> {
        self.rewrite_claim(claim, |record, now| {
            record.stamp(Status::Pending, now);
        })
    }

    fn rewrite_claim<F>(&self, claim: &Claim, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Record, DateTime<Utc>),
    {
        let mut lines = read_all(&self.path)?;
        let email = claim.email();

        let parsed: Vec<Option<Record>> = lines.iter().map(|l| Record::parse_line(l).ok()).collect();
        let holds_claim = |r: &Record| r.email == email && r.status == Status::Sending;

        let target = match parsed.get(claim.line) {
            Some(Some(record)) if holds_claim(record) => Some(claim.line),
            _ => parsed
                .iter()
                .position(|r| r.as_ref().is_some_and(holds_claim))
                .or_else(|| {
                    parsed
                        .iter()
                        .position(|r| r.as_ref().is_some_and(|r| r.email == email))
                }),
        };

        let Some(index) = target else {
            tracing::warn!(email, line = claim.line, "Claimed record no longer in queue");
            return Ok(false);
        };

        if index != claim.line {
            tracing::debug!(email, from = claim.line, to = index, "Claimed record moved");
        }

        let mut record = parsed[index].clone().ok_or_else(|| Error::Parse {
            reason: format!("line {} is not a record", index),
        })?;
        mutate(&mut record, self.clock.now());
        lines[index] = record.format();
        write_all(&self.path, &lines)?;
        Ok(true)
    }

    /// Count records by status
    pub fn stats(&self) -> Result<Stats> {
        let mut stats = Stats::default();
        for_each(&self.path, |record, _| {
            stats.total += 1;
            match record.status {
                Status::Pending => stats.pending += 1,
                Status::Sending => stats.sending += 1,
                Status::Done => stats.sent += 1,
                Status::Failed => stats.failed += 1,
                Status::Unsubscribed => stats.unsubscribed += 1,
            }
        })?;
        Ok(stats)
    }

    /// Latest timestamp among `DONE` and `FAILED` records
    pub fn last_completion_time(&self) -> Result<Option<DateTime<Utc>>> {
        let mut last: Option<DateTime<Utc>> = None;
        for_each(&self.path, |record, _| {
            if !record.status.is_completed() {
                return;
            }
            if let Some(ts) = record.timestamp {
                if last.map_or(true, |l| ts > l) {
                    last = Some(ts);
                }
            }
        })?;
        Ok(last)
    }

    /// Every `PENDING` or `SENDING` recipient, in file order
    pub fn pending_emails(&self) -> Result<Vec<PendingEmail>> {
        let mut pending = Vec::new();
        for_each(&self.path, |record, _| match record.status {
            Status::Pending | Status::Sending => pending.push(PendingEmail {
                email: record.email.clone(),
                sending: record.status == Status::Sending,
            }),
            _ => {}
        })?;
        Ok(pending)
    }

    /// Revert `SENDING` claims older than `timeout` to `PENDING`
    ///
    /// Claims without a timestamp are left alone. The file is rewritten only
    /// when something changed. Returns the number of records reset.
    pub fn reset_stale_claims(&self, timeout: Duration) -> Result<usize> {
        let mut lines = read_all(&self.path)?;
        let now = self.clock.now();

        let mut count = 0;
        for line in lines.iter_mut() {
            let Ok(mut record) = Record::parse_line(line) else {
                continue;
            };
            if record.status != Status::Sending {
                continue;
            }
            let Some(claimed_at) = record.timestamp else {
                continue;
            };

            // A claim stamped in the future is never stale
            let stale = (now - claimed_at).to_std().is_ok_and(|age| age > timeout);
            if stale {
                record.status = Status::Pending;
                record.set_error(STALE_CLAIM_MESSAGE);
                *line = record.format();
                count += 1;
            }
        }

        if count > 0 {
            write_all(&self.path, &lines)?;
            tracing::info!(count, "Reset stale SENDING claims");
        }
        Ok(count)
    }

    /// Turn bare addresses appended by other tools into `PENDING` records
    ///
    /// A line qualifies when it contains `@` and no field delimiter. Other
    /// lines are left alone. Returns the converted addresses.
    pub fn reconcile(&self) -> Result<Vec<String>> {
        let mut lines = read_all(&self.path)?;

        let mut converted = Vec::new();
        for line in lines.iter_mut() {
            let address = line.trim();
            if address.is_empty() || address.contains(';') || !address.contains('@') {
                continue;
            }
            converted.push(address.to_string());
            *line = Record::pending(address).format();
        }

        if !converted.is_empty() {
            write_all(&self.path, &lines)?;
            tracing::info!(count = converted.len(), "Converted bare addresses to pending records");
        }
        Ok(converted)
    }

    /// Append `PENDING` records for addresses not already queued
    pub fn import_addresses<I, S>(&self, addresses: I) -> Result<ImportSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known: HashSet<String> = HashSet::new();
        if self.path.exists() {
            for_each(&self.path, |record, _| {
                known.insert(record.email.clone());
            })?;
        }

        let mut summary = ImportSummary::default();
        let mut new_lines = Vec::new();
        for address in addresses {
            let address = address.as_ref().trim();
            if address.is_empty() {
                continue;
            }
            summary.found += 1;
            if known.insert(address.to_string()) {
                new_lines.push(Record::pending(address).format());
                summary.added += 1;
            } else {
                summary.skipped += 1;
            }
        }

        if !new_lines.is_empty() {
            append_lines(&self.path, &new_lines)?;
        }
        tracing::info!(
            found = summary.found,
            added = summary.added,
            skipped = summary.skipped,
            "Imported addresses"
        );
        Ok(summary)
    }

    /// Raw lines of the queue file
    pub fn lines(&self) -> Result<Vec<String>> {
        read_all(&self.path)
    }
}
