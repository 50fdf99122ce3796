use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Run-wide counters, shared by every worker.
#[derive(Debug, Default)]
pub struct RunStatistics {
    processed: AtomicU64,
    duplicates: AtomicU64,
    unknown: AtomicU64,
    moved: AtomicU64,
    copied: AtomicU64,
    linked: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Processed,
    Duplicate,
    Unknown,
    Moved,
    Copied,
    Linked,
    Failed,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::Processed => &self.processed,
            Counter::Duplicate => &self.duplicates,
            Counter::Unknown => &self.unknown,
            Counter::Moved => &self.moved,
            Counter::Copied => &self.copied,
            Counter::Linked => &self.linked,
            Counter::Failed => &self.failed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, dry_run: bool, cancelled: bool) -> RunSummary {
        RunSummary {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            moved: self.moved.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            linked: self.linked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dry_run,
            cancelled,
        }
    }
}

/// Counters at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: u64,
    pub duplicates: u64,
    /// Files skipped for lacking a date (only counted with skip-unknown)
    pub unknown: u64,
    pub moved: u64,
    pub copied: u64,
    pub linked: u64,
    pub failed: u64,
    #[serde(default)]
    pub dry_run: bool,
    /// The run stopped early; counters cover the files finished so far.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunSummary {
    /// Files that reached the output tree.
    pub fn relocated(&self) -> u64 {
        self.moved + self.copied + self.linked
    }

    /// Log the end-of-run report. Nothing is logged when no file was
    /// processed.
    pub fn log_report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if self.processed == 0 || secs <= 0.0 {
            return;
        }
        tracing::info!(
            "processed {} files in {secs:.2} seconds, average throughput {:.2} files/second",
            self.processed,
            self.processed as f64 / secs
        );
        if self.unknown > 0 {
            tracing::info!("found {} files without a capture date", self.unknown);
        }
        if self.duplicates > 0 {
            tracing::info!("found {} duplicate files", self.duplicates);
        }
        let verb = if self.dry_run { "would have " } else { "" };
        for (count, action) in [
            (self.copied, "copied"),
            (self.moved, "moved"),
            (self.linked, "linked"),
        ] {
            if count > 0 {
                tracing::info!("{verb}{action} {count} files");
            }
        }
        if self.failed > 0 {
            tracing::warn!("{} files failed", self.failed);
        }
        if self.cancelled {
            tracing::warn!("run was cancelled before all files were processed");
        }
    }
}
