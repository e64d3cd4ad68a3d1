//! EZchain VPB verification
//!
//! The offline pipeline a receiver runs on every incoming value before
//! accepting it, using nothing but the main chain's Merkle roots and Bloom
//! filters:
//!
//! 1. **Data structure** — the triplet's internal invariants
//! 2. **Slice generation** — checkpoint matching cuts off already-verified
//!    history
//! 3. **Bloom consistency** — every claimed sender appearance is in the
//!    chain's filters, and no filter shows an appearance the claim omits
//!    (the hidden-block check that exposes double-spends)
//! 4. **Proof units** — every bundle proves into its block's Merkle root,
//!    transfer blocks carry exactly the right transfer, and no other
//!    committed transaction touches the value
//!
//! Step 4 collects every failure instead of stopping at the first, so a
//! rejected record shows the whole picture.

mod bloom_check;
mod proof_check;
mod report;
mod slice;
mod structure;

pub use report::{StepReport, ValidationError, VerificationReport};
pub use slice::VpbSlice;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ezchain_chain::MainChainInfo;
use ezchain_core::{Address, VpbRecord};
use ezchain_storage::{CheckPointRecord, CheckpointStore};

/// Validator behaviour knobs
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Write a checkpoint at the chain tip after a successful
    /// verification, bounding future work on this value
    pub record_checkpoints: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            record_checkpoints: true,
        }
    }
}

/// Cooperative cancellation for long verifications, honoured at step
/// boundaries only — never inside a single Merkle or Bloom check
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running counters across verifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidatorStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub checkpoint_hits: u64,
}

/// The four-step VPB verifier
pub struct VpbValidator {
    config: ValidatorConfig,
    stats: Mutex<ValidatorStats>,
}

impl Default for VpbValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl VpbValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(ValidatorStats::default()),
        }
    }

    /// Verify a received record against the main chain.
    ///
    /// `account` is the receiver asserting current ownership;
    /// `checkpoints` is its local checkpoint store, consulted for slicing
    /// and updated on success when configured.
    pub fn verify(
        &self,
        record: &VpbRecord,
        chain: &dyn MainChainInfo,
        account: &Address,
        checkpoints: Option<&CheckpointStore>,
    ) -> VerificationReport {
        self.verify_with_cancel(record, chain, account, checkpoints, &CancelFlag::new())
            .expect("fresh flag is never cancelled")
    }

    /// Like [`verify`](Self::verify), but stops between steps once `cancel`
    /// fires; a cancelled verification yields `None` and counts as neither
    /// success nor failure
    pub fn verify_with_cancel(
        &self,
        record: &VpbRecord,
        chain: &dyn MainChainInfo,
        account: &Address,
        checkpoints: Option<&CheckpointStore>,
        cancel: &CancelFlag,
    ) -> Option<VerificationReport> {
        let started = Instant::now();
        let mut report = VerificationReport::default();
        self.stats.lock().total += 1;

        // Step 1: data-structure validation
        report.data_structure = StepReport::from_errors(structure::validate(record, account));
        if !report.data_structure.passed {
            debug!(value = %record.value.id_hex(), "structural validation failed");
            return Some(self.finish(report, started));
        }
        if cancel.is_cancelled() {
            return self.cancelled();
        }

        // Step 2: checkpoint matching and slice generation
        let slice = match slice::generate(record, account, checkpoints) {
            Ok(slice) => slice,
            Err(e) => {
                report.slice = StepReport::from_errors(vec![e]);
                return Some(self.finish(report, started));
            }
        };
        report.slice = StepReport::passed();
        report.checkpoint_used = slice.checkpoint.clone();
        if slice.checkpoint.is_some() {
            self.stats.lock().checkpoint_hits += 1;
        }
        report.verified_epochs = slice
            .epochs()
            .iter()
            .map(|e| (e.owner.clone(), e.start_height, e.end_height))
            .collect();

        if cancel.is_cancelled() {
            return self.cancelled();
        }

        // Step 3: bloom-filter consistency
        let (bloom_errors, suspects) = bloom_check::verify(&slice, chain);
        report.suspect_heights = suspects;
        report.bloom = StepReport::from_errors(bloom_errors);
        if !report.bloom.passed {
            return Some(self.finish(report, started));
        }
        if cancel.is_cancelled() {
            return self.cancelled();
        }

        // Step 4: per-proof-unit verification and double-spend detection;
        // failures are collected, not short-circuited
        report.proofs = StepReport::from_errors(proof_check::verify(&slice, chain));

        if report.proofs.passed && self.config.record_checkpoints {
            if let Some(store) = checkpoints {
                let checkpoint =
                    CheckPointRecord::new(&record.value, account.clone(), chain.tip_height());
                if let Err(e) = store.upsert(&checkpoint) {
                    warn!(error = %e, "failed to record checkpoint after verification");
                }
            }
        }

        Some(self.finish(report, started))
    }

    fn cancelled(&self) -> Option<VerificationReport> {
        let mut stats = self.stats.lock();
        stats.total = stats.total.saturating_sub(1);
        debug!("verification cancelled at a step boundary");
        None
    }

    fn finish(&self, mut report: VerificationReport, started: Instant) -> VerificationReport {
        report.is_valid = report.data_structure.passed
            && report.slice.passed
            && report.bloom.passed
            && report.proofs.passed;
        report.elapsed = started.elapsed();

        let mut stats = self.stats.lock();
        if report.is_valid {
            stats.successful += 1;
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "vpb accepted");
        } else {
            stats.failed += 1;
            warn!(
                errors = report.error_count(),
                "vpb rejected"
            );
        }
        report
    }

    /// Verify a batch of records — a combined payment's values, say — in
    /// parallel. Reports come back in input order.
    pub fn verify_batch(
        &self,
        records: &[VpbRecord],
        chain: &dyn MainChainInfo,
        account: &Address,
        checkpoints: Option<&CheckpointStore>,
    ) -> Vec<VerificationReport> {
        use rayon::prelude::*;
        records
            .par_iter()
            .map(|record| self.verify(record, chain, account, checkpoints))
            .collect()
    }

    pub fn stats(&self) -> ValidatorStats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = ValidatorStats::default();
    }
}
