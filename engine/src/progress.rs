//! Progress and cooperative-control trait.
//!
//! This module defines the `Checkpoint` trait, which decouples long-running
//! loops (relink scans, bulk verification) from whatever drives them. The job
//! scheduler passes its `JobContext`; synchronous callers pass
//! `NoCheckpoint`.

/// Cooperative gate polled by long-running loops at safe boundaries.
///
/// Implementations may block inside `proceed` (for example while paused).
/// Callers only ever invoke it between work items, never in the middle of
/// a copy.
pub trait Checkpoint: Send + Sync {
    /// Returns false once the work should stop.
    fn proceed(&self) -> bool;

    /// Report overall progress, 0 to 100.
    fn report(&self, percent: u8);
}

/// A checkpoint that never stops and discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn proceed(&self) -> bool {
        true
    }

    fn report(&self, _percent: u8) {}
}

/// Map `done` of `total` items onto `start..=end` percent.
pub fn scaled_percent(done: usize, total: usize, start: u8, end: u8) -> u8 {
    if total == 0 || end <= start {
        return end.max(start);
    }
    let span = (end - start) as usize;
    let step = (done.min(total) * span) / total;
    start + step as u8
}
