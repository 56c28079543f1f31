use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::{DeepcompError, DeepcompResult};

/// Lifecycle of one scanline during a pipeline pass.
///
/// Strictly monotone per row: `Empty → Loaded → Merged → Flattened`. Each
/// transition hands the row's slots to the next stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RowStatus {
    Empty = 0,
    Loaded = 1,
    Merged = 2,
    Flattened = 3,
}

impl RowStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Empty,
            1 => Self::Loaded,
            2 => Self::Merged,
            _ => Self::Flattened,
        }
    }
}

/// Sequencer for the sliding-window pipeline: one atomic status per row,
/// plus the pipeline-scoped cancellation flag and first-failure slot.
///
/// Publications are release stores and waits are acquire loads, so a stage's
/// writes to a slot happen-before the next stage's reads of it. The board
/// sequences access only; slot memory lives in the rings.
pub struct StatusBoard {
    rows: Vec<AtomicU8>,
    window: usize,
    cancelled: AtomicBool,
    failure: Mutex<Option<DeepcompError>>,
}

impl StatusBoard {
    pub fn new(height: usize, window: usize) -> Self {
        Self {
            rows: (0..height).map(|_| AtomicU8::new(0)).collect(),
            window,
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Ring slot holding row `row`.
    pub fn slot_of(&self, row: usize) -> usize {
        row % self.window
    }

    pub fn status(&self, row: usize) -> RowStatus {
        RowStatus::from_u8(self.rows[row].load(Ordering::Acquire))
    }

    /// Advance a row's status. The new status must be strictly greater than
    /// the current one; anything else is a stage-sequencing bug.
    pub fn publish(&self, row: usize, status: RowStatus) {
        debug_assert!(
            self.status(row) < status,
            "row {row}: non-monotone publish {:?} -> {status:?}",
            self.status(row),
        );
        self.rows[row].store(status as u8, Ordering::Release);
    }

    /// Block until `status[row] >= min`, yielding cooperatively. Fails with
    /// [`DeepcompError::Cancelled`] once the abort flag is raised.
    pub fn wait_until(&self, row: usize, min: RowStatus) -> DeepcompResult<()> {
        loop {
            if self.is_cancelled() {
                return Err(DeepcompError::Cancelled);
            }
            if self.status(row) >= min {
                return Ok(());
            }
            std::thread::yield_now();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Record the pipeline's first failure and abort all stages. Later
    /// failures keep the first error.
    pub fn fail(&self, err: DeepcompError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn take_failure(&self) -> Option<DeepcompError> {
        self.failure.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_ordered() {
        assert!(RowStatus::Empty < RowStatus::Loaded);
        assert!(RowStatus::Loaded < RowStatus::Merged);
        assert!(RowStatus::Merged < RowStatus::Flattened);
    }

    #[test]
    fn publish_then_wait_is_immediate() {
        let board = StatusBoard::new(4, 2);
        assert_eq!(board.status(1), RowStatus::Empty);
        board.publish(1, RowStatus::Loaded);
        board.publish(1, RowStatus::Merged);
        board.wait_until(1, RowStatus::Loaded).unwrap();
        board.wait_until(1, RowStatus::Merged).unwrap();
        assert_eq!(board.status(1), RowStatus::Merged);
    }

    #[test]
    fn slot_of_wraps_at_the_window() {
        let board = StatusBoard::new(100, 32);
        assert_eq!(board.slot_of(0), 0);
        assert_eq!(board.slot_of(31), 31);
        assert_eq!(board.slot_of(32), 0);
        assert_eq!(board.slot_of(70), 6);
    }

    #[test]
    fn failure_aborts_waits_and_keeps_the_first_error() {
        let board = StatusBoard::new(4, 2);
        board.fail(DeepcompError::read("first"));
        board.fail(DeepcompError::read("second"));
        assert!(matches!(
            board.wait_until(3, RowStatus::Loaded),
            Err(DeepcompError::Cancelled)
        ));
        let err = board.take_failure().unwrap();
        assert!(err.to_string().contains("first"));
    }
}
