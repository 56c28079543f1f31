use crate::error::DeepcompResult;
use crate::row::DeepRow;

/// Configuration handed to a [`DeepRowSink`] before the first row.
#[derive(Clone, Copy, Debug)]
pub struct DeepSinkConfig {
    pub width: u32,
    pub height: u32,
}

/// Sink contract for consuming merged deep rows in scanline order.
///
/// Ordering contract: `push_row` is called once per row in strictly
/// increasing row order, after `begin` and before `end`. The flattener drives
/// this for the optional merged deep passthrough.
pub trait DeepRowSink: Send {
    /// Called once before any rows are pushed.
    fn begin(&mut self, cfg: DeepSinkConfig) -> DeepcompResult<()>;

    /// Push one merged row in strictly increasing scanline order.
    fn push_row(&mut self, row: u32, data: &DeepRow) -> DeepcompResult<()>;

    /// Called once after the last row is pushed.
    fn end(&mut self) -> DeepcompResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemoryDeepSink {
    cfg: Option<DeepSinkConfig>,
    rows: Vec<DeepRow>,
    ended: bool,
}

impl InMemoryDeepSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<DeepSinkConfig> {
        self.cfg
    }

    /// Captured rows in scanline order.
    pub fn rows(&self) -> &[DeepRow] {
        &self.rows
    }

    pub fn is_complete(&self) -> bool {
        self.ended
    }
}

impl DeepRowSink for InMemoryDeepSink {
    fn begin(&mut self, cfg: DeepSinkConfig) -> DeepcompResult<()> {
        self.cfg = Some(cfg);
        self.rows.clear();
        self.ended = false;
        Ok(())
    }

    fn push_row(&mut self, row: u32, data: &DeepRow) -> DeepcompResult<()> {
        debug_assert_eq!(row as usize, self.rows.len());
        self.rows.push(data.clone());
        Ok(())
    }

    fn end(&mut self) -> DeepcompResult<()> {
        self.ended = true;
        Ok(())
    }
}
