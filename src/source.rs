use crate::error::{DeepcompError, DeepcompResult};
use crate::row::DeepRow;
use crate::sample::{DeepSample, SAMPLE_STRIDE};

/// A scanline-oriented producer of deep rows.
///
/// The pipeline requests rows in strictly increasing order, calling
/// `sample_counts` and then `read_row` once per row; implementations may rely
/// on that (the DZR reader does).
pub trait DeepSource: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Whether samples carry a real back depth. When false, the `ZBack` lane
    /// filled by `read_row` is unspecified and the loader substitutes `Z`.
    fn has_z_back(&self) -> bool {
        true
    }

    /// Fill `out` (length `width`) with row `row`'s per-pixel sample counts.
    fn sample_counts(&mut self, row: u32, out: &mut [u32]) -> DeepcompResult<()>;

    /// Fill `data` (length `SAMPLE_STRIDE * Σcounts`) with row `row`'s
    /// interleaved `(R, G, B, A, Z, ZBack)` samples, pixels left to right.
    fn read_row(&mut self, row: u32, counts: &[u32], data: &mut [f32]) -> DeepcompResult<()>;
}

/// An in-memory deep image. Used by tests and the scene generator; rows are
/// served straight from owned [`DeepRow`]s.
#[derive(Clone, Debug)]
pub struct BufferSource {
    width: u32,
    height: u32,
    has_z_back: bool,
    rows: Vec<DeepRow>,
}

impl BufferSource {
    /// Build from a per-pixel sample callback.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut pixel: impl FnMut(u32, u32) -> Vec<DeepSample>,
    ) -> Self {
        let mut rows = Vec::with_capacity(height as usize);
        let mut scratch: Vec<Vec<DeepSample>> = Vec::with_capacity(width as usize);
        for y in 0..height {
            scratch.clear();
            scratch.extend((0..width).map(|x| pixel(x, y)));
            let total: usize = scratch.iter().map(Vec::len).sum();
            let mut row = DeepRow::default();
            row.allocate_for_append(width as usize, total);
            for (x, samples) in scratch.iter().enumerate() {
                row.push_pixel(x, samples);
            }
            rows.push(row);
        }
        Self {
            width,
            height,
            has_z_back: true,
            rows,
        }
    }

    /// Every pixel carries the same sample list.
    pub fn uniform(width: u32, height: u32, samples: &[DeepSample]) -> Self {
        Self::from_fn(width, height, |_, _| samples.to_vec())
    }

    /// Mark the source as carrying no meaningful `ZBack` lane.
    pub fn without_z_back(mut self) -> Self {
        self.has_z_back = false;
        self
    }

    pub fn rows(&self) -> &[DeepRow] {
        &self.rows
    }
}

impl DeepSource for BufferSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn has_z_back(&self) -> bool {
        self.has_z_back
    }

    fn sample_counts(&mut self, row: u32, out: &mut [u32]) -> DeepcompResult<()> {
        let src = self
            .rows
            .get(row as usize)
            .ok_or_else(|| DeepcompError::read(format!("row {row} out of range")))?;
        out.copy_from_slice(src.counts());
        Ok(())
    }

    fn read_row(&mut self, row: u32, _counts: &[u32], data: &mut [f32]) -> DeepcompResult<()> {
        let src = self
            .rows
            .get(row as usize)
            .ok_or_else(|| DeepcompError::read(format!("row {row} out of range")))?;
        if data.len() != src.data().len() {
            return Err(DeepcompError::read(format!(
                "row {row}: destination holds {} floats, row has {}",
                data.len(),
                src.data().len()
            )));
        }
        data.copy_from_slice(src.data());
        Ok(())
    }
}
