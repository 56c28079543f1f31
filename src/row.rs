use crate::sample::{DeepSample, SAMPLE_STRIDE};

/// One scanline of deep data: a per-pixel sample-count array and a single
/// contiguous block of interleaved `(R, G, B, A, Z, ZBack)` floats.
///
/// Pixel offsets are prefix sums computed when the row is allocated (or as
/// pixels are appended), so `pixel` is O(1). Reallocation reuses the float
/// block whenever the new request fits its capacity; `clear` empties the row
/// but keeps capacity so ring slots can be recycled without churn.
#[derive(Clone, Debug, Default)]
pub struct DeepRow {
    width: usize,
    counts: Vec<u32>,
    /// Prefix sums in samples, length `width + 1`.
    offsets: Vec<usize>,
    data: Vec<f32>,
}

impl DeepRow {
    /// Size the row for known per-pixel counts. The float block is zeroed and
    /// sized exactly; callers fill it through `data_mut`.
    pub fn allocate(&mut self, width: usize, counts: &[u32]) {
        debug_assert_eq!(counts.len(), width);
        self.width = width;
        self.counts.clear();
        self.counts.extend_from_slice(counts);
        self.offsets.clear();
        self.offsets.reserve(width + 1);
        let mut total = 0usize;
        self.offsets.push(0);
        for &c in counts {
            total += c as usize;
            self.offsets.push(total);
        }
        self.data.clear();
        self.data.resize(total * SAMPLE_STRIDE, 0.0);
    }

    /// Size the row for pixel-by-pixel appending via `push_pixel`, reserving
    /// space for up to `max_samples` samples so the block never grows
    /// mid-row.
    pub fn allocate_for_append(&mut self, width: usize, max_samples: usize) {
        self.width = width;
        self.counts.clear();
        self.counts.resize(width, 0);
        self.offsets.clear();
        self.offsets.resize(width + 1, 0);
        self.data.clear();
        self.data.reserve(max_samples * SAMPLE_STRIDE);
    }

    /// Append pixel `x`'s samples. Pixels must be pushed in ascending order,
    /// one call per pixel, after `allocate_for_append`.
    pub fn push_pixel(&mut self, x: usize, samples: &[DeepSample]) {
        debug_assert!(x < self.width);
        debug_assert_eq!(
            self.offsets[x] * SAMPLE_STRIDE,
            self.data.len(),
            "pixels must be appended in order"
        );
        debug_assert!(
            self.data.len() + samples.len() * SAMPLE_STRIDE <= self.data.capacity(),
            "append exceeds the row's reserved sample bound"
        );
        for s in samples {
            let at = self.data.len();
            self.data.resize(at + SAMPLE_STRIDE, 0.0);
            s.write_to(&mut self.data[at..]);
        }
        self.counts[x] = samples.len() as u32;
        self.offsets[x + 1] = self.offsets[x] + samples.len();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count(&self, x: usize) -> u32 {
        self.counts[x]
    }

    /// Pixel `x`'s interleaved floats, `SAMPLE_STRIDE` per sample.
    pub fn pixel(&self, x: usize) -> &[f32] {
        &self.data[self.offsets[x] * SAMPLE_STRIDE..self.offsets[x + 1] * SAMPLE_STRIDE]
    }

    /// Pixel `x`'s samples, decoded.
    pub fn samples(&self, x: usize) -> impl Iterator<Item = DeepSample> + '_ {
        self.pixel(x)
            .chunks_exact(SAMPLE_STRIDE)
            .map(DeepSample::from_slice)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn total_samples(&self) -> usize {
        self.data.len() / SAMPLE_STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether any sample spans a positive depth interval.
    pub fn has_volume(&self) -> bool {
        self.data.chunks_exact(SAMPLE_STRIDE).any(|s| s[5] > s[4])
    }

    /// Point-sample fallback for sources without a ZBack lane: copy each
    /// sample's Z into its ZBack slot.
    pub fn fill_missing_z_back(&mut self) {
        for s in self.data.chunks_exact_mut(SAMPLE_STRIDE) {
            s[5] = s[4];
        }
    }

    /// Empty the row, keeping the float block's capacity for reuse.
    pub fn clear(&mut self) {
        self.width = 0;
        self.counts.clear();
        self.offsets.clear();
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_builds_prefix_offsets() {
        let mut row = DeepRow::default();
        row.allocate(4, &[2, 0, 3, 1]);
        assert_eq!(row.total_samples(), 6);
        assert_eq!(row.data().len(), 6 * SAMPLE_STRIDE);
        assert_eq!(row.pixel(0).len(), 2 * SAMPLE_STRIDE);
        assert_eq!(row.pixel(1).len(), 0);
        assert_eq!(row.pixel(2).len(), 3 * SAMPLE_STRIDE);
        assert_eq!(row.pixel(3).len(), SAMPLE_STRIDE);
    }

    #[test]
    fn pixel_slices_address_the_right_samples() {
        let mut row = DeepRow::default();
        row.allocate(3, &[1, 2, 1]);
        for (i, s) in row.data_mut().chunks_exact_mut(SAMPLE_STRIDE).enumerate() {
            DeepSample::point(i as f32, 0.0, 0.0, 0.0, 1.0).write_to(s);
        }
        let mid: Vec<f32> = row.samples(1).map(|s| s.z_front).collect();
        assert_eq!(mid, vec![1.0, 2.0]);
        let last: Vec<f32> = row.samples(2).map(|s| s.z_front).collect();
        assert_eq!(last, vec![3.0]);
    }

    #[test]
    fn append_mode_tracks_counts_and_offsets() {
        let mut row = DeepRow::default();
        row.allocate_for_append(3, 4);
        row.push_pixel(0, &[DeepSample::point(1.0, 0.0, 0.0, 0.0, 1.0)]);
        row.push_pixel(1, &[]);
        row.push_pixel(
            2,
            &[
                DeepSample::point(2.0, 0.0, 0.0, 0.0, 1.0),
                DeepSample::point(3.0, 0.0, 0.0, 0.0, 1.0),
            ],
        );
        assert_eq!(row.counts(), &[1, 0, 2]);
        assert_eq!(row.total_samples(), 3);
        assert_eq!(row.samples(2).map(|s| s.z_front).collect::<Vec<_>>(), vec![
            2.0, 3.0
        ]);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut row = DeepRow::default();
        row.allocate(2, &[8, 8]);
        let cap = row.data.capacity();
        row.clear();
        assert!(row.is_empty());
        assert_eq!(row.data.capacity(), cap);
        row.allocate(2, &[4, 4]);
        assert_eq!(row.data.capacity(), cap);
    }

    #[test]
    fn z_back_fallback_copies_front_depth() {
        let mut row = DeepRow::default();
        row.allocate(1, &[2]);
        row.data_mut().copy_from_slice(&[
            1.0, 0.0, 0.0, 1.0, 5.0, 0.0, //
            0.0, 1.0, 0.0, 1.0, 9.0, 0.0,
        ]);
        assert!(!row.has_volume());
        row.fill_missing_z_back();
        let zs: Vec<(f32, f32)> = row.samples(0).map(|s| (s.z_front, s.z_back)).collect();
        assert_eq!(zs, vec![(5.0, 5.0), (9.0, 9.0)]);
    }
}
