//! Per-pixel merge kernels: depth sort, near-depth merging, and volumetric
//! splitting with uniform interspersion.

use smallvec::SmallVec;

use crate::sample::{DeepSample, depth_order};

/// Combine two samples treated as co-located: coverages compose as
/// `1 - (1-a1)(1-a2)`, premultiplied color adds, the depth interval is the
/// union of the two.
pub fn combine(s1: DeepSample, s2: DeepSample) -> DeepSample {
    DeepSample {
        r: s1.r + s2.r,
        g: s1.g + s2.g,
        b: s1.b + s2.b,
        a: 1.0 - (1.0 - s1.a) * (1.0 - s2.a),
        z_front: s1.z_front.min(s2.z_front),
        z_back: s1.z_back.max(s2.z_back),
    }
}

/// Sort ascending by `(z_front, z_back)`.
pub fn sort_by_depth(samples: &mut [DeepSample]) {
    samples.sort_unstable_by(depth_order);
}

/// Collapse runs of consecutive sorted samples whose front and back depths
/// both lie within `epsilon`. No-op when `epsilon <= 0`.
pub fn merge_within_epsilon(samples: &mut Vec<DeepSample>, epsilon: f32) {
    if epsilon <= 0.0 || samples.len() < 2 {
        return;
    }
    let mut kept = 0usize;
    for i in 1..samples.len() {
        let cur = samples[i];
        let acc = samples[kept];
        if (acc.z_front - cur.z_front).abs() < epsilon && (acc.z_back - cur.z_back).abs() < epsilon
        {
            samples[kept] = combine(acc, cur);
        } else {
            kept += 1;
            samples[kept] = cur;
        }
    }
    samples.truncate(kept + 1);
}

/// A gathered sample tagged with the input it came from. Source indices keep
/// the co-located combination order deterministic.
#[derive(Clone, Copy, Debug)]
pub struct SourcedSample {
    pub sample: DeepSample,
    pub source: u32,
}

/// Per-pixel merge driver with reusable scratch buffers.
///
/// `run` applies, in order: volumetric splitting when overlapping volume
/// samples are present, the depth sort, and near-depth merging when the
/// threshold is positive. The split at most doubles the pixel's sample count
/// (after co-located bins are combined, a pixel with `P` points and `V`
/// volumes holds at most `P + 2V - 1` samples); merging only shrinks it.
#[derive(Debug, Default)]
pub struct PixelMerger {
    staging: Vec<SourcedSample>,
    merged: Vec<DeepSample>,
    bins: Vec<SourcedSample>,
    boundaries: SmallVec<[f32; 16]>,
}

impl PixelMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.staging.clear();
    }

    pub fn push(&mut self, source: u32, sample: DeepSample) {
        self.staging.push(SourcedSample { sample, source });
    }

    pub fn len(&self) -> usize {
        self.staging.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    /// Merge the gathered samples and return the pixel's final sample list.
    pub fn run(&mut self, merge_threshold: f32) -> &[DeepSample] {
        self.merged.clear();
        if self.staging.is_empty() {
            return &self.merged;
        }
        if self.any_volume_overlap() {
            self.split_volumes();
        } else {
            self.merged.extend(self.staging.iter().map(|s| s.sample));
        }
        sort_by_depth(&mut self.merged);
        merge_within_epsilon(&mut self.merged, merge_threshold);
        &self.merged
    }

    /// Two volumes overlap when each starts before the other ends.
    fn any_volume_overlap(&self) -> bool {
        let mut vols: SmallVec<[(f32, f32); 16]> = self
            .staging
            .iter()
            .filter(|s| s.sample.is_volume())
            .map(|s| (s.sample.z_front, s.sample.z_back))
            .collect();
        if vols.len() < 2 {
            return false;
        }
        vols.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        let mut reach = vols[0].1;
        for &(z_front, z_back) in &vols[1..] {
            if z_front < reach {
                return true;
            }
            reach = reach.max(z_back);
        }
        false
    }

    /// Split every volume at every volume edge falling strictly inside it,
    /// then combine co-located sub-intervals. A cut strictly inside a volume
    /// always comes from a volume overlapping it, so disjoint volumes pass
    /// through whole. Point samples pass through untouched and never cut a
    /// volume.
    fn split_volumes(&mut self) {
        self.boundaries.clear();
        for s in &self.staging {
            if s.sample.is_volume() {
                self.boundaries.push(s.sample.z_front);
                self.boundaries.push(s.sample.z_back);
            }
        }
        self.boundaries.sort_unstable_by(f32::total_cmp);
        self.boundaries.dedup();

        self.bins.clear();
        for s in &self.staging {
            if !s.sample.is_volume() {
                self.merged.push(s.sample);
                continue;
            }
            let (z_front, z_back) = (s.sample.z_front, s.sample.z_back);
            let lo = self.boundaries.partition_point(|&b| b <= z_front);
            let hi = self.boundaries.partition_point(|&b| b < z_back);
            if lo == hi {
                self.bins.push(*s);
                continue;
            }
            let mut prev = z_front;
            for &cut in &self.boundaries[lo..hi] {
                self.bins.push(SourcedSample {
                    sample: sub_sample(s.sample, prev, cut),
                    source: s.source,
                });
                prev = cut;
            }
            self.bins.push(SourcedSample {
                sample: sub_sample(s.sample, prev, z_back),
                source: s.source,
            });
        }

        // Identical (z_front, z_back) bins collapse to one sample:
        // contributions from the same source combine first, then the
        // per-source results combine in source order.
        self.bins.sort_unstable_by(|p, q| {
            depth_order(&p.sample, &q.sample).then(p.source.cmp(&q.source))
        });
        let mut i = 0;
        while i < self.bins.len() {
            let mut j = i + 1;
            while j < self.bins.len()
                && self.bins[j].sample.z_front == self.bins[i].sample.z_front
                && self.bins[j].sample.z_back == self.bins[i].sample.z_back
            {
                j += 1;
            }
            if let Some(combined) = combine_bin(&self.bins[i..j]) {
                self.merged.push(combined);
            }
            i = j;
        }
    }
}

fn combine_bin(bin: &[SourcedSample]) -> Option<DeepSample> {
    let mut out: Option<DeepSample> = None;
    let mut i = 0;
    while i < bin.len() {
        let mut per_source = bin[i].sample;
        let mut j = i + 1;
        while j < bin.len() && bin[j].source == bin[i].source {
            per_source = combine(per_source, bin[j].sample);
            j += 1;
        }
        out = Some(match out {
            Some(acc) => combine(acc, per_source),
            None => per_source,
        });
        i = j;
    }
    out
}

/// Restrict a uniform-density volume to `[z0, z1]`: Beer-Lambert coverage
/// `1 - (1-a)^(L/L_src)`, premultiplied color scaled by `a_sub / a` (or by
/// the analytic limit `L / L_src` when the source coverage is zero).
fn sub_sample(s: DeepSample, z0: f32, z1: f32) -> DeepSample {
    let ratio = (z1 - z0) / s.thickness();
    let a_sub = 1.0 - (1.0 - s.a).powf(ratio);
    let scale = if s.a > 0.0 { a_sub / s.a } else { ratio };
    DeepSample {
        r: s.r * scale,
        g: s.g * scale,
        b: s.b * scale,
        a: a_sub,
        z_front: z0,
        z_back: z1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }

    #[test]
    fn combine_composes_coverage_and_sums_color() {
        let s1 = DeepSample::point(3.0, 0.3, 0.0, 0.0, 0.3);
        let s2 = DeepSample::point(3.0, 0.3, 0.0, 0.0, 0.3);
        let out = combine(s1, s2);
        approx(out.a, 0.51);
        approx(out.r, 0.6);
        assert_eq!(out.z_front, 3.0);
        assert_eq!(out.z_back, 3.0);
    }

    #[test]
    fn epsilon_zero_is_a_noop() {
        let mut samples = vec![
            DeepSample::point(3.0, 0.3, 0.0, 0.0, 0.3),
            DeepSample::point(3.0, 0.3, 0.0, 0.0, 0.3),
        ];
        merge_within_epsilon(&mut samples, 0.0);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn near_depth_merge_collapses_runs() {
        let mut samples = vec![
            DeepSample::point(3.0, 0.3, 0.0, 0.0, 0.3),
            DeepSample::point(3.0004, 0.3, 0.0, 0.0, 0.3),
            DeepSample::point(7.0, 0.0, 1.0, 0.0, 1.0),
        ];
        merge_within_epsilon(&mut samples, 0.001);
        assert_eq!(samples.len(), 2);
        approx(samples[0].a, 0.51);
        approx(samples[0].r, 0.6);
        assert_eq!(samples[1].g, 1.0);
    }

    #[test]
    fn disjoint_volumes_pass_through_unsplit() {
        let mut merger = PixelMerger::new();
        merger.push(0, DeepSample::volume(0.0, 1.0, 0.1, 0.0, 0.0, 0.2));
        merger.push(1, DeepSample::volume(5.0, 6.0, 0.0, 0.1, 0.0, 0.2));
        merger.push(1, DeepSample::point(3.0, 0.0, 0.0, 0.5, 0.5));
        let out = merger.run(0.0).to_vec();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].z_back, 1.0);
        assert_eq!(out[1].z_front, 3.0);
        assert_eq!(out[2].z_front, 5.0);
    }

    #[test]
    fn edge_adjacent_volumes_do_not_split() {
        // Stacked slices share exact edge values; touching is not overlap,
        // so they must pass through whole.
        let mut merger = PixelMerger::new();
        merger.push(0, DeepSample::volume(0.0, 1.0, 0.1, 0.1, 0.1, 0.2));
        merger.push(0, DeepSample::volume(1.0, 2.0, 0.1, 0.1, 0.1, 0.2));
        merger.push(0, DeepSample::volume(2.0, 3.0, 0.1, 0.1, 0.1, 0.2));
        let out = merger.run(0.0).to_vec();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], DeepSample::volume(0.0, 1.0, 0.1, 0.1, 0.1, 0.2));
        assert_eq!(out[1].z_front, 1.0);
        assert_eq!(out[2].z_back, 3.0);
    }

    #[test]
    fn volume_overlapping_stacked_slices_splits_on_their_edges() {
        // A beam straddling two slice edges: each slice keeps (or splits to)
        // bins aligned exactly on the shared edges, and total extinction
        // per source is preserved.
        let mut merger = PixelMerger::new();
        for i in 0..4 {
            merger.push(
                0,
                DeepSample::volume(i as f32, i as f32 + 1.0, 0.2, 0.2, 0.2, 0.2),
            );
        }
        merger.push(1, DeepSample::volume(0.5, 2.5, 0.3, 0.0, 0.0, 0.3));
        let out = merger.run(0.0).to_vec();

        // [0,.5] [.5,1] [1,2] [2,2.5] [2.5,3] [3,4]
        assert_eq!(out.len(), 6);
        for pair in out.windows(2) {
            assert_eq!(pair[0].z_back, pair[1].z_front);
        }
        let transmitted: f32 = out.iter().map(|s| 1.0 - s.a).product();
        assert!((transmitted - 0.8f32.powi(4) * 0.7).abs() < 1e-5);
    }

    #[test]
    fn overlapping_volumes_split_into_three_bins() {
        // [0,10] red over [5,15] green: bins [0,5], [5,10] (combined), [10,15].
        let mut merger = PixelMerger::new();
        merger.push(0, DeepSample::volume(0.0, 10.0, 0.5, 0.0, 0.0, 0.5));
        merger.push(1, DeepSample::volume(5.0, 15.0, 0.0, 0.5, 0.0, 0.5));
        let out = merger.run(0.0).to_vec();
        assert_eq!(out.len(), 3);

        let half = 1.0 - 0.5f32.sqrt();
        assert_eq!((out[0].z_front, out[0].z_back), (0.0, 5.0));
        approx(out[0].a, half);
        approx(out[0].r, half);
        assert_eq!(out[0].g, 0.0);

        assert_eq!((out[1].z_front, out[1].z_back), (5.0, 10.0));
        approx(out[1].a, 1.0 - (1.0 - half) * (1.0 - half));
        approx(out[1].r, half);
        approx(out[1].g, half);

        assert_eq!((out[2].z_front, out[2].z_back), (10.0, 15.0));
        approx(out[2].a, half);
        approx(out[2].g, half);
        assert_eq!(out[2].r, 0.0);
    }

    #[test]
    fn identical_volumes_collapse_to_one_bin() {
        let mut merger = PixelMerger::new();
        merger.push(0, DeepSample::volume(2.0, 4.0, 0.2, 0.0, 0.0, 0.4));
        merger.push(1, DeepSample::volume(2.0, 4.0, 0.2, 0.0, 0.0, 0.4));
        let out = merger.run(0.0).to_vec();
        assert_eq!(out.len(), 1);
        approx(out[0].a, 1.0 - 0.6 * 0.6);
        approx(out[0].r, 0.4);
    }

    #[test]
    fn point_inside_a_volume_leaves_it_intact() {
        let mut merger = PixelMerger::new();
        merger.push(0, DeepSample::volume(0.0, 10.0, 0.5, 0.0, 0.0, 0.5));
        merger.push(0, DeepSample::volume(0.0, 10.0, 0.0, 0.5, 0.0, 0.5));
        merger.push(1, DeepSample::point(5.0, 0.0, 0.0, 1.0, 1.0));
        let out = merger.run(0.0).to_vec();
        // The two identical volumes combine; the point slots in between by
        // sort order without cutting them.
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].z_front, out[0].z_back), (0.0, 10.0));
        approx(out[0].a, 0.75);
        assert_eq!((out[1].z_front, out[1].z_back), (5.0, 5.0));
    }

    #[test]
    fn split_preserves_total_extinction() {
        // Splitting a volume must not change how much light it absorbs:
        // transmittance through the pieces multiplies back to the original.
        let v = DeepSample::volume(0.0, 8.0, 0.3, 0.0, 0.0, 0.6);
        let mut merger = PixelMerger::new();
        merger.push(0, v);
        merger.push(1, DeepSample::volume(2.0, 5.0, 0.0, 0.0, 0.0, 0.0));
        let out = merger.run(0.0).to_vec();
        let transmitted: f32 = out.iter().map(|s| 1.0 - s.a).product();
        approx(transmitted, 1.0 - 0.6);
    }

    #[test]
    fn opaque_source_yields_opaque_sub_intervals() {
        let v = DeepSample::volume(0.0, 4.0, 1.0, 1.0, 1.0, 1.0);
        let sub = sub_sample(v, 0.0, 1.0);
        assert_eq!(sub.a, 1.0);
        assert_eq!(sub.r, 1.0);
    }
}
