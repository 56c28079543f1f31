//! The three-stage scanline pipeline: loader → merger → flattener over a
//! sliding window of row slots.
//!
//! Each stage runs on its own thread and processes rows in strictly
//! increasing order; the per-row status lattice is the only synchronization
//! between them. Memory stays bounded at `WINDOW * (N + 1)` row buffers plus
//! the output raster: the loader throttles itself against the flattener's
//! progress `WINDOW` rows back.

use parking_lot::{Mutex, MutexGuard};

use crate::error::{DeepcompError, DeepcompResult};
use crate::flatten::{FlatRaster, flatten_pixel};
use crate::merge::PixelMerger;
use crate::ring::{RowStatus, StatusBoard};
use crate::row::DeepRow;
use crate::sink::{DeepRowSink, DeepSinkConfig};
use crate::source::DeepSource;

pub const DEFAULT_WINDOW: usize = 32;
pub const DEFAULT_CHUNK: usize = 16;

/// Pipeline tuning knobs.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Near-depth merge threshold; `0` disables merging.
    pub merge_threshold: f32,
    /// Per-source Z offset added to every sample before merging. Missing
    /// entries default to 0.
    pub z_offsets: Vec<f32>,
    /// Sliding-window size in rows (slots per ring). Must be at least 2 and
    /// at least `chunk`.
    pub window: usize,
    /// Loader batch size in rows.
    pub chunk: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            merge_threshold: 0.0,
            z_offsets: Vec::new(),
            window: DEFAULT_WINDOW,
            chunk: DEFAULT_CHUNK,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self, num_sources: usize) -> DeepcompResult<()> {
        if self.window < 2 {
            return Err(DeepcompError::validation("window must be at least 2 rows"));
        }
        if self.chunk == 0 {
            return Err(DeepcompError::validation("chunk must be at least 1 row"));
        }
        if self.window < self.chunk {
            return Err(DeepcompError::validation(
                "window must be at least as large as chunk",
            ));
        }
        if !self.merge_threshold.is_finite() || self.merge_threshold < 0.0 {
            return Err(DeepcompError::validation(
                "merge threshold must be a finite non-negative number",
            ));
        }
        if self.z_offsets.len() > num_sources {
            return Err(DeepcompError::validation(format!(
                "{} z offsets given for {num_sources} inputs",
                self.z_offsets.len()
            )));
        }
        Ok(())
    }
}

/// Composite `sources` into a flat premultiplied RGBA raster.
pub fn composite(
    sources: Vec<Box<dyn DeepSource>>,
    opts: &PipelineOptions,
) -> DeepcompResult<FlatRaster> {
    composite_with_sink(sources, opts, None)
}

/// [`composite`], additionally streaming every merged deep row into
/// `deep_sink` before it is released.
pub fn composite_with_sink(
    mut sources: Vec<Box<dyn DeepSource>>,
    opts: &PipelineOptions,
    deep_sink: Option<&mut dyn DeepRowSink>,
) -> DeepcompResult<FlatRaster> {
    if sources.is_empty() {
        return Err(DeepcompError::validation(
            "at least one input source is required",
        ));
    }
    opts.validate(sources.len())?;

    let width = sources[0].width();
    let height = sources[0].height();
    if width == 0 || height == 0 {
        return Err(DeepcompError::source(format!(
            "input 0 has empty dimensions {width}x{height}"
        )));
    }
    for (i, src) in sources.iter().enumerate().skip(1) {
        if src.width() != width || src.height() != height {
            return Err(DeepcompError::source(format!(
                "input {i} is {}x{}, expected {width}x{height}",
                src.width(),
                src.height()
            )));
        }
    }

    let num_sources = sources.len();
    let z_offsets: Vec<f32> = (0..num_sources)
        .map(|i| opts.z_offsets.get(i).copied().unwrap_or(0.0))
        .collect();

    let board = StatusBoard::new(height as usize, opts.window);
    let input_rings: Vec<Vec<Mutex<DeepRow>>> = (0..num_sources)
        .map(|_| {
            (0..opts.window)
                .map(|_| Mutex::new(DeepRow::default()))
                .collect()
        })
        .collect();
    let merged_ring: Vec<Mutex<DeepRow>> = (0..opts.window)
        .map(|_| Mutex::new(DeepRow::default()))
        .collect();
    let mut raster = FlatRaster::new(width, height);

    tracing::debug!(
        width,
        height,
        inputs = num_sources,
        window = opts.window,
        chunk = opts.chunk,
        "starting pipeline"
    );

    {
        let board = &board;
        let input_rings = &input_rings;
        let merged_ring = &merged_ring;
        let sources = &mut sources;
        let raster = &mut raster;
        let z_offsets = &z_offsets;
        let merge_threshold = opts.merge_threshold;
        let chunk = opts.chunk;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let result = run_loader(sources, board, input_rings, chunk);
                finish_stage("loader", result, board);
            });
            scope.spawn(move || {
                let result =
                    run_merger(board, input_rings, merged_ring, z_offsets, merge_threshold);
                finish_stage("merger", result, board);
            });
            scope.spawn(move || {
                let result = run_flattener(board, merged_ring, input_rings, raster, deep_sink);
                finish_stage("flattener", result, board);
            });
        });
    }

    if let Some(err) = board.take_failure() {
        return Err(err);
    }
    if board.is_cancelled() {
        return Err(DeepcompError::Cancelled);
    }
    Ok(raster)
}

fn finish_stage(stage: &str, result: DeepcompResult<()>, board: &StatusBoard) {
    match result {
        Ok(()) => tracing::debug!("{stage} finished"),
        Err(DeepcompError::Cancelled) => tracing::debug!("{stage} cancelled"),
        Err(err) => {
            tracing::debug!("{stage} failed: {err}");
            board.fail(err);
        }
    }
}

/// Stage 1: pull rows from every source into the input ring, `chunk` rows at
/// a time with each source read contiguously, publishing `Loaded` in row
/// order.
fn run_loader(
    sources: &mut [Box<dyn DeepSource>],
    board: &StatusBoard,
    rings: &[Vec<Mutex<DeepRow>>],
    chunk: usize,
) -> DeepcompResult<()> {
    let window = board.window();
    let height = board.height();
    let width = sources[0].width() as usize;
    let mut counts = vec![0u32; width];

    let mut chunk_start = 0usize;
    while chunk_start < height {
        let chunk_end = (chunk_start + chunk).min(height);

        // The deepest slot this chunk reuses last held row
        // `chunk_end - 1 - window`; flattened statuses advance in row order,
        // so waiting on that row covers every slot the chunk touches.
        if chunk_end - 1 >= window {
            board.wait_until(chunk_end - 1 - window, RowStatus::Flattened)?;
        }

        for (i, source) in sources.iter_mut().enumerate() {
            let needs_z_back = !source.has_z_back();
            for y in chunk_start..chunk_end {
                source.sample_counts(y as u32, &mut counts)?;
                let mut slot = rings[i][board.slot_of(y)].lock();
                slot.allocate(width, &counts);
                source.read_row(y as u32, &counts, slot.data_mut())?;
                if needs_z_back {
                    slot.fill_missing_z_back();
                }
            }
        }

        for y in chunk_start..chunk_end {
            board.publish(y, RowStatus::Loaded);
        }
        tracing::debug!(rows = chunk_end - chunk_start, through = chunk_end, "loaded");
        chunk_start = chunk_end;
    }
    Ok(())
}

/// Stage 2: gather each pixel's samples across all inputs, run the merge
/// kernels, and write the merged row into its slot.
fn run_merger(
    board: &StatusBoard,
    rings: &[Vec<Mutex<DeepRow>>],
    merged_ring: &[Mutex<DeepRow>],
    z_offsets: &[f32],
    merge_threshold: f32,
) -> DeepcompResult<()> {
    let mut merger = PixelMerger::new();
    for y in 0..board.height() {
        board.wait_until(y, RowStatus::Loaded)?;
        let slot = board.slot_of(y);
        let inputs: Vec<MutexGuard<'_, DeepRow>> =
            rings.iter().map(|ring| ring[slot].lock()).collect();

        // Sized once per row: splitting at most doubles the sample count,
        // merging only shrinks it, so the block never grows mid-row.
        let total: usize = inputs.iter().map(|row| row.total_samples()).sum();
        let split_factor = if inputs.iter().any(|row| row.has_volume()) {
            2
        } else {
            1
        };
        let width = inputs[0].width();

        let mut merged = merged_ring[slot].lock();
        merged.allocate_for_append(width, total * split_factor);
        for x in 0..width {
            merger.clear();
            for (i, row) in inputs.iter().enumerate() {
                for sample in row.samples(x) {
                    merger.push(i as u32, sample.offset_z(z_offsets[i]));
                }
            }
            merged.push_pixel(x, merger.run(merge_threshold));
        }

        drop(merged);
        drop(inputs);
        board.publish(y, RowStatus::Merged);
    }
    Ok(())
}

/// Stage 3: flatten each merged row into the raster, hand it to the optional
/// deep sink, release the row's slots, and publish `Flattened`.
fn run_flattener(
    board: &StatusBoard,
    merged_ring: &[Mutex<DeepRow>],
    input_rings: &[Vec<Mutex<DeepRow>>],
    raster: &mut FlatRaster,
    mut sink: Option<&mut dyn DeepRowSink>,
) -> DeepcompResult<()> {
    if let Some(sink) = sink.as_deref_mut() {
        sink.begin(DeepSinkConfig {
            width: raster.width,
            height: raster.height,
        })?;
    }

    for y in 0..board.height() {
        board.wait_until(y, RowStatus::Merged)?;
        let slot = board.slot_of(y);
        let mut merged = merged_ring[slot].lock();

        let out = raster.row_mut(y as u32);
        for x in 0..merged.width() {
            out[x * 4..x * 4 + 4].copy_from_slice(&flatten_pixel(merged.samples(x)));
        }

        if let Some(sink) = sink.as_deref_mut() {
            sink.push_row(y as u32, &merged)?;
        }

        merged.clear();
        drop(merged);
        for ring in input_rings {
            ring[slot].lock().clear();
        }
        board.publish(y, RowStatus::Flattened);
    }

    if let Some(sink) = sink.as_deref_mut() {
        sink.end()?;
    }
    Ok(())
}
