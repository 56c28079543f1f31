#![forbid(unsafe_code)]

mod dzr;
mod error;
mod flatten;
mod merge;
mod output;
mod pipeline;
mod ring;
mod row;
mod sample;
mod sink;
mod source;

pub use dzr::{DzrReader, DzrWriter};
pub use error::{DeepcompError, DeepcompResult};
pub use flatten::{FlatRaster, OPACITY_CUTOFF, flatten_pixel};
pub use merge::{PixelMerger, SourcedSample, combine, merge_within_epsilon, sort_by_depth};
pub use output::{ensure_parent_dir, linear_to_srgb_u8, raster_to_srgb8, write_flat_exr, write_png};
pub use pipeline::{
    DEFAULT_CHUNK, DEFAULT_WINDOW, PipelineOptions, composite, composite_with_sink,
};
pub use ring::{RowStatus, StatusBoard};
pub use row::DeepRow;
pub use sample::{DeepSample, SAMPLE_STRIDE, depth_order};
pub use sink::{DeepRowSink, DeepSinkConfig, InMemoryDeepSink};
pub use source::{BufferSource, DeepSource};
