//! The DZR deep raster container: a scanline-oriented little-endian dump of
//! per-pixel sample counts plus interleaved sample floats.
//!
//! Layout: `b"DZR1"`, u32 width, u32 height, u8 flags (bit 0: samples carry
//! a ZBack lane), then per row the `width` u32 counts followed by the row's
//! interleaved f32 samples — 6 per sample (`RGBAZZb`) with the flag set,
//! 5 (`RGBAZ`) without. Everything is a single forward pass, so the reader
//! serves rows strictly in order and rejects anything else.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{DeepcompError, DeepcompResult};
use crate::row::DeepRow;
use crate::sample::SAMPLE_STRIDE;
use crate::sink::{DeepRowSink, DeepSinkConfig};
use crate::source::DeepSource;

const MAGIC: &[u8; 4] = b"DZR1";
const FLAG_Z_BACK: u8 = 0b0000_0001;

/// Streaming reader over a DZR file. Implements [`DeepSource`].
#[derive(Debug)]
pub struct DzrReader {
    file: BufReader<File>,
    path: PathBuf,
    width: u32,
    height: u32,
    has_z_back: bool,
    next_row: u32,
    /// Total samples announced by the last `sample_counts` call, consumed by
    /// the matching `read_row`.
    pending_samples: Option<usize>,
}

impl DzrReader {
    pub fn open(path: impl AsRef<Path>) -> DeepcompResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| DeepcompError::source(format!("open '{}': {e}", path.display())))?;
        let mut file = BufReader::new(file);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|e| DeepcompError::source(format!("read '{}': {e}", path.display())))?;
        if &magic != MAGIC {
            return Err(DeepcompError::source(format!(
                "'{}' is not a deep raster (bad magic)",
                path.display()
            )));
        }

        let header_err =
            |e: std::io::Error| DeepcompError::source(format!("read '{}': {e}", path.display()));
        let width = file.read_u32::<LittleEndian>().map_err(header_err)?;
        let height = file.read_u32::<LittleEndian>().map_err(header_err)?;
        let flags = file.read_u8().map_err(header_err)?;
        if width == 0 || height == 0 {
            return Err(DeepcompError::source(format!(
                "'{}' has empty dimensions {width}x{height}",
                path.display()
            )));
        }

        Ok(Self {
            file,
            path,
            width,
            height,
            has_z_back: flags & FLAG_Z_BACK != 0,
            next_row: 0,
            pending_samples: None,
        })
    }

    fn read_err(&self, e: std::io::Error, row: u32) -> DeepcompError {
        DeepcompError::read(format!("'{}' row {row}: {e}", self.path.display()))
    }
}

impl DeepSource for DzrReader {
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
        if row != self.next_row || self.pending_samples.is_some() {
            return Err(DeepcompError::read(format!(
                "'{}': out-of-order read of row {row} (expected row {})",
                self.path.display(),
                self.next_row
            )));
        }
        if out.len() != self.width as usize {
            return Err(DeepcompError::read(format!(
                "'{}': count buffer holds {} pixels, image is {} wide",
                self.path.display(),
                out.len(),
                self.width
            )));
        }
        for c in out.iter_mut() {
            *c = self
                .file
                .read_u32::<LittleEndian>()
                .map_err(|e| DeepcompError::read(format!("'{}' row {row}: {e}", self.path.display())))?;
        }
        self.pending_samples = Some(out.iter().map(|&c| c as usize).sum());
        Ok(())
    }

    fn read_row(&mut self, row: u32, _counts: &[u32], data: &mut [f32]) -> DeepcompResult<()> {
        let Some(total) = self.pending_samples.take() else {
            return Err(DeepcompError::read(format!(
                "'{}': read_row({row}) without a preceding sample_counts",
                self.path.display()
            )));
        };
        if row != self.next_row || data.len() != total * SAMPLE_STRIDE {
            return Err(DeepcompError::read(format!(
                "'{}' row {row}: destination holds {} floats, row has {} samples",
                self.path.display(),
                data.len(),
                total
            )));
        }

        if self.has_z_back {
            self.file
                .read_f32_into::<LittleEndian>(data)
                .map_err(|e| self.read_err(e, row))?;
        } else {
            // 5-float layout: the ZBack lane stays unspecified; the loader
            // substitutes Z before publishing.
            for sample in data.chunks_exact_mut(SAMPLE_STRIDE) {
                self.file
                    .read_f32_into::<LittleEndian>(&mut sample[..5])
                    .map_err(|e| self.read_err(e, row))?;
            }
        }
        self.next_row += 1;
        Ok(())
    }
}

/// Streaming writer producing a 6-float DZR file. Implements [`DeepRowSink`].
pub struct DzrWriter {
    file: BufWriter<File>,
    path: PathBuf,
    height: u32,
    rows_written: u32,
}

impl DzrWriter {
    pub fn create(path: impl AsRef<Path>) -> DeepcompResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| DeepcompError::sink(format!("create '{}': {e}", path.display())))?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
            height: 0,
            rows_written: 0,
        })
    }

    fn write_err(&self, e: std::io::Error) -> DeepcompError {
        DeepcompError::sink(format!("write '{}': {e}", self.path.display()))
    }
}

impl DeepRowSink for DzrWriter {
    fn begin(&mut self, cfg: DeepSinkConfig) -> DeepcompResult<()> {
        self.height = cfg.height;
        self.rows_written = 0;
        self.file.write_all(MAGIC).map_err(|e| self.write_err(e))?;
        self.file
            .write_u32::<LittleEndian>(cfg.width)
            .map_err(|e| self.write_err(e))?;
        self.file
            .write_u32::<LittleEndian>(cfg.height)
            .map_err(|e| self.write_err(e))?;
        self.file
            .write_u8(FLAG_Z_BACK)
            .map_err(|e| self.write_err(e))?;
        Ok(())
    }

    fn push_row(&mut self, row: u32, data: &DeepRow) -> DeepcompResult<()> {
        debug_assert_eq!(row, self.rows_written, "rows must arrive in order");
        for &c in data.counts() {
            self.file
                .write_u32::<LittleEndian>(c)
                .map_err(|e| self.write_err(e))?;
        }
        for &v in data.data() {
            self.file
                .write_f32::<LittleEndian>(v)
                .map_err(|e| self.write_err(e))?;
        }
        self.rows_written += 1;
        Ok(())
    }

    fn end(&mut self) -> DeepcompResult<()> {
        if self.rows_written != self.height {
            return Err(DeepcompError::sink(format!(
                "'{}': wrote {} of {} rows",
                self.path.display(),
                self.rows_written,
                self.height
            )));
        }
        self.file.flush().map_err(|e| self.write_err(e))
    }
}
