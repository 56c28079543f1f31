use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;

use deepcomp::{
    DeepSource, DzrReader, DzrWriter, PipelineOptions, composite, composite_with_sink,
    ensure_parent_dir, write_flat_exr, write_png,
};

/// Composite deep raster images into a single flat RGBA preview.
#[derive(Parser, Debug)]
#[command(name = "deepcomp", version)]
struct Cli {
    /// Input deep rasters followed by the output prefix. With --mod-offset,
    /// any input may be followed by a float Z offset for that input.
    #[arg(required = true)]
    paths: Vec<String>,

    /// Interpret bare floats after an input path as that input's Z offset.
    #[arg(long)]
    mod_offset: bool,

    /// Write the merged deep output to <prefix>_merged.dzr.
    #[arg(long)]
    deep_output: bool,

    /// Write the flattened EXR (default: on).
    #[arg(long, overrides_with = "no_flat_output")]
    flat_output: bool,

    /// Skip the flattened EXR.
    #[arg(long)]
    no_flat_output: bool,

    /// Write the PNG preview (default: on).
    #[arg(long, overrides_with = "no_png_output")]
    png_output: bool,

    /// Skip the PNG preview.
    #[arg(long)]
    no_png_output: bool,

    /// Depth epsilon for merging near-coincident samples; 0 disables it.
    #[arg(long, default_value_t = 0.001)]
    merge_threshold: f32,

    /// Detailed logging.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    // clap exits with 2 on usage errors; this tool promises 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "deepcomp=debug"
    } else {
        "deepcomp=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let (inputs, z_offsets, prefix) = split_positionals(&cli.paths, cli.mod_offset)?;

    let mut sources: Vec<Box<dyn DeepSource>> = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let reader =
            DzrReader::open(path).with_context(|| format!("open input '{}'", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            width = reader.width(),
            height = reader.height(),
            z_back = reader.has_z_back(),
            "opened deep input"
        );
        sources.push(Box::new(reader));
    }

    let opts = PipelineOptions {
        merge_threshold: cli.merge_threshold,
        z_offsets,
        ..PipelineOptions::default()
    };

    let flat_output = cli.flat_output || !cli.no_flat_output;
    let png_output = cli.png_output || !cli.no_png_output;

    let raster = if cli.deep_output {
        let merged_path = PathBuf::from(format!("{prefix}_merged.dzr"));
        ensure_parent_dir(&merged_path)?;
        let mut writer = DzrWriter::create(&merged_path)?;
        let raster = composite_with_sink(sources, &opts, Some(&mut writer))?;
        eprintln!("wrote {}", merged_path.display());
        raster
    } else {
        composite(sources, &opts)?
    };

    if flat_output {
        let path = PathBuf::from(format!("{prefix}_flat.exr"));
        write_flat_exr(&raster, &path)?;
        eprintln!("wrote {}", path.display());
    }

    if png_output {
        let path = PathBuf::from(format!("{prefix}.png"));
        write_png(&raster, &path)?;
        eprintln!("wrote {}", path.display());
    }

    Ok(())
}

/// Split the positional arguments into input paths, per-input Z offsets, and
/// the trailing output prefix. With `mod_offset`, a bare float after an input
/// is that input's offset; inputs without one default to 0.
fn split_positionals(
    paths: &[String],
    mod_offset: bool,
) -> anyhow::Result<(Vec<PathBuf>, Vec<f32>, String)> {
    let mut inputs: Vec<String> = Vec::new();
    let mut offsets: Vec<f32> = Vec::new();

    for arg in paths {
        if mod_offset && let Ok(dz) = arg.parse::<f32>() {
            if inputs.len() != offsets.len() + 1 {
                anyhow::bail!("Z offset '{arg}' does not follow an input path");
            }
            offsets.push(dz);
            continue;
        }
        if mod_offset && inputs.len() == offsets.len() + 1 {
            offsets.push(0.0);
        }
        inputs.push(arg.clone());
    }
    if mod_offset && inputs.len() == offsets.len() + 1 {
        offsets.push(0.0);
    }

    let prefix = inputs.pop().context("missing output prefix")?;
    if inputs.is_empty() {
        anyhow::bail!("need at least one input file and an output prefix");
    }
    offsets.truncate(inputs.len());

    Ok((inputs.into_iter().map(PathBuf::from).collect(), offsets, prefix))
}
