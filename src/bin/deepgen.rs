//! Synthetic deep scene generator: reads a JSON scene description and writes
//! one deep raster file per layer. Useful for exercising `deepcomp` without
//! renderer output on hand.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;

use deepcomp::{
    BufferSource, DeepRowSink, DeepSample, DeepSinkConfig, DeepSource, DzrWriter,
    ensure_parent_dir,
};

#[derive(Parser, Debug)]
#[command(name = "deepgen", version)]
struct Cli {
    /// Scene description JSON.
    scene: PathBuf,

    /// Directory for the generated files (default: the scene file's
    /// directory).
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Debug, serde::Deserialize)]
struct Scene {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
}

#[derive(Debug, serde::Deserialize)]
struct Layer {
    /// Output file name, relative to the output directory.
    file: String,
    #[serde(flatten)]
    shape: Shape,
}

/// Layer shapes. Positions and radii are in normalized `[0, 1]` image
/// coordinates; depths are camera-space Z. Colors are straight (not
/// premultiplied); alpha is applied during synthesis.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Shape {
    /// Full-frame hard surface at a single depth.
    Plane {
        depth: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Circular opaque region at a single depth.
    Wall {
        center: [f32; 2],
        radius: f32,
        depth: f32,
        color: [f32; 3],
    },
    /// Sphere shell: entry/exit surface samples for semi-transparent
    /// spheres, a single entry sample for opaque ones.
    Sphere {
        center: [f32; 2],
        radius: f32,
        depth_near: f32,
        depth_far: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Sphere interior as one volume sample spanning entry to exit.
    VolumeSphere {
        center: [f32; 2],
        radius: f32,
        depth_near: f32,
        depth_far: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Circular participating-media slab over a fixed depth interval.
    Fog {
        center: [f32; 2],
        radius: f32,
        depth_front: f32,
        depth_back: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Full-frame fog stacked as edge-adjacent volume slices whose density
    /// ramps with depth.
    LayeredFog {
        depth_front: f32,
        depth_back: f32,
        slices: u32,
        color: [f32; 3],
        alpha_near: f32,
        alpha_far: f32,
    },
    /// Three-face rod (side, top, front cap) with depth ramped along its
    /// length.
    Rod {
        start: [f32; 2],
        end: [f32; 2],
        width_start: f32,
        width_end: f32,
        depth_near: f32,
        depth_far: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Rectangular pane with per-pixel depth bilinearly interpolated from
    /// its corners (top-left, top-right, bottom-left, bottom-right).
    TiltedPane {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        depth_corners: [f32; 4],
        color: [f32; 3],
        alpha: f32,
    },
    /// Cone-shaped volumetric beam: soft quadratic edge fade, thickness
    /// following the circular cross-section.
    Cone {
        apex: [f32; 2],
        apex_depth: f32,
        base: [f32; 2],
        base_depth: f32,
        apex_radius: f32,
        base_radius: f32,
        color: [f32; 3],
        alpha: f32,
    },
    /// Opaque torus ring whose depth swings sinusoidally around the
    /// circumference; two rings with different phases interlock.
    Ring {
        center: [f32; 2],
        center_depth: f32,
        major_radius: f32,
        minor_radius: f32,
        depth_amplitude: f32,
        phase: f32,
        color: [f32; 3],
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let f = File::open(&cli.scene)
        .with_context(|| format!("open scene '{}'", cli.scene.display()))?;
    let scene: Scene =
        serde_json::from_reader(BufReader::new(f)).with_context(|| "parse scene JSON")?;
    if scene.width == 0 || scene.height == 0 {
        anyhow::bail!("scene dimensions must be non-zero");
    }

    let out_dir = cli
        .out_dir
        .or_else(|| cli.scene.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    for layer in &scene.layers {
        let source = synthesize(&layer.shape, scene.width, scene.height);
        let path = out_dir.join(&layer.file);
        ensure_parent_dir(&path)?;
        write_dzr(&source, &path)?;
        eprintln!("wrote {}", path.display());
    }

    Ok(())
}

fn write_dzr(source: &BufferSource, path: &Path) -> anyhow::Result<()> {
    let mut writer = DzrWriter::create(path)?;
    writer.begin(DeepSinkConfig {
        width: source.width(),
        height: source.height(),
    })?;
    for (y, row) in source.rows().iter().enumerate() {
        writer.push_row(y as u32, row)?;
    }
    writer.end()?;
    Ok(())
}

fn synthesize(shape: &Shape, width: u32, height: u32) -> BufferSource {
    BufferSource::from_fn(width, height, |x, y| {
        let nx = (x as f32 + 0.5) / width as f32;
        let ny = (y as f32 + 0.5) / height as f32;
        pixel_samples(shape, nx, ny)
    })
}

fn pixel_samples(shape: &Shape, nx: f32, ny: f32) -> Vec<DeepSample> {
    match *shape {
        Shape::Plane {
            depth,
            color: [r, g, b],
            alpha,
        } => vec![DeepSample::point(
            depth,
            r * alpha,
            g * alpha,
            b * alpha,
            alpha,
        )],
        Shape::Wall {
            center,
            radius,
            depth,
            color: [r, g, b],
        } => {
            if in_disc(nx, ny, center, radius) {
                vec![DeepSample::point(depth, r, g, b, 1.0)]
            } else {
                Vec::new()
            }
        }
        Shape::Sphere {
            center,
            radius,
            depth_near,
            depth_far,
            color: [r, g, b],
            alpha,
        } => match sphere_depths(nx, ny, center, radius, depth_near, depth_far) {
            Some((entry, exit)) if alpha < 0.99 => {
                // Half the coverage on the front surface, half on the back.
                let a = alpha * 0.5;
                vec![
                    DeepSample::point(entry, r * a, g * a, b * a, a),
                    DeepSample::point(exit, r * a, g * a, b * a, a),
                ]
            }
            Some((entry, _)) => vec![DeepSample::point(entry, r, g, b, 1.0)],
            None => Vec::new(),
        },
        Shape::VolumeSphere {
            center,
            radius,
            depth_near,
            depth_far,
            color: [r, g, b],
            alpha,
        } => match sphere_depths(nx, ny, center, radius, depth_near, depth_far) {
            Some((entry, exit)) => vec![DeepSample::volume(
                entry,
                exit,
                r * alpha,
                g * alpha,
                b * alpha,
                alpha,
            )],
            None => Vec::new(),
        },
        Shape::Fog {
            center,
            radius,
            depth_front,
            depth_back,
            color: [r, g, b],
            alpha,
        } => {
            if in_disc(nx, ny, center, radius) {
                vec![DeepSample::volume(
                    depth_front,
                    depth_back,
                    r * alpha,
                    g * alpha,
                    b * alpha,
                    alpha,
                )]
            } else {
                Vec::new()
            }
        }
        Shape::LayeredFog {
            depth_front,
            depth_back,
            slices,
            color: [r, g, b],
            alpha_near,
            alpha_far,
        } => {
            let mut samples = Vec::with_capacity(slices as usize);
            for i in 0..slices {
                let t0 = i as f32 / slices as f32;
                let t1 = (i + 1) as f32 / slices as f32;
                let tc = 0.5 * (t0 + t1);
                let z0 = depth_front + t0 * (depth_back - depth_front);
                let z1 = depth_front + t1 * (depth_back - depth_front);
                // Per-slice density ramps with depth to amplify distance
                // fade, capped short of full opacity.
                let a = (alpha_near + (alpha_far - alpha_near) * tc).clamp(0.0, 0.95);
                samples.push(DeepSample::volume(z0, z1, r * a, g * a, b * a, a));
            }
            samples
        }
        Shape::Rod {
            start,
            end,
            width_start,
            width_end,
            depth_near,
            depth_far,
            color: [r, g, b],
            alpha,
        } => {
            let dx = end[0] - start[0];
            let dy = end[1] - start[1];
            let length = (dx * dx + dy * dy).sqrt();
            if length < 1e-6 {
                return Vec::new();
            }
            let (dir_x, dir_y) = (dx / length, dy / length);
            let (perp_x, perp_y) = (-dir_y, dir_x);
            let half_length = 0.5 * length;
            let rel_x = nx - 0.5 * (start[0] + end[0]);
            let rel_y = ny - 0.5 * (start[1] + end[1]);
            let along = rel_x * dir_x + rel_y * dir_y;
            let across = rel_x * perp_x + rel_y * perp_y;
            let t = ((along + half_length) / length).clamp(0.0, 1.0);
            let local_width = width_start + t * (width_end - width_start);
            let local_half_width = 0.5 * local_width;
            // Top face thickness and front cap depth scale with the rod's
            // screen-space width.
            let top_thickness = 0.28 * local_width;
            let cap_length = 0.16 * width_start;

            let shade = |v: f32, m: f32| (v * m).clamp(0.0, 1.0);

            let in_side_along = along.abs() <= half_length;
            let in_side_across = across >= -local_half_width && across <= local_half_width;
            let in_top_across =
                across >= -(local_half_width + top_thickness) && across < -local_half_width;
            let in_front_cap = along >= -(half_length + cap_length)
                && along < -half_length
                && across >= -(0.5 * width_start + 0.28 * width_start)
                && across <= 0.5 * width_start;

            if in_front_cap {
                // Nearest cap of the rod, dimmed.
                vec![DeepSample::point(
                    depth_near - 0.8,
                    shade(r, 0.72) * alpha,
                    shade(g, 0.72) * alpha,
                    shade(b, 0.72) * alpha,
                    alpha,
                )]
            } else if in_side_along && in_top_across {
                // Top face reads brighter and sits slightly nearer.
                vec![DeepSample::point(
                    depth_near + t * (depth_far - depth_near) - 0.45,
                    shade(r, 1.18) * alpha,
                    shade(g, 1.18) * alpha,
                    shade(b, 1.18) * alpha,
                    alpha,
                )]
            } else if in_side_along && in_side_across {
                vec![DeepSample::point(
                    depth_near + t * (depth_far - depth_near),
                    r * alpha,
                    g * alpha,
                    b * alpha,
                    alpha,
                )]
            } else {
                Vec::new()
            }
        }
        Shape::TiltedPane {
            left,
            top,
            right,
            bottom,
            depth_corners: [tl, tr, bl, br],
            color: [r, g, b],
            alpha,
        } => {
            if nx < left || nx > right || ny < top || ny > bottom {
                return Vec::new();
            }
            let tx = (nx - left) / (right - left);
            let ty = (ny - top) / (bottom - top);
            let depth_top = tl + tx * (tr - tl);
            let depth_bottom = bl + tx * (br - bl);
            let depth = depth_top + ty * (depth_bottom - depth_top);
            vec![DeepSample::point(
                depth,
                r * alpha,
                g * alpha,
                b * alpha,
                alpha,
            )]
        }
        Shape::Cone {
            apex,
            apex_depth,
            base,
            base_depth,
            apex_radius,
            base_radius,
            color: [r, g, b],
            alpha,
        } => {
            let axis_x = base[0] - apex[0];
            let axis_y = base[1] - apex[1];
            let axis_len = (axis_x * axis_x + axis_y * axis_y).sqrt();
            if axis_len < 1e-6 {
                return Vec::new();
            }
            let t = ((nx - apex[0]) * axis_x + (ny - apex[1]) * axis_y) / (axis_len * axis_len);
            if !(0.0..=1.0).contains(&t) {
                return Vec::new();
            }
            let proj_x = apex[0] + t * axis_x;
            let proj_y = apex[1] + t * axis_y;
            let perp =
                ((nx - proj_x) * (nx - proj_x) + (ny - proj_y) * (ny - proj_y)).sqrt();
            let cone_radius = apex_radius + t * (base_radius - apex_radius);
            if perp > cone_radius {
                return Vec::new();
            }
            let center_depth = apex_depth + t * (base_depth - apex_depth);
            let normalized = perp / cone_radius.max(1e-6);
            let half_chord = (1.0 - normalized * normalized).max(0.0).sqrt();
            // The beam thickens toward the base as the footprint widens.
            let thickness = cone_radius * (base_depth - apex_depth).abs() / axis_len;
            let entry = center_depth - half_chord * thickness;
            let mut exit = center_depth + half_chord * thickness;
            if exit <= entry {
                exit = entry + 0.01;
            }
            // Quadratic edge fade for a soft-light look.
            let a = alpha * (1.0 - normalized * normalized);
            vec![DeepSample::volume(entry, exit, r * a, g * a, b * a, a)]
        }
        Shape::Ring {
            center,
            center_depth,
            major_radius,
            minor_radius,
            depth_amplitude,
            phase,
            color: [r, g, b],
        } => {
            let dx = nx - center[0];
            let dy = ny - center[1];
            let dist = (dx * dx + dy * dy).sqrt();
            let tube_dist = dist - major_radius;
            if tube_dist.abs() > minor_radius {
                return Vec::new();
            }
            let half_chord = (minor_radius * minor_radius - tube_dist * tube_dist).sqrt();
            // Depth swings sinusoidally around the circumference, so two
            // rings with different phases pass alternately in front of and
            // behind each other.
            let angle = dy.atan2(dx);
            let depth_offset = depth_amplitude * (angle - phase).sin();
            let front =
                center_depth + depth_offset - half_chord * (depth_amplitude / major_radius);
            vec![DeepSample::point(front, r, g, b, 1.0)]
        }
    }
}

fn in_disc(nx: f32, ny: f32, center: [f32; 2], radius: f32) -> bool {
    let dx = nx - center[0];
    let dy = ny - center[1];
    dx * dx + dy * dy <= radius * radius
}

/// Ray-sphere hit for the orthographic ray through `(nx, ny)`: entry/exit
/// depths interpolated over `[depth_near, depth_far]` by the sphere section.
fn sphere_depths(
    nx: f32,
    ny: f32,
    center: [f32; 2],
    radius: f32,
    depth_near: f32,
    depth_far: f32,
) -> Option<(f32, f32)> {
    let dx = nx - center[0];
    let dy = ny - center[1];
    let dist_sq = dx * dx + dy * dy;
    let radius_sq = radius * radius;
    if dist_sq > radius_sq {
        return None;
    }

    let normalized_offset = (radius_sq - dist_sq).sqrt() / radius;
    let depth_center = (depth_near + depth_far) * 0.5;
    let depth_range = (depth_far - depth_near) * 0.5;
    Some((
        depth_center - normalized_offset * depth_range,
        depth_center + normalized_offset * depth_range,
    ))
}
