use std::path::PathBuf;

use deepcomp::{BufferSource, DeepRowSink, DeepSample, DeepSinkConfig, DeepSource, DzrWriter};

fn write_dzr(src: &BufferSource, path: &PathBuf) {
    let mut writer = DzrWriter::create(path).unwrap();
    writer
        .begin(DeepSinkConfig {
            width: src.width(),
            height: src.height(),
        })
        .unwrap();
    for (y, row) in src.rows().iter().enumerate() {
        writer.push_row(y as u32, row).unwrap();
    }
    writer.end().unwrap();
}

fn bin_path(name: &str) -> PathBuf {
    std::env::var_os(format!("CARGO_BIN_EXE_{name}"))
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                format!("{name}.exe")
            } else {
                name.to_string()
            });
            p
        })
}

#[test]
fn cli_composites_two_inputs_and_writes_artifacts() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    let front_path = dir.join("front.dzr");
    let back_path = dir.join("back.dzr");
    write_dzr(
        &BufferSource::uniform(16, 16, &[DeepSample::point(5.0, 0.5, 0.0, 0.0, 0.5)]),
        &front_path,
    );
    write_dzr(
        &BufferSource::uniform(16, 16, &[DeepSample::point(10.0, 0.0, 1.0, 0.0, 1.0)]),
        &back_path,
    );

    let prefix = dir.join("out");
    let png_path = dir.join("out.png");
    let flat_path = dir.join("out_flat.exr");
    let merged_path = dir.join("out_merged.dzr");
    for p in [&png_path, &flat_path, &merged_path] {
        let _ = std::fs::remove_file(p);
    }

    let status = std::process::Command::new(bin_path("deepcomp"))
        .arg("--deep-output")
        .arg(&front_path)
        .arg(&back_path)
        .arg(&prefix)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(png_path.exists());
    assert!(flat_path.exists());
    assert!(merged_path.exists());
}

#[test]
fn cli_rejects_missing_inputs_with_exit_code_1() {
    let status = std::process::Command::new(bin_path("deepcomp"))
        .arg("only-a-prefix")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
