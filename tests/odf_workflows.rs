//
// odf_workflows.rs
// Odf-Tools-rs
//
// Integration-style tests driving both conversions end to end with stand-in amp2sh/sh2amp scripts.
//
// Thales Matheus Mendonça Santos - November 2025

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{array, s, Array3, Array4, ArrayView1};
use nifti::NiftiHeader;
use odf_tools::forward::{self, ForwardRequest};
use odf_tools::matfile::{self, MatFile, MatMatrix, Precision};
use odf_tools::odf_table::OdfGeometry;
use odf_tools::peaks::{LocalMaximaPeakFinder, Peak, PeakFinder};
use odf_tools::reverse::{self, ReverseRequest};
use odf_tools::scratch::ScratchDir;
use odf_tools::tools::ToolConfig;
use odf_tools::volume::{self, Volume};
use odf_tools::ConvertError;
use tempfile::{tempdir, TempDir};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn header() -> NiftiHeader {
    NiftiHeader {
        pixdim: [1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0],
        sform_code: 1,
        srow_x: [-2.0, 0.0, 0.0, 10.0],
        srow_y: [0.0, -2.0, 0.0, 20.0],
        srow_z: [0.0, 0.0, 2.0, -5.0],
        ..NiftiHeader::default()
    }
}

fn scratch_dirs_left(dir: &Path) -> usize {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".odf-tools-"))
        .count()
}

/// 2x2x2 grid, foreground at flat indices 2 and 5, two hemisphere directions.
fn build_fib(dir: &Path) -> PathBuf {
    let path = dir.join("subject.fib.gz");
    let mut fib = MatFile::new();
    fib.insert("dimension", MatMatrix::row_vector([2.0, 2.0, 2.0], Precision::I32));
    let mut fa = [0.0; 8];
    fa[2] = 0.9;
    fa[5] = 0.4;
    fib.insert("fa0", MatMatrix::row_vector(fa, Precision::F32));
    fib.insert(
        "odf0",
        MatMatrix::from_array(array![[0.5, 0.75], [0.25, 1.0]].view(), Precision::F32),
    );
    let vertices = array![[1.0, 0.0, -1.0, 0.0], [0.0, 1.0, 0.0, -1.0], [0.0, 0.0, 0.0, 0.0]];
    fib.insert("odf_vertices", MatMatrix::from_array(vertices.view(), Precision::F32));
    matfile::write_file(&path, &fib).expect("write fib");
    path
}

fn forward_setup() -> (TempDir, ForwardRequest) {
    let dir = tempdir().expect("tempdir");
    let fib = build_fib(dir.path());
    let reference = dir.path().join("reference.nii");
    volume::write_volume(&reference, &Array3::<f32>::zeros((2, 2, 2)), &header()).expect("write reference");
    let request = ForwardRequest {
        fib,
        reference,
        output: dir.path().join("fod.nii"),
    };
    (dir, request)
}

#[tokio::test]
async fn fib_converts_to_a_four_dimensional_amplitude_fit() {
    let (dir, request) = forward_setup();
    let seen = dir.path().join("seen-directions.txt");
    // Stand-in for amp2sh: keeps the direction table and passes the amplitudes through.
    let amp2sh = script(
        dir.path(),
        "amp2sh",
        &format!("cp \"$3\" \"{}\"\ncp \"$4\" \"$5\"", seen.display()),
    );
    let tools = ToolConfig {
        amp2sh,
        ..ToolConfig::default()
    };

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let summary = forward::fib_to_mrtrix(&request, &tools, &scratch).await.expect("convert");
    drop(scratch);

    assert_eq!(summary.dimension, [2, 2, 2]);
    assert_eq!(summary.foreground_voxels, 2);
    assert_eq!(summary.directions, 2);
    assert_eq!(scratch_dirs_left(dir.path()), 0);

    let output = Volume::load(&request.output).expect("load output");
    assert!(volume::affines_close(&output.affine(), &volume::header_affine(&header())));
    let data = output.into_4d("output").expect("4d");
    assert_eq!(data.shape(), &[2, 2, 2, 2]);
    // Flat 2 -> (0, 1, 0) holds the per-direction minimum, flat 5 -> (1, 0, 1).
    assert_eq!(data.slice(s![0, 1, 0, ..]).to_vec(), vec![0.0, 0.0]);
    assert_eq!(data.slice(s![1, 0, 1, ..]).to_vec(), vec![0.25, 0.75]);
    assert_eq!(data.iter().filter(|&&v| v != 0.0).count(), 2);

    // +x and +y in LPS+ become -x and -y in RAS+.
    let table = fs::read_to_string(&seen).expect("directions table");
    let rows: Vec<Vec<f64>> = table
        .lines()
        .map(|l| l.split_whitespace().map(|v| v.parse().expect("number")).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!((rows[0][0].abs() - std::f64::consts::PI).abs() < 1e-12);
    assert!((rows[1][0] + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    assert!((rows[1][1] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
}

#[tokio::test]
async fn silent_tool_failure_leaves_no_output() {
    let (dir, request) = forward_setup();
    let tools = ToolConfig {
        amp2sh: script(dir.path(), "amp2sh", "exit 0"),
        ..ToolConfig::default()
    };

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = forward::fib_to_mrtrix(&request, &tools, &scratch).await.unwrap_err();
    drop(scratch);

    assert!(matches!(err, ConvertError::ToolOutputMissing { .. }));
    assert!(!request.output.exists());
    assert_eq!(scratch_dirs_left(dir.path()), 0);
}

#[tokio::test]
async fn output_named_like_an_intermediate_file_still_converts() {
    let (dir, mut request) = forward_setup();
    request.output = dir.path().join(forward::AMPLITUDES_FILE);
    // Refuses to run when asked to overwrite its own input.
    let amp2sh = script(
        dir.path(),
        "amp2sh",
        "[ \"$4\" -ef \"$5\" ] && exit 2\ncp \"$4\" \"$5\"",
    );
    let tools = ToolConfig {
        amp2sh,
        ..ToolConfig::default()
    };

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    forward::fib_to_mrtrix(&request, &tools, &scratch).await.expect("convert");
    drop(scratch);

    let data = Volume::load(&request.output).expect("load output").into_4d("output").expect("4d");
    assert_eq!(data.slice(s![1, 0, 1, ..]).to_vec(), vec![0.25, 0.75]);
    assert_eq!(scratch_dirs_left(dir.path()), 0);
}

#[tokio::test]
async fn reference_grid_must_match_the_fib() {
    let (dir, mut request) = forward_setup();
    request.reference = dir.path().join("small.nii");
    volume::write_volume(&request.reference, &Array3::<f32>::zeros((2, 2, 3)), &header()).expect("write");
    let tools = ToolConfig {
        amp2sh: script(dir.path(), "amp2sh", "exit 1"),
        ..ToolConfig::default()
    };

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = forward::fib_to_mrtrix(&request, &tools, &scratch).await.unwrap_err();
    assert!(matches!(err, ConvertError::GeometryMismatch(_)));
}

struct ReverseFixture {
    dir: TempDir,
    geometry: OdfGeometry,
    amplitudes: Array4<f32>,
    mask: PathBuf,
}

/// Octahedron geometry table plus a mask and the amplitudes sh2amp will "produce".
fn reverse_setup() -> ReverseFixture {
    let dir = tempdir().expect("tempdir");
    let mut table = MatFile::new();
    table.insert(
        "odf8_vertices",
        MatMatrix::from_array(
            array![
                [1.0, 0.0, 0.0, -1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0, -1.0, 0.0],
                [0.0, 0.0, 1.0, 0.0, 0.0, -1.0]
            ]
            .view(),
            Precision::F32,
        ),
    );
    table.insert(
        "odf8_faces",
        MatMatrix::from_array(
            array![
                [0.0, 1.0, 3.0, 4.0, 1.0, 0.0, 4.0, 3.0],
                [1.0, 3.0, 4.0, 0.0, 0.0, 4.0, 3.0, 1.0],
                [2.0, 2.0, 2.0, 2.0, 5.0, 5.0, 5.0, 5.0]
            ]
            .view(),
            Precision::I16,
        ),
    );
    let table_path = dir.path().join("odfs.mat");
    matfile::write_file(&table_path, &table).expect("write table");
    let geometry = OdfGeometry::load(&table_path, "odf8").expect("geometry");

    let mut amplitudes = Array4::<f32>::zeros((2, 2, 2, 3));
    amplitudes.slice_mut(s![1, 1, 0, ..]).assign(&array![0.2, 0.9, 0.1]);
    amplitudes.slice_mut(s![0, 0, 1, ..]).assign(&array![0.8, 0.8, 0.1]);
    let mut mask = Array3::<f32>::zeros((2, 2, 2));
    mask[[1, 1, 0]] = 1.0;
    mask[[0, 0, 1]] = 1.0;

    let mask_path = dir.path().join("mask.nii");
    volume::write_volume(&mask_path, &mask, &header()).expect("write mask");
    volume::write_volume(&dir.path().join("prepared.nii.gz"), &amplitudes, &header()).expect("write amplitudes");

    ReverseFixture {
        dir,
        geometry,
        amplitudes,
        mask: mask_path,
    }
}

fn fake_sh2amp(dir: &Path, body_before_copy: &str) -> PathBuf {
    let prepared = dir.join("prepared.nii.gz");
    script(
        dir,
        "sh2amp",
        &format!("{}cp \"{}\" \"$5\"", body_before_copy, prepared.display()),
    )
}

#[tokio::test]
async fn sh_image_converts_to_a_fib_that_reads_back() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask: fixture.mask.clone(),
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, ""),
        ..ToolConfig::default()
    };
    let finder = Arc::new(LocalMaximaPeakFinder::new(&fixture.geometry));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let summary = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch)
        .await
        .expect("convert");
    drop(scratch);
    assert_eq!(summary.foreground_voxels, 2);
    assert_eq!(summary.fibers, Some(3));
    assert_eq!(scratch_dirs_left(dir), 0);

    let fib = matfile::read_file(&request.output).expect("read fib");
    for key in ["fa0", "fa1", "fa2", "index0", "index1", "index2", "odf0", "odf_faces", "z0"] {
        assert!(fib.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(fib.get("voxel_size").unwrap().values(), &[2.0, 2.0, 2.0]);

    // (1,1,0) is flat 3 with one peak at direction 1; (0,0,1) is flat 4 with a tie
    // between two orthogonal directions.
    let fa0 = fib.get("fa0").unwrap().values();
    let index0 = fib.get("index0").unwrap().values();
    let fa1 = fib.get("fa1").unwrap().values();
    assert!((fa0[3] - 0.9).abs() < 1e-6);
    assert_eq!(index0[3], 1.0);
    assert!((fa0[4] - 0.8).abs() < 1e-6);
    assert_eq!(index0[4], 0.0);
    assert!((fa1[4] - 0.8).abs() < 1e-6);
    assert_eq!(fa1[3], 0.0);
    assert_eq!(fib.get("index1").unwrap().values()[4], 1.0);
    assert!(fib.get("fa2").unwrap().values().iter().all(|&v| v == 0.0));

    // The written fib is valid input for the forward direction.
    let samples = forward::collect_odf_samples(&fib).expect("samples");
    assert_eq!(samples.mask.positions(), &[3, 4]);
    assert_eq!(
        samples.odfs.row(0).to_vec(),
        fixture.amplitudes.slice(s![1, 1, 0, ..]).mapv(f64::from).to_vec()
    );
}

#[tokio::test]
async fn mismatched_mask_is_rejected_without_writing() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let mask = dir.join("wide-mask.nii");
    volume::write_volume(&mask, &Array3::<f32>::ones((3, 2, 2)), &header()).expect("write mask");
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask,
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, ""),
        ..ToolConfig::default()
    };
    let finder = Arc::new(LocalMaximaPeakFinder::new(&fixture.geometry));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::GeometryMismatch(_)));
    assert!(!request.output.exists());
}

#[tokio::test]
async fn hung_sampler_times_out() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask: fixture.mask.clone(),
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, "sleep 30\n"),
        timeout: Some(Duration::from_millis(300)),
        ..ToolConfig::default()
    };
    let finder = Arc::new(LocalMaximaPeakFinder::new(&fixture.geometry));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::ToolTimeout { .. }));
    assert!(!request.output.exists());
}

#[tokio::test]
async fn mask_with_another_orientation_is_rejected_without_writing() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let mut shifted = header();
    shifted.srow_x[3] += 4.0;
    let mask = dir.join("shifted-mask.nii");
    let mut values = Array3::<f32>::zeros((2, 2, 2));
    values[[1, 1, 0]] = 1.0;
    volume::write_volume(&mask, &values, &shifted).expect("write mask");
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask,
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, ""),
        ..ToolConfig::default()
    };
    let finder = Arc::new(LocalMaximaPeakFinder::new(&fixture.geometry));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::GeometryMismatch(ref m) if m.contains("orientation")));
    assert!(!request.output.exists());
}

#[tokio::test]
async fn empty_mask_is_rejected_without_writing() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let mask = dir.join("empty-mask.nii");
    volume::write_volume(&mask, &Array3::<f32>::zeros((2, 2, 2)), &header()).expect("write mask");
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask,
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, ""),
        ..ToolConfig::default()
    };
    let finder = Arc::new(LocalMaximaPeakFinder::new(&fixture.geometry));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let err = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::EmptyMask));
    assert!(!request.output.exists());
}

/// Takes a full second per voxel.
struct Sluggish(LocalMaximaPeakFinder);

impl PeakFinder for Sluggish {
    fn directions(&self) -> usize {
        self.0.directions()
    }

    fn find_peaks(&self, samples: ArrayView1<'_, f64>) -> Vec<Peak> {
        std::thread::sleep(Duration::from_secs(1));
        self.0.find_peaks(samples)
    }
}

#[tokio::test]
async fn abandoned_conversion_returns_promptly_and_writes_nothing() {
    let fixture = reverse_setup();
    let dir = fixture.dir.path();
    let request = ReverseRequest {
        sh_image: dir.join("fod.mif"),
        mask: fixture.mask.clone(),
        output: dir.join("out.fib"),
        fibers: 3,
    };
    let tools = ToolConfig {
        sh2amp: fake_sh2amp(dir, ""),
        ..ToolConfig::default()
    };
    let finder = Arc::new(Sluggish(LocalMaximaPeakFinder::new(&fixture.geometry)));

    let scratch = ScratchDir::near(&request.output).expect("scratch");
    let started = Instant::now();
    let finished = tokio::select! {
        _ = reverse::mrtrix_to_fib(&request, &fixture.geometry, finder, &tools, &scratch) => true,
        _ = tokio::time::sleep(Duration::from_millis(200)) => false,
    };
    assert!(!finished);
    assert!(started.elapsed() < Duration::from_millis(900));
    drop(scratch);

    // Give voxels already handed to the finder time to finish.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!request.output.exists());
    assert_eq!(scratch_dirs_left(dir), 0);
}
