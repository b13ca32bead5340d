use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use stereo_core::Real;
use stereo_pipeline::{
    run_stereo_calibration, CalibrationSettings, ColumnPrefixes, LandmarkTable, ObservationFilter,
    PipelineOptions, RecordedDetections, Reconstruction, StereoCalibration,
};

/// Stereo calibration and landmark triangulation.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Calibrate both cameras and their relative pose from recorded detections.
    Calibrate {
        /// Calibration settings (checkerboard size, square size, frame interval),
        /// YAML or JSON by extension.
        #[arg(long)]
        settings: PathBuf,
        /// JSON file with per-frame checkerboard corners of both cameras.
        #[arg(long)]
        detections: PathBuf,
        /// Optional JSON `PipelineOptions`; defaults are used if omitted.
        #[arg(long)]
        options: Option<PathBuf>,
        /// Output directory for `calibration.json` and the `.dat` files.
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Triangulate per-frame landmarks with a stored calibration.
    Triangulate {
        /// `calibration.json` or a directory of `.dat` files.
        #[arg(long)]
        calibration: PathBuf,
        /// CSV table of per-frame landmark pixels.
        #[arg(long)]
        landmarks: PathBuf,
        /// Output JSON path.
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "front")]
        camera0_prefix: String,
        #[arg(long, default_value = "side")]
        camera1_prefix: String,
        /// Drop observations with a lower confidence.
        #[arg(long, default_value_t = 0.0)]
        min_confidence: Real,
    },
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn calibrate_from_files(
    settings: &Path,
    detections: &Path,
    options: Option<&Path>,
    out_dir: &Path,
) -> Result<StereoCalibration> {
    let settings = CalibrationSettings::from_file(settings)?;
    let detections = RecordedDetections::from_json_file(detections)?;
    let options = match options {
        Some(path) => load_json_file::<PipelineOptions>(path)?,
        None => PipelineOptions::default(),
    };

    let set = detections.accumulate(&settings)?;
    let calib = run_stereo_calibration(&set, &options)?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    calib.save_json(out_dir.join("calibration.json"))?;
    calib.write_dat_dir(out_dir)?;
    info!("calibration written to {}", out_dir.display());
    Ok(calib)
}

fn load_calibration(path: &Path) -> Result<StereoCalibration> {
    let calib = if path.is_dir() {
        StereoCalibration::read_dat_dir(path)?
    } else {
        StereoCalibration::load_json(path)?
    };
    Ok(calib)
}

#[derive(Debug, Serialize)]
struct FrameOutput {
    frame_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<Real>,
    points: BTreeMap<String, [Real; 3]>,
    /// Landmarks seen by both cameras whose triangulation was rejected.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    rejected: BTreeMap<String, String>,
}

fn triangulate_from_files(
    calibration: &Path,
    landmarks: &Path,
    prefixes: &ColumnPrefixes,
    filter: ObservationFilter,
    out: &Path,
) -> Result<Vec<FrameOutput>> {
    let calib = load_calibration(calibration)?;
    let rig = calib.rig()?;
    let table = LandmarkTable::from_csv_path(landmarks, prefixes)?;
    if table.is_empty() {
        bail!("{} contains no frames", landmarks.display());
    }

    let frames = Reconstruction::from_rig(&rig, &table)
        .with_filter(filter)
        .par_collect();
    let mut failures = 0;
    let output: Vec<FrameOutput> = frames
        .into_iter()
        .map(|f| {
            for failure in &f.failures {
                warn!(
                    "frame {}: landmark `{}` rejected: {}",
                    failure.frame_index, failure.name, failure.error
                );
            }
            failures += f.failures.len();
            FrameOutput {
                frame_index: f.frame_index,
                timestamp: f.timestamp,
                points: f
                    .points
                    .into_iter()
                    .map(|p| (p.name, [p.position.x, p.position.y, p.position.z]))
                    .collect(),
                rejected: f
                    .failures
                    .into_iter()
                    .map(|failure| (failure.name, failure.error.to_string()))
                    .collect(),
            }
        })
        .collect();

    let json = serde_json::to_string_pretty(&output)?;
    fs::write(out, json).with_context(|| format!("failed to write {}", out.display()))?;
    info!(
        "triangulated {} frames ({} rejected landmarks) into {}",
        output.len(),
        failures,
        out.display()
    );
    Ok(output)
}

fn main() {
    pretty_env_logger::init_timed();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    match Cli::parse().command {
        Command::Calibrate {
            settings,
            detections,
            options,
            out_dir,
        } => {
            let calib = calibrate_from_files(&settings, &detections, options.as_deref(), &out_dir)?;
            println!("{}", serde_json::to_string_pretty(&calib)?);
        }
        Command::Triangulate {
            calibration,
            landmarks,
            out,
            camera0_prefix,
            camera1_prefix,
            min_confidence,
        } => {
            let prefixes = ColumnPrefixes {
                camera0: camera0_prefix,
                camera1: camera1_prefix,
            };
            triangulate_from_files(
                &calibration,
                &landmarks,
                &prefixes,
                ObservationFilter { min_confidence },
                &out,
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_core::synthetic::planar;
    use stereo_core::{
        project_with_matrix, BrownConrady5, Camera, CameraPose, FxFyCxCySkew, Iso3, Pinhole,
        PinholeCamera, Pt3,
    };
    use stereo_pipeline::{ImageSize, RecordedDetection};

    fn write_json<T: Serialize>(value: &T, path: &Path) {
        serde_json::to_writer_pretty(fs::File::create(path).unwrap(), value).unwrap();
    }

    fn camera(fx: Real) -> PinholeCamera {
        Camera::new(
            Pinhole,
            BrownConrady5::from_opencv([-0.03, 0.0, 0.0, 0.0, 0.0]),
            FxFyCxCySkew {
                fx,
                fy: fx,
                cx: 640.0,
                cy: 360.0,
                skew: 0.0,
            },
        )
    }

    fn rel_pose() -> CameraPose {
        CameraPose::from_iso3(Iso3::translation(-0.15, 0.0, 0.01))
    }

    fn synthetic_detections() -> RecordedDetections {
        let board = planar::grid_points(8, 6, 0.03);
        let poses = planar::poses_tilted_ring(8, 0.7, 0.4);
        let pairs =
            planar::project_stereo_views_all(&camera(820.0), &camera(800.0), &rel_pose(), &board, &poses)
                .unwrap();
        RecordedDetections {
            image_size: [ImageSize::new(1280, 720); 2],
            frame_count: Some(pairs.len() * 2),
            frames: pairs
                .into_iter()
                .enumerate()
                .map(|(i, obs)| RecordedDetection {
                    frame_index: 2 * i,
                    camera0: Some(obs.cam0.points_2d),
                    camera1: Some(obs.cam1.points_2d),
                })
                .collect(),
        }
    }

    #[test]
    fn calibrate_then_triangulate() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("calibration_settings.yaml");
        let detections = dir.path().join("detections.json");
        let options = dir.path().join("options.json");
        let out_dir = dir.path().join("camera_parameters");
        fs::write(
            &settings,
            "checkerboard_rows: 8\n\
             checkerboard_columns: 6\n\
             checkerboard_box_size_scale: 0.03\n\
             video_frame_interval: 2\n",
        )
        .unwrap();
        write_json(&synthetic_detections(), &detections);
        fs::write(&options, r#"{"intrinsics": {"fix_k3": true}}"#).unwrap();

        let calib = calibrate_from_files(&settings, &detections, Some(options.as_path()), &out_dir).unwrap();
        assert!((calib.camera0.intrinsics.fx - 820.0).abs() < 0.5);
        assert!((calib.extrinsics.translation[0] + 0.15).abs() < 1e-3);
        assert!(out_dir.join("calibration.json").is_file());
        assert!(out_dir.join("camera1_rot_trans.dat").is_file());

        let rig = calib.rig().unwrap();
        let x = Pt3::new(0.05, -0.02, 0.9);
        let a = project_with_matrix(rig.projection(0), &x).unwrap();
        let b = project_with_matrix(rig.projection(1), &x).unwrap();
        // a landmark whose rays meet behind both cameras
        let behind = Pt3::new(0.05, -0.02, -0.9);
        let c = project_with_matrix(rig.projection(0), &behind).unwrap();
        let d = project_with_matrix(rig.projection(1), &behind).unwrap();
        let csv = dir.path().join("landmarks.csv");
        fs::write(
            &csv,
            format!(
                "front_nose_x,front_nose_y,front_nose_c,side_nose_x,side_nose_y,side_nose_c,\
                 front_ghost_x,front_ghost_y,front_ghost_c,side_ghost_x,side_ghost_y,side_ghost_c\n\
                 {},{},0.9,{},{},0.8,{},{},0.9,{},{},0.9\n\
                 {},{},0.1,{},{},0.8,{},{},0.1,{},{},0.9\n",
                a.x, a.y, b.x, b.y, c.x, c.y, d.x, d.y, a.x, a.y, b.x, b.y, c.x, c.y, d.x, d.y
            ),
        )
        .unwrap();

        let out = dir.path().join("points.json");
        let frames = triangulate_from_files(
            &out_dir,
            &csv,
            &ColumnPrefixes::default(),
            ObservationFilter {
                min_confidence: 0.5,
            },
            &out,
        )
        .unwrap();
        assert_eq!(frames.len(), 2);
        let p = frames[0].points["nose"];
        assert!((Pt3::from(p) - x).norm() < 1e-6);
        assert!(frames[1].points.is_empty());
        assert_eq!(frames[0].rejected.len(), 1);
        assert!(frames[0].rejected["ghost"].contains("in front of both cameras"));
        assert!(frames[1].rejected.is_empty());

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 2);
        assert!(written[0]["rejected"]["ghost"].is_string());
        assert!(written[1].get("rejected").is_none());
    }
}
