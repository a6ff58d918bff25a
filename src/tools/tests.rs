// src/tools/tests.rs

use super::raster::{parse_creation_time, parse_gdalinfo_json};
use super::*;
use crate::geo::GeoRect;
use chrono::{TimeZone, Utc};
use std::time::Instant;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[test]
fn it_should_run_successful_commands() {
    assert!(run_command(&mut sh("exit 0"), &CancelToken::new()).is_ok());
}

#[test]
fn it_should_report_non_zero_exits_as_tool_failures() {
    let err = run_command(&mut sh("exit 3"), &CancelToken::new()).unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::ToolFailed { command, status }) => {
            assert!(command.starts_with("sh -c"));
            assert!(status.contains('3'));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test_log::test]
fn it_should_kill_children_when_cancelled() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let started = Instant::now();
    let err = run_command(&mut sh("sleep 30"), &cancel).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(
        err.downcast_ref::<MosaicError>(),
        Some(MosaicError::Cancelled)
    ));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn it_should_not_start_commands_after_cancellation() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let dir = tempfile::TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let script = format!("touch {}", marker.display());
    assert!(run_command(&mut sh(&script), &cancel).is_err());
    assert!(!marker.exists());
}

#[test]
fn it_should_capture_standard_output() -> Result<()> {
    assert_eq!(capture_command(&mut sh("printf hello"))?, "hello");
    assert!(capture_command(&mut sh("echo oops >&2; exit 1")).is_err());
    Ok(())
}

#[test]
fn it_should_only_publish_complete_files() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let dst = dir.path().join("h0022_0000_nd3.img");

    let failed = write_atomically(&dst, |part| {
        fs::write(part, b"half")?;
        anyhow::bail!("connection reset")
    });
    assert!(failed.is_err());
    assert!(!dst.exists());
    assert!(!dir.path().join("h0022_0000_nd3.img.part").exists());

    write_atomically(&dst, |part| Ok(fs::write(part, b"whole")?))?;
    assert_eq!(fs::read(&dst)?, b"whole");
    Ok(())
}

#[test]
fn it_should_publish_all_outputs_together_or_none() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let color = dir.path().join("color.tif");
    let mask = dir.path().join("mask.tif");

    let failed = write_all_atomically(&[color.as_path(), mask.as_path()], |parts| {
        fs::write(&parts[0], b"color")?;
        fs::write(&parts[1], b"half")?;
        anyhow::bail!("color transform died")
    });
    assert!(failed.is_err());
    assert!(!color.exists());
    assert!(!mask.exists());
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

/// Writes an executable shell script into `dir`.
#[cfg(unix)]
fn script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(unix)]
fn prep_job(dir: &Path) -> PrepJob {
    let work = dir.join("h0022_0000");
    PrepJob {
        basemap: dir.join("base.tif"),
        nadir: work.join("h0022_0000_nd3.tif"),
        red: work.join("h0022_0000_re3.tif"),
        green: work.join("h0022_0000_gr3.tif"),
        blue: work.join("h0022_0000_bl3.tif"),
        nir: work.join("h0022_0000_ir3.tif"),
        transform_out: dir.join("registration.txt"),
        color_out: dir.join("color.tif"),
        mask_out: dir.join("mask.tif"),
    }
}

#[cfg(unix)]
#[test_log::test]
fn it_should_redo_color_matching_after_a_failed_attempt() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let register = script(dir.path(), "register", "echo '1 0 0' > \"$3\"; echo '0 1 0' >> \"$3\"")?;
    let broken = script(
        dir.path(),
        "color_broken",
        "printf color > \"$8\"; printf half > \"$9\"; exit 1",
    )?;
    let working = script(
        dir.path(),
        "color_ok",
        "printf color > \"$8\"; printf mask > \"$9\"",
    )?;
    let job = prep_job(dir.path());

    let err = HrscToolchain::new(&register, &broken)
        .prepare(&job, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MosaicError>(),
        Some(MosaicError::ToolFailed { .. })
    ));
    assert!(job.transform_out.exists());
    assert!(!job.color_out.exists());
    assert!(!job.mask_out.exists());

    HrscToolchain::new(&register, &working).prepare(&job, &CancelToken::new())?;
    assert_eq!(fs::read(&job.color_out)?, b"color");
    assert_eq!(fs::read(&job.mask_out)?, b"mask");
    Ok(())
}

#[cfg(unix)]
#[test]
fn it_should_keep_complete_color_products() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let register = script(dir.path(), "register", "exit 1")?;
    let color_tool = script(dir.path(), "color", "exit 1")?;
    let job = prep_job(dir.path());
    fs::write(&job.transform_out, "1 0 0\n0 1 0\n")?;
    fs::write(&job.color_out, b"color")?;
    fs::write(&job.mask_out, b"mask")?;

    HrscToolchain::new(&register, &color_tool).prepare(&job, &CancelToken::new())?;
    assert_eq!(fs::read(&job.mask_out)?, b"mask");
    Ok(())
}

const GDALINFO_GEOGRAPHIC: &str = r#"{
  "description": "h0022_0000_nd3.tif",
  "driverShortName": "GTiff",
  "size": [4000, 12000],
  "metadata": {
    "": { "AREA_OR_POINT": "Area" },
    "IMAGE_STRUCTURE": { "INTERLEAVE": "BAND" }
  },
  "cornerCoordinates": {
    "upperLeft": [10.5, -20.0],
    "lowerLeft": [10.5, -30.0],
    "lowerRight": [12.0, -30.0],
    "upperRight": [12.0, -20.0],
    "center": [11.25, -25.0]
  }
}"#;

const GDALINFO_PROJECTED: &str = r#"{
  "size": [800, 600],
  "metadata": {
    "": { "PRODUCT_CREATION_TIME": "2004-01-23T10:23:45.000Z" }
  },
  "cornerCoordinates": {
    "upperLeft": [622000.0, 3500000.0],
    "lowerLeft": [622000.0, 3400000.0],
    "lowerRight": [700000.0, 3400000.0],
    "upperRight": [700000.0, 3500000.0]
  },
  "wgs84Extent": {
    "type": "Polygon",
    "coordinates": [[[10.0, 31.5], [10.1, 30.5], [11.2, 30.4], [11.0, 31.6], [10.0, 31.5]]]
  }
}"#;

#[test]
fn it_should_read_corner_coordinates_without_a_wgs84_extent() -> Result<()> {
    let info = parse_gdalinfo_json(GDALINFO_GEOGRAPHIC)?;
    assert_eq!((info.width, info.height), (4000, 12000));
    assert_eq!(
        info.bounding_box,
        Some(GeoRect::new(10.5, 12.0, -30.0, -20.0))
    );
    assert_eq!(info.creation_time, None);
    Ok(())
}

#[test]
fn it_should_prefer_the_wgs84_extent_and_read_creation_time() -> Result<()> {
    let info = parse_gdalinfo_json(GDALINFO_PROJECTED)?;
    assert_eq!(
        info.bounding_box,
        Some(GeoRect::new(10.0, 11.2, 30.4, 31.6))
    );
    assert_eq!(
        info.creation_time,
        Some(Utc.with_ymd_and_hms(2004, 1, 23, 10, 23, 45).unwrap())
    );
    Ok(())
}

#[test]
fn it_should_find_creation_time_in_label_style_metadata() -> Result<()> {
    let json = r#"{ "size": [1, 1], "metadata": { "json:PDS": ["PRODUCT_ID=H0022", "PRODUCT_CREATION_TIME=2005-06-01T00:00:00"] } }"#;
    let info = parse_gdalinfo_json(json)?;
    assert_eq!(
        info.creation_time,
        Some(Utc.with_ymd_and_hms(2005, 6, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(info.bounding_box, None);
    Ok(())
}

#[test]
fn it_should_reject_unparseable_creation_times() {
    assert!(parse_creation_time("\"2004-01-23T10:23:45.000Z\"").is_ok());
    assert!(parse_creation_time("yesterday").is_err());
    assert!(parse_gdalinfo_json("not json").is_err());
}
