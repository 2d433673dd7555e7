use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use dgds_formats::{AdsResource, ScriptBundle, ScriptWriter, TtmReference, TtmResource};
use serde_json::Value;
use tempfile::tempdir;

fn write_bundle(path: &Path) -> Result<()> {
    let mut bundle = ScriptBundle::default();
    bundle.ads.insert(
        "DEMO.ADS".to_string(),
        AdsResource {
            scripts: vec![TtmReference {
                id: 1,
                name: "DEMO.TTM".to_string(),
            }],
            words: ScriptWriter::new()
                .word(1)
                .op(0x2000, &[1, 1, 0, 0])
                .op(0xF000, &[])
                .op(0xFFFF, &[])
                .words(),
        },
    );
    bundle.ttm.insert(
        "DEMO.TTM".to_string(),
        TtmResource {
            frames: None,
            words: ScriptWriter::new()
                .op(0x1111, &[1])
                .op(0x1301, &[4])
                .op(0xA002, &[10, 20])
                .op(0x0FF0, &[])
                .op(0xA0A4, &[0, 0, 5, 5])
                .op(0x0110, &[])
                .op(0x0FF0, &[])
                .words(),
        },
    );
    bundle.write_json_file(path)
}

#[test]
fn trace_and_save_are_written() -> Result<()> {
    let dir = tempdir()?;
    let bundle = dir.path().join("bundle.json");
    let trace = dir.path().join("trace.json");
    let save = dir.path().join("save.json");
    write_bundle(&bundle)?;

    let output = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "DEMO.ADS", "--start", "1", "--ticks", "3"])
        .arg("--trace-json")
        .arg(&trace)
        .arg("--save-json")
        .arg(&save)
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "dgds_engine failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("tick    0:"), "stdout:\n{stdout}");
    assert!(stdout.contains("Saved trace JSON"), "stdout:\n{stdout}");

    let ticks: Vec<Value> = serde_json::from_str(&fs::read_to_string(&trace)?)?;
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks[0]["render"][0]["kind"], "pixel");
    assert_eq!(ticks[0]["sound"][0]["kind"], "sfx_play");
    assert_eq!(ticks[1]["render"][0]["kind"], "line");

    let saved: Value = serde_json::from_str(&fs::read_to_string(&save)?)?;
    assert_eq!(saved["active"], "DEMO.ADS");
    assert_eq!(saved["scripts"][0]["states"].as_array().map(Vec::len), Some(80));
    Ok(())
}

#[test]
fn restore_continues_from_saved_state() -> Result<()> {
    let dir = tempdir()?;
    let bundle = dir.path().join("bundle.json");
    let save = dir.path().join("save.json");
    write_bundle(&bundle)?;

    let first = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "DEMO.ADS", "--start", "1", "--ticks", "1"])
        .arg("--save-json")
        .arg(&save)
        .output()?;
    assert!(first.status.success());

    let second = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "DEMO.ADS", "--ticks", "1", "--verbose"])
        .arg("--restore-json")
        .arg(&save)
        .output()?;
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(
        second.status.success(),
        "restore failed: {}",
        String::from_utf8_lossy(&second.stderr)
    );
    // the restored sequence picks up at its second frame
    assert!(stdout.contains("drew Some(1)"), "stdout:\n{stdout}");
    Ok(())
}

#[test]
fn restore_keeps_saved_active_script() -> Result<()> {
    let dir = tempdir()?;
    let bundle = dir.path().join("bundle.json");
    let save = dir.path().join("save.json");
    write_bundle(&bundle)?;

    let first = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "DEMO.ADS", "--start", "1", "--ticks", "1"])
        .arg("--save-json")
        .arg(&save)
        .output()?;
    assert!(first.status.success());

    let second = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "OTHER.ADS", "--ticks", "1", "--verbose"])
        .arg("--restore-json")
        .arg(&save)
        .output()?;
    let stdout = String::from_utf8_lossy(&second.stdout);
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(second.status.success(), "restore failed: {stderr}");
    assert!(stderr.contains("restores DEMO.ADS as active"), "stderr:\n{stderr}");
    assert!(stdout.contains("drew Some(1)"), "stdout:\n{stdout}");
    Ok(())
}

#[test]
fn start_with_restore_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let bundle = dir.path().join("bundle.json");
    write_bundle(&bundle)?;

    let output = Command::new(env!("CARGO_BIN_EXE_dgds_engine"))
        .arg("--bundle")
        .arg(&bundle)
        .args(["--ads", "DEMO.ADS", "--start", "1"])
        .arg("--restore-json")
        .arg(dir.path().join("missing.json"))
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--restore-json"), "stderr:\n{stderr}");
    Ok(())
}
