// src/run_log/tests.rs

use super::*;
use std::fs;
use tempfile::TempDir;

fn log_in(dir: &TempDir, name: &str) -> RunLog {
    RunLog::at(dir.path().join(name))
}

#[test]
fn it_should_treat_a_missing_log_as_empty() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "main_log.txt");
    assert!(!log.exists());
    assert!(!log.contains("h0022_0000")?);
    assert!(log.keys()?.is_empty());
    Ok(())
}

#[test]
fn it_should_find_appended_keys() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "nested/dir/log.txt");
    log.append("h0022_0000")?;
    assert!(log.exists());
    assert!(log.contains("h0022_0000")?);
    assert!(!log.contains("h0022_000")?);
    assert!(!log.contains("h0506_0000")?);
    Ok(())
}

#[test]
fn it_should_tolerate_duplicate_appends() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    log.append("h0506_0000")?;
    log.append("h0506_0000")?;
    assert!(log.contains("h0506_0000")?);

    let keys = log.keys()?;
    assert_eq!(keys, vec!["h0506_0000", "h0506_0000"]);
    let distinct: std::collections::BTreeSet<_> = keys.iter().collect();
    assert_eq!(distinct.len(), 1);
    Ok(())
}

#[test]
fn it_should_ignore_a_torn_trailing_line() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    fs::write(log.path(), "h0022_0000\nh2411_00")?;
    assert!(log.contains("h0022_0000")?);
    assert!(!log.contains("h2411_00")?);
    assert_eq!(log.keys()?, vec!["h0022_0000"]);
    Ok(())
}

#[test_log::test]
fn it_should_start_a_fresh_line_after_a_torn_tail() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    fs::write(log.path(), "h0022_0000\nh24")?;
    log.append("h2411_0000")?;
    assert!(log.contains("h2411_0000")?);
    assert!(!log.contains("h24")?);
    assert_eq!(fs::read_to_string(log.path())?, "h0022_0000\nh2411_0000\n");
    Ok(())
}

#[test]
fn it_should_never_turn_a_torn_line_into_a_completed_key() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "main_log.txt");
    fs::write(log.path(), "h0022_0000\nh2411_000")?;
    log.append("h0506_0000")?;
    log.append("h0506_0000")?;

    assert!(!log.contains("h2411_000")?);
    assert_eq!(log.keys()?, vec!["h0022_0000", "h0506_0000", "h0506_0000"]);
    Ok(())
}

#[test]
fn it_should_drop_a_torn_first_line() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    fs::write(log.path(), "h00")?;
    log.append("h0022_0000")?;
    assert_eq!(fs::read_to_string(log.path())?, "h0022_0000\n");
    Ok(())
}

#[test]
fn it_should_accept_crlf_line_endings() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    fs::write(log.path(), "h0022_0000\r\nh0506_0000\r\n")?;
    assert!(log.contains("h0506_0000")?);
    Ok(())
}

#[test]
fn it_should_skip_garbage_lines_when_listing_keys() -> Result<()> {
    let dir = TempDir::new()?;
    let log = log_in(&dir, "log.txt");
    fs::write(log.path(), b"h0022_0000\n\xff\xfe\nnot a key\n\nh0506_0000\n")?;
    assert_eq!(log.keys()?, vec!["h0022_0000", "h0506_0000"]);
    Ok(())
}

#[test]
fn it_should_reject_keys_that_cannot_be_stored_on_one_line() {
    let dir = TempDir::new().unwrap();
    let log = log_in(&dir, "log.txt");
    for bad in ["", "two words", "line\nbreak", "tab\tkey"] {
        let err = log.append(bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::InvalidLogKey(_))
        ));
    }
    assert!(!log.exists());
}
