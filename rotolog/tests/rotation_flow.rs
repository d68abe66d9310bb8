//! End-to-end rotation flows against a real filesystem and real clock.

use std::fs;
use std::time::Duration;

use chrono::Local;
use tempfile::TempDir;

use rotolog::{RotatingSink, RotationConfig};
use rotolog_sink::{FileSink, Level, Record};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn write_n(sink: &mut RotatingSink<FileSink>, n: usize, text: &str) {
    for _ in 0..n {
        sink.write(&Record::new(Level::Info, text)).expect("write");
    }
}

// Archiving triggered from the write path settles on a background thread.
fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting: {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn size_rule_from_json_config_keeps_two_generations() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let live = dir.path().join("app.log");

    let config: RotationConfig =
        serde_json::from_str(r#"{"rule":"size","maxSize":"10b","maxFiles":2}"#)
            .expect("config JSON");
    let mut sink = RotatingSink::new(FileSink::new(&live), &config).expect("rotating sink");

    for generation in 1..=3 {
        write_n(&mut sink, 6, &format!("gen{generation}"));
        sink.check_and_rotate(Local::now(), false);
    }

    assert!(live.exists(), "live file is always present");
    wait_for("two retained generations", || {
        dir.path().join("app.log.1").exists() && dir.path().join("app.log.2").exists()
    });
    assert!(
        !dir.path().join("app.log.3").exists(),
        "only two generations are retained"
    );

    let newest = fs::read_to_string(dir.path().join("app.log.1")).expect("read");
    assert!(newest.contains("gen3"), "rank 1 holds the newest generation");
}

#[test]
fn everysecond_rule_rotates_across_a_real_boundary() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let live = dir.path().join("app.log");

    let config: RotationConfig =
        serde_json::from_str(r#"{"rule":"time","timeRate":"everysecond"}"#).expect("config JSON");
    let mut sink = RotatingSink::new(FileSink::new(&live), &config).expect("rotating sink");

    sink.write(&Record::new(Level::Info, "before boundary"))
        .expect("write");
    std::thread::sleep(Duration::from_millis(1100));
    // The timer task would fire here; drive the same check by hand so the
    // post-boundary record lands in the fresh file.
    sink.check_and_rotate(Local::now(), false);
    sink.write(&Record::new(Level::Info, "after boundary"))
        .expect("write");

    let archives: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("app.log-"))
        .collect();
    assert!(
        !archives.is_empty(),
        "crossing a second boundary produced an archive, found: {archives:?}"
    );

    let live_contents = fs::read_to_string(&live).expect("read");
    assert!(
        live_contents.contains("after boundary"),
        "post-boundary record is in the fresh live file"
    );
    assert!(
        !live_contents.contains("before boundary"),
        "pre-boundary record went to the archive"
    );
}

#[test]
fn external_deletion_recovers_on_the_write_path() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let live = dir.path().join("app.log");

    let config = RotationConfig::size("1mb");
    let mut sink = RotatingSink::new(FileSink::new(&live), &config).expect("rotating sink");
    write_n(&mut sink, 3, "early");

    fs::remove_file(&live).expect("external delete");

    // Give the throttle window time to close, then keep writing; the next
    // checked write must reopen instead of appending to the stale handle.
    std::thread::sleep(Duration::from_millis(80));
    write_n(&mut sink, 1, "lost to the stale handle, by design");
    std::thread::sleep(Duration::from_millis(80));
    write_n(&mut sink, 1, "recovered");

    assert!(live.exists(), "live file was recreated");
    let contents = fs::read_to_string(&live).expect("read");
    assert!(
        contents.contains("recovered"),
        "records after recovery land in the fresh file: {contents:?}"
    );
}

#[test]
fn two_writers_rotate_a_shared_file_once() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let live = dir.path().join("app.log");
    let config = RotationConfig::size("100b").with_max_files(3);

    let mut writer_a =
        RotatingSink::new(FileSink::new(&live), &config).expect("rotating sink a");
    let mut writer_b =
        RotatingSink::new(FileSink::new(&live), &config).expect("rotating sink b");

    write_n(&mut writer_a, 3, "from a");
    write_n(&mut writer_b, 3, "from b");

    // Push the shared file over the threshold from outside so neither
    // writer's emit check fires before the explicit ones below.
    {
        use std::io::Write as _;
        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(&live)
            .expect("append filler");
        f.write_all(&[b'x'; 128]).expect("filler");
    }

    let now = Local::now();
    writer_a.check_and_rotate(now, false);
    writer_b.check_and_rotate(now, false);

    assert!(dir.path().join("app.log.1").exists(), "one archive produced");
    assert!(
        !dir.path().join("app.log.2").exists(),
        "the second writer must not rotate the fresh file again"
    );
}

#[test]
fn close_flushes_and_leaves_archives_intact() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let live = dir.path().join("app.log");

    let mut sink = RotatingSink::new(FileSink::new(&live), &RotationConfig::size("10b"))
        .expect("rotating sink");
    write_n(&mut sink, 6, "payload");
    sink.check_and_rotate(Local::now(), false);
    sink.close().expect("close");

    wait_for("archive in place", || {
        dir.path().join("app.log.1").exists()
            && !dir.path().join("app.log.rotating").exists()
    });
}
