//! End-to-end hot-swap integration tests
//!
//! Drives the real watcher, reaper, installer and supervisor against small
//! shell-script executables.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use binswap::config::{Config, SupervisorConfig};
use binswap::reaper::ReapOutcome;
use binswap::supervisor::{GenerationReport, Supervisor, SwapResult};
use binswap::watcher::ReplacementWatcher;
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(50);

/// Write an executable script that records `tag` in `marker` and then runs `tail`
fn write_script(path: &Path, marker: &Path, tag: &str, tail: &str) {
    let body = format!("#!/bin/sh\necho {} >> {}\n{}\n", tag, marker.display(), tail);
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Stage a replacement elsewhere and move it onto the watched path in one step
fn drop_replacement(dir: &Path, replacement: &Path, marker: &Path, tag: &str) {
    let staged = dir.join(format!("staged-{}", tag));
    write_script(&staged, marker, tag, "exec sleep 30");
    std::fs::rename(&staged, replacement).unwrap();
}

fn markers(marker: &Path) -> Vec<String> {
    std::fs::read_to_string(marker)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

struct Fixture {
    temp: TempDir,
    exe: PathBuf,
    replacement: PathBuf,
    marker: PathBuf,
}

impl Fixture {
    fn new(tail: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("app");
        let replacement = temp.path().join("replacement");
        let marker = temp.path().join("marker");
        write_script(&exe, &marker, "A", tail);
        Self {
            temp,
            exe,
            replacement,
            marker,
        }
    }

    fn supervisor(&self) -> Supervisor {
        let mut config = Config::default();
        config.watch.poll_interval_ms = POLL.as_millis() as u64;
        config.supervisor.start_backoff_ms = 20;
        config.supervisor.swap_backoff_ms = 20;
        config.install.rename.delay_ms = 20;

        let config = SupervisorConfig::resolve(
            &self.exe,
            vec![],
            &config,
            Some(self.replacement.display().to_string()),
        )
        .unwrap();

        let (swaps, _watcher) = ReplacementWatcher::from_config(&config).spawn();
        Supervisor::new(config, swaps)
    }

    fn versioned(&self, n: u64) -> PathBuf {
        self.temp.path().join(format!("app-{}", n))
    }
}

/// Upper bound from the replacement landing to the swap being installed (ten polls)
const SWAP_LATENCY: Duration = Duration::from_millis(500);

/// Run one generation in the background, dropping a replacement once it is up.
/// Returns how long the generation took to end after the drop.
async fn generation_with_replacement(
    fixture: &Fixture,
    mut supervisor: Supervisor,
    tag: &str,
) -> (Supervisor, GenerationReport, Duration) {
    let running = tokio::spawn(async move {
        let report = supervisor.run_generation().await;
        (supervisor, report, Instant::now())
    });

    tokio::time::sleep(POLL * 4).await;
    drop_replacement(fixture.temp.path(), &fixture.replacement, &fixture.marker, tag);
    let dropped = Instant::now();

    let (supervisor, report, finished) = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("generation should end after the replacement appears")
        .unwrap();
    (supervisor, report, finished.duration_since(dropped))
}

#[tokio::test]
async fn test_no_replacement_relaunches_unchanged() {
    let fixture = Fixture::new("exit 0");
    let mut supervisor = fixture.supervisor();

    for generation in 1..=2 {
        let report = tokio::time::timeout(Duration::from_secs(10), supervisor.run_generation())
            .await
            .unwrap();
        assert_eq!(report.generation, generation);
        assert_eq!(report.executable, fixture.exe);
        assert_eq!(report.swap, SwapResult::NoReplacement);
    }

    assert_eq!(supervisor.target(), fixture.exe.as_path());
    assert!(!fixture.versioned(0).exists());
    assert_eq!(markers(&fixture.marker), vec!["A", "A"]);
}

#[tokio::test]
async fn test_replacement_kills_and_installs_versioned() {
    let fixture = Fixture::new("exec sleep 30");
    let supervisor = fixture.supervisor();

    // A is running; B appears and takes over as app-0
    let (supervisor, report, latency) = generation_with_replacement(&fixture, supervisor, "B").await;
    assert!(latency < SWAP_LATENCY, "swap took {:?}", latency);
    assert_eq!(report.executable, fixture.exe);
    assert!(report.exit.was_killed());
    assert_eq!(report.reaped, Some(ReapOutcome::Killed));
    assert_eq!(report.swap, SwapResult::Installed(fixture.versioned(0)));
    assert_eq!(supervisor.target(), fixture.versioned(0).as_path());
    assert!(fixture.versioned(0).exists());
    assert!(fixture.exe.exists());
    assert!(!fixture.replacement.exists());

    // app-0 is running; C appears, app-0 is retired and C becomes app-1
    let (supervisor, report, latency) = generation_with_replacement(&fixture, supervisor, "C").await;
    assert!(latency < SWAP_LATENCY, "swap took {:?}", latency);
    assert_eq!(report.executable, fixture.versioned(0));
    assert!(report.exit.was_killed());
    assert_eq!(report.swap, SwapResult::Installed(fixture.versioned(1)));
    assert_eq!(supervisor.target(), fixture.versioned(1).as_path());
    assert!(!fixture.versioned(0).exists());
    assert!(fixture.versioned(1).exists());
    assert!(!fixture.replacement.exists());
    assert_eq!(supervisor.state().counter.value(), 2);

    assert_eq!(markers(&fixture.marker), vec!["A", "B"]);
}

#[tokio::test]
async fn test_unchanged_replacement_never_swaps() {
    let fixture = Fixture::new("exec sleep 30");
    // Present before the watcher starts, so it is the baseline
    write_script(&fixture.replacement, &fixture.marker, "stale", "exit 0");
    let mut supervisor = fixture.supervisor();

    let result = tokio::time::timeout(POLL * 8, supervisor.run_generation()).await;
    assert!(result.is_err(), "a pre-existing replacement must not trigger a swap");
}
