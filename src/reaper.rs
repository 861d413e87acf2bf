//! Reaper - one short-lived task per child generation
//!
//! Waits for the next swap notification and kills the generation it was bound
//! to. The shared notification receiver is borrowed for the lifetime of the
//! generation and handed back when the task finishes, so a notification that
//! arrives between generations stays queued for the next reaper.

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::process::KillSwitch;

/// What a reaper did before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Consumed a notification and killed the child
    Killed,
    /// Consumed a notification but the child had already exited
    AlreadyExited,
    /// Generation ended on its own; no notification consumed
    GenerationEnded,
    /// The watcher is gone; nothing will ever be received again
    WatcherGone,
}

/// Finished reaper: the receiver to hand to the next generation and what happened.
pub type ReaperResult = (mpsc::Receiver<()>, ReapOutcome);

/// Spawn a reaper bound to one generation
pub fn spawn(swaps: mpsc::Receiver<()>, switch: KillSwitch) -> JoinHandle<ReaperResult> {
    tokio::spawn(reap(swaps, switch))
}

/// Wait for one notification, or for the generation to end without one.
pub async fn reap(mut swaps: mpsc::Receiver<()>, mut switch: KillSwitch) -> ReaperResult {
    let outcome = tokio::select! {
        biased;
        _ = switch.ended() => ReapOutcome::GenerationEnded,
        received = swaps.recv() => match received {
            Some(()) => {
                info!("Noticed binary swap, killing pid {:?}", switch.pid());
                match switch.kill() {
                    Ok(()) => ReapOutcome::Killed,
                    Err(e) => {
                        warn!("{}", e);
                        ReapOutcome::AlreadyExited
                    }
                }
            }
            None => {
                warn!("Swap watcher has stopped; pid {:?} will only end on its own", switch.pid());
                switch.ended().await;
                ReapOutcome::WatcherGone
            }
        },
    };

    debug!("Reaper finished: {:?}", outcome);
    (swaps, outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::ProcessRunner;
    use std::path::Path;
    use std::time::Duration;

    fn start(script: &str) -> crate::process::RunningChild {
        ProcessRunner::new()
            .start(Path::new("/bin/sh"), &["-c".to_string(), script.to_string()])
            .unwrap()
    }

    #[tokio::test]
    async fn test_notification_kills_child() {
        let (tx, rx) = mpsc::channel(1);
        let mut child = start("sleep 30");
        let reaper = spawn(rx, child.kill_switch().unwrap());

        tx.send(()).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), child.wait()).await.unwrap();
        assert!(outcome.was_killed());

        let (_rx, reaped) = reaper.await.unwrap();
        assert_eq!(reaped, ReapOutcome::Killed);
    }

    #[tokio::test]
    async fn test_natural_exit_leaves_notification_queued() {
        let (tx, rx) = mpsc::channel(1);
        let mut child = start("exit 0");
        let reaper = spawn(rx, child.kill_switch().unwrap());

        assert!(child.wait().await.is_success());
        let (rx, reaped) = reaper.await.unwrap();
        assert_eq!(reaped, ReapOutcome::GenerationEnded);

        // Arrives between generations and waits for the next reaper
        tx.send(()).await.unwrap();
        let mut next = start("sleep 30");
        let reaper = spawn(rx, next.kill_switch().unwrap());
        let outcome = tokio::time::timeout(Duration::from_secs(5), next.wait()).await.unwrap();
        assert!(outcome.was_killed());
        assert_eq!(reaper.await.unwrap().1, ReapOutcome::Killed);
    }

    #[tokio::test]
    async fn test_dead_generation_does_not_consume_notification() {
        let (tx, rx) = mpsc::channel(1);
        let mut child = start("exit 0");
        let switch = child.kill_switch().unwrap();

        assert!(child.wait().await.is_success());
        tx.send(()).await.unwrap();

        let (mut rx, reaped) = reap(rx, switch).await;
        assert_eq!(reaped, ReapOutcome::GenerationEnded);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_kill_on_exited_generation_is_not_fatal() {
        let mut child = start("exit 0");
        let switch = child.kill_switch().unwrap();
        assert!(child.wait().await.is_success());
        assert!(switch.kill().is_err());
    }

    #[tokio::test]
    async fn test_watcher_gone_waits_for_generation_end() {
        let (tx, rx) = mpsc::channel::<()>(1);
        drop(tx);
        let mut child = start("sleep 30");
        let reaper = spawn(rx, child.kill_switch().unwrap());

        // A closed channel must not end the generation early
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reaper.is_finished());

        drop(child);
        let (_rx, reaped) = tokio::time::timeout(Duration::from_secs(5), reaper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reaped, ReapOutcome::WatcherGone);
    }
}
