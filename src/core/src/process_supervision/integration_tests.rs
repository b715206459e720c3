//! Supervisor tests against real processes. `sh` scripts stand in for the transcoder.

use crate::network::session_router::DestinationAddress;
use crate::process_supervision::TranscoderCommand;
use std::path::Path;
use std::time::Duration;

/// Runs `sh -c <script>` with the destination address as `$1`.
pub(crate) struct ScriptCommand {
    script: String,
}

impl ScriptCommand {
    pub(crate) fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl TranscoderCommand for ScriptCommand {
    fn program(&self) -> &str {
        "sh"
    }

    fn args(&self, destination: &DestinationAddress) -> Vec<String> {
        vec![
            String::from("-c"),
            self.script.clone(),
            String::from("transcoder"),
            destination.to_string(),
        ]
    }
}

/// Polls until `path` exists, so tests only signal a script once its traps are installed.
pub(crate) async fn wait_for_file(path: &Path) {
    for _ in 0..250 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never appeared", path.display());
}

mod integration_tests {
    use super::{wait_for_file, ScriptCommand};
    use crate::binary_pipe::types::Frame;
    use crate::error_handling::types::{PipeClosedError, SpawnError};
    use crate::network::session_router::SessionRouter;
    use crate::process_supervision::{KillReason, ProcessSupervisor, TranscoderCommand};
    use crate::network::session_router::DestinationAddress;
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;

    struct MissingProgram;

    impl TranscoderCommand for MissingProgram {
        fn program(&self) -> &str {
            "/nonexistent/livepush-transcoder"
        }

        fn args(&self, _destination: &DestinationAddress) -> Vec<String> {
            Vec::new()
        }
    }

    fn destination(token: &str) -> DestinationAddress {
        SessionRouter::new("rtmp://ingest.test/app").destination_for(token)
    }

    fn supervisor(script: &str, grace_ms: u64) -> ProcessSupervisor {
        ProcessSupervisor::new(ScriptCommand::new(script), Duration::from_millis(grace_ms))
    }

    #[tokio::test]
    async fn destination_is_passed_to_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("destination");
        let script = format!("printf '%s' \"$1\" > '{}'", out.display());
        let supervisor = supervisor(&script, 1000);

        let handle = supervisor.start(Uuid::new_v4(), &destination("abc123")).unwrap();
        let report = timeout(Duration::from_secs(5), supervisor.observe_exit(&handle))
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "rtmp://ingest.test/app/abc123"
        );
        let stats = supervisor.get_stats();
        assert_eq!(stats.total_spawned, 1);
        assert_eq!(stats.active_count, 0);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let supervisor = ProcessSupervisor::new(MissingProgram, Duration::from_millis(100));

        let err = supervisor
            .start(Uuid::new_v4(), &destination("abc"))
            .unwrap_err();

        assert!(matches!(err, SpawnError::ProgramNotFound(_)));
        let stats = supervisor.get_stats();
        assert_eq!(stats.failed_spawns, 1);
        assert_eq!(stats.total_spawned, 0);
    }

    #[tokio::test]
    async fn frames_reach_stdin_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdin.bin");
        let script = format!("exec cat > '{}'", out.display());
        let supervisor = supervisor(&script, 1000);

        let mut handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        for chunk in [&b"b1"[..], &b"b2"[..], &b"b3"[..]] {
            supervisor.write(&mut handle, &Frame::from(chunk)).await.unwrap();
        }
        handle.take_input().unwrap().close().await;

        let report = timeout(Duration::from_secs(5), supervisor.observe_exit(&handle))
            .await
            .unwrap();
        assert!(report.success());
        assert_eq!(std::fs::read(&out).unwrap(), b"b1b2b3");
    }

    #[tokio::test]
    async fn write_after_exit_reports_pipe_closed() {
        let supervisor = supervisor("exit 0", 1000);

        let mut handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        timeout(Duration::from_secs(5), supervisor.observe_exit(&handle))
            .await
            .unwrap();

        let frame = Frame::from(vec![7u8; 1024]);
        assert_eq!(supervisor.write(&mut handle, &frame).await, Err(PipeClosedError));
        assert_eq!(supervisor.write(&mut handle, &frame).await, Err(PipeClosedError));
    }

    #[tokio::test]
    async fn external_kill_status_is_reported() {
        let supervisor = supervisor("exit 137", 1000);

        let handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        let report = timeout(Duration::from_secs(5), supervisor.observe_exit(&handle))
            .await
            .unwrap();

        assert_eq!(report.code, Some(137));
        assert_eq!(report.fault().unwrap().code, Some(137));
    }

    #[tokio::test]
    async fn every_observer_sees_the_same_exit() {
        let supervisor = supervisor("exit 3", 1000);

        let handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        let mut first = handle.exit_signal();
        let mut second = handle.exit_signal();

        let a = timeout(Duration::from_secs(5), first.wait()).await.unwrap();
        let b = timeout(Duration::from_secs(5), second.wait()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.code, Some(3));
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn interrupt_stops_a_cooperative_process() {
        let supervisor = supervisor("exec sleep 30", 5000);

        let mut handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        let outcome = timeout(
            Duration::from_secs(10),
            supervisor.kill(&mut handle, KillReason::ConnectionClosed),
        )
        .await
        .unwrap();

        assert!(!outcome.forced);
        assert!(!outcome.already_exited);
        assert_eq!(outcome.report.signal, Some(2));
        let stats = supervisor.get_stats();
        assert_eq!(stats.interrupts_sent, 1);
        assert_eq!(stats.forced_kills, 0);
    }

    #[tokio::test]
    async fn interrupt_lands_even_when_the_relay_ignores_it() {
        use nix::sys::signal::{signal, SigHandler, Signal};

        let supervisor = supervisor("exec sleep 30", 5000);

        // A relay started in the background inherits an ignored SIGINT; the transcoder must not.
        let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.unwrap();
        let started = supervisor.start(Uuid::new_v4(), &destination("k"));
        unsafe { signal(Signal::SIGINT, previous) }.unwrap();
        let mut handle = started.unwrap();

        let outcome = timeout(
            Duration::from_secs(10),
            supervisor.kill(&mut handle, KillReason::ConnectionClosed),
        )
        .await
        .unwrap();

        assert!(!outcome.forced);
        assert_eq!(outcome.report.signal, Some(2));
        assert_eq!(supervisor.get_stats().forced_kills, 0);
    }

    #[tokio::test]
    async fn kill_escalates_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let script = format!("trap '' INT; : > '{}'; exec sleep 30", ready.display());
        let supervisor = supervisor(&script, 200);

        let mut handle = supervisor.start(Uuid::new_v4(), &destination("k")).unwrap();
        wait_for_file(&ready).await;

        let outcome = timeout(
            Duration::from_secs(10),
            supervisor.kill(&mut handle, KillReason::ConnectionClosed),
        )
        .await
        .unwrap();
        assert!(outcome.forced);
        assert_eq!(outcome.report.signal, Some(9));

        let again = supervisor.kill(&mut handle, KillReason::ConnectionClosed).await;
        assert!(again.already_exited);
        assert!(!again.forced);

        let stats = supervisor.get_stats();
        assert_eq!(stats.interrupts_sent, 1);
        assert_eq!(stats.forced_kills, 1);
    }
}
