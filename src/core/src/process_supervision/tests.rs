#[cfg(test)]
mod tests {
    use crate::binary_pipe::types::Frame;
    use crate::error_handling::types::PipeClosedError;
    use crate::process_supervision::{ExitReport, KillReason, ProcessInput, SupervisorStats};
    use tokio::io::AsyncReadExt;
    use uuid::Uuid;

    #[test]
    fn exit_report_fault_classification() {
        let clean = ExitReport {
            code: Some(0),
            signal: None,
        };
        assert!(clean.success());
        assert!(clean.fault().is_none());

        let failed = ExitReport {
            code: Some(137),
            signal: None,
        };
        let fault = failed.fault().unwrap();
        assert_eq!(fault.code, Some(137));

        let signalled = ExitReport {
            code: None,
            signal: Some(9),
        };
        assert_eq!(signalled.fault().unwrap().signal, Some(9));

        assert!(ExitReport::unknown().fault().is_some());
    }

    #[test]
    fn exit_report_display() {
        let report = ExitReport {
            code: None,
            signal: Some(2),
        };
        assert_eq!(report.to_string(), "code none, signal 2");
    }

    #[test]
    fn kill_reason_display() {
        assert_eq!(KillReason::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(
            KillReason::ConnectionError(String::from("reset")).to_string(),
            "connection error: reset"
        );
    }

    #[test]
    fn supervisor_stats_start_empty() {
        let stats = SupervisorStats::default();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.total_spawned, 0);
        assert_eq!(stats.forced_kills, 0);
    }

    #[tokio::test]
    async fn process_input_forwards_bytes_verbatim() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut input = ProcessInput::new(Uuid::new_v4(), writer);

        input.write(&Frame::from(&b"abc"[..])).await.unwrap();
        input.write(&Frame::from(vec![0u8, 255, 10])).await.unwrap();
        input.close().await;
        assert!(input.is_closed());

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc\x00\xff\n");
    }

    #[tokio::test]
    async fn process_input_refuses_writes_once_reader_is_gone() {
        let (writer, reader) = tokio::io::duplex(1024);
        let mut input = ProcessInput::new(Uuid::new_v4(), writer);
        drop(reader);

        assert_eq!(
            input.write(&Frame::from(&b"late"[..])).await,
            Err(PipeClosedError)
        );
        assert!(input.is_closed());
        assert_eq!(
            input.write(&Frame::from(&b"later"[..])).await,
            Err(PipeClosedError)
        );
    }

    #[tokio::test]
    async fn process_input_refuses_writes_after_close() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let mut input = ProcessInput::new(Uuid::new_v4(), writer);
        input.close().await;

        assert_eq!(
            input.write(&Frame::from(&b"x"[..])).await,
            Err(PipeClosedError)
        );
    }
}
