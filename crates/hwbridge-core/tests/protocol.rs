use hwbridge_core::protocol::{
    Command, CommandCode, FrameAccumulator, FrameError, InboundFrame, LinkError, TelemetryValue,
};
use hwbridge_core::telemetry::{StreamReader, TelemetryStore, ACK_SLOT_CAPACITY};
use std::sync::Arc;
use tokio::sync::mpsc;

fn acks() -> Vec<String> {
    vec!["A".to_string(), "E".to_string()]
}

#[test]
fn test_command_frames() {
    assert_eq!(Command::new(CommandCode::Servo, 90).to_frame(), b"20,90;");
    assert_eq!(Command::new(CommandCode::Buzzer, 500).to_frame(), b"2,500;");
    assert_eq!(Command::new(30u16, -1).to_frame(), b"30,-1;");
}

#[test]
fn test_every_split_point_yields_same_frames() {
    let stream = b"40,512;50,23.5\n60,140;40,498;";
    for split in 0..=stream.len() {
        let mut acc = FrameAccumulator::new();
        let mut frames = acc.push(&stream[..split]);
        frames.extend(acc.push(&stream[split..]));
        assert_eq!(
            frames,
            vec!["40,512", "50,23.5", "60,140", "40,498"],
            "split at {}",
            split
        );
        assert!(acc.is_empty());
    }
}

#[test]
fn test_reader_counts_records_across_chunks() {
    let stream = b"40,1;40,2;A;40,3;junk;40,4;";
    for chunk_size in 1..=stream.len() {
        let store = Arc::new(TelemetryStore::new(10));
        let (ack_tx, mut ack_rx) = mpsc::channel(ACK_SLOT_CAPACITY);
        let mut reader = StreamReader::new(store.clone(), ack_tx, acks());

        let stored: usize = stream.chunks(chunk_size).map(|c| reader.ingest(c)).sum();

        assert_eq!(stored, 4, "chunk size {}", chunk_size);
        assert_eq!(reader.dropped_frames(), 1);
        assert_eq!(ack_rx.try_recv().unwrap(), "A");
        assert_eq!(
            store.recent_values(40),
            vec![
                TelemetryValue::Int(1),
                TelemetryValue::Int(2),
                TelemetryValue::Int(3),
                TelemetryValue::Int(4)
            ]
        );
    }
}

#[test]
fn test_frame_classification() {
    assert_eq!(
        InboundFrame::parse("A\r", &acks()),
        Ok(InboundFrame::Ack("A".into()))
    );
    assert_eq!(
        InboundFrame::parse("READY", &acks()),
        Ok(InboundFrame::Notice("READY".into()))
    );
    assert_eq!(
        InboundFrame::parse("40,abc", &acks()),
        Ok(InboundFrame::Telemetry {
            channel: 40,
            value: TelemetryValue::Text("abc".into())
        })
    );
    assert!(matches!(
        InboundFrame::parse("x,1", &acks()),
        Err(FrameError::InvalidChannelId(_))
    ));
    assert!(matches!(
        InboundFrame::parse("nothing", &acks()),
        Err(FrameError::MissingSeparator(_))
    ));
}

#[test]
fn test_link_error_display() {
    let err = LinkError::PortUnavailable {
        port: "/dev/ttyACM0".into(),
        reason: "Device or resource busy".into(),
    };
    assert!(err.to_string().contains("/dev/ttyACM0"));
    assert!(err.is_busy());
    assert!(!LinkError::Disconnected.to_string().is_empty());
    assert!(!LinkError::NotOpen.is_busy());
}
