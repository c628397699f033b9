use futures::StreamExt;
use openlap_core::protocol::{
    checksum, normalize_notification, Button, Command, Frame, FrameBuilder, FrameCodec,
    ProtocolError, Status, TimerTick,
};
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedRead;

#[test]
fn test_mask_request_bytes() {
    // mask 0xc0: low nibble '0', high nibble '<', checksum of "0<" is '<'
    assert_eq!(Command::SetMask(0xc0).to_bytes(), b"\":0<<$".to_vec());
}

#[test]
fn test_start_button_bytes() {
    assert_eq!(Command::Trigger(Button::Start).to_bytes(), b"\"T2$".to_vec());
}

#[test]
fn test_timer_frame_vector() {
    // car 1, 5000 ms, finish line
    assert_eq!(
        Frame::decode(b"?10000318816"),
        Ok(Frame::Timer(TimerTick {
            car: 0,
            time: 5000,
            sensor: 0,
        }))
    );
}

#[test]
fn test_builder_matches_vector() {
    let built = FrameBuilder::new()
        .command(b'?')
        .nibble(1)
        .u32(5000)
        .nibble(1)
        .checksum()
        .build();
    assert_eq!(built, b"?10000318816".to_vec());
}

#[test]
fn test_version_frame_vector() {
    assert_eq!(checksum(b"5337"), 2);
    assert_eq!(Frame::decode(b"053372"), Ok(Frame::Version("5337".into())));
}

#[test]
fn test_status_frame_with_extra_bytes() {
    let frame = FrameBuilder::new()
        .command(b'?')
        .bytes(b":")
        .nibble(15)
        .nibble(12)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(0)
        .nibble(3)
        .nibble(1)
        .byte(0b10)
        .nibble(0)
        .bytes(b"00")
        .checksum()
        .build();
    assert_eq!(
        Frame::decode(&frame),
        Ok(Frame::Status(Status {
            fuel: [15, 12, 0, 0, 0, 0, 0, 0],
            start: 3,
            mode: 1,
            pit: 0b10,
            display: 0,
        }))
    );
}

#[test]
fn test_notification_quirk() {
    // six bytes ending in the sentinel: the version reply lost its '0'
    let fixed = normalize_notification(b"53372$");
    assert_eq!(fixed[0], 0x30);
    assert_eq!(Frame::decode(&fixed), Ok(Frame::Version("5337".into())));

    // any other short frame ending in the sentinel gets '?'
    assert_eq!(normalize_notification(b"123$")[0], 0x3f);
}

#[test]
fn test_garbled_frames_never_decode() {
    assert!(matches!(
        Frame::decode(b"?10000318817"),
        Err(ProtocolError::ChecksumMismatch { .. })
    ));
    assert!(matches!(
        Frame::decode(b"?1000031881"),
        Err(ProtocolError::Truncated { .. })
    ));
    assert!(matches!(
        Frame::decode(b"?1000031x816"),
        Err(ProtocolError::InvalidNibble(b'x'))
    ));
}

#[tokio::test]
async fn test_codec_splits_on_sentinel() {
    let (mut device, host) = tokio::io::duplex(64);
    let mut frames = FramedRead::new(host, FrameCodec::new());

    device.write_all(b"J$?100003").await.unwrap();
    device.write_all(b"18816$").await.unwrap();
    drop(device);

    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"J");
    let second = frames.next().await.unwrap().unwrap();
    assert_eq!(
        Frame::decode(&second),
        Ok(Frame::Timer(TimerTick {
            car: 0,
            time: 5000,
            sensor: 0,
        }))
    );
    assert!(frames.next().await.is_none());
}
