use scampi_stomp::parser::{parse_frame, parse_frame_slice, parse_headers};

#[test]
fn parse_frame_slice_invalid_content_length_falls_back_to_nul() {
    let raw = b"SEND\ncontent-length:xyz\n\nhello\0".to_vec();
    let (frame, consumed) = parse_frame_slice(&raw).expect("frame");
    assert_eq!(frame.body, b"hello".to_vec());
    assert_eq!(consumed, raw.len());
}

#[test]
fn parse_frame_slice_content_length_mismatch_falls_back_to_nul() {
    // Declared length stops short of the terminator.
    let raw = b"SEND\ncontent-length:2\n\nhello\0".to_vec();
    let (frame, _) = parse_frame_slice(&raw).expect("frame");
    assert_eq!(frame.body, b"hello".to_vec());
}

#[test]
fn parse_headers_splits_on_first_colon_and_trims() {
    let h = parse_headers("destination : /queue/a\nreply-to:tcp://h:1\n\nflag\n");
    assert_eq!(
        h,
        vec![
            ("destination".to_string(), "/queue/a".to_string()),
            ("reply-to".to_string(), "tcp://h:1".to_string()),
            ("flag".to_string(), String::new()),
        ]
    );
}

#[test]
fn parse_headers_duplicate_keys_last_wins() {
    let h = parse_headers("a:1\nb:2\na:3");
    assert_eq!(h.len(), 2);
    assert_eq!(h[0], ("a".to_string(), "3".to_string()));
}

#[test]
fn parse_frame_strips_carriage_return_from_command() {
    let f = parse_frame(b"RECEIPT\r\nreceipt-id:7\n\n");
    assert_eq!(f.command, "RECEIPT");
    assert_eq!(f.get_header("receipt-id"), Some("7"));
}

#[test]
fn parse_frame_garbage_is_unknown_command() {
    let f = parse_frame(b"\x01\x02 not a frame");
    assert!(!f.is_known_command());
}

#[test]
fn parse_frame_slice_overlong_content_length_does_not_hold_frame() {
    let raw = b"MESSAGE\nmessage-id:1\ncontent-length:50\n\nhello\0".to_vec();
    let (frame, consumed) = parse_frame_slice(&raw).expect("frame");
    assert_eq!(frame.body, b"hello".to_vec());
    assert!(frame.bytes_message);
    assert_eq!(consumed, raw.len());
}

#[test]
fn parse_frame_slice_content_length_never_spans_next_frame() {
    // 27 bytes from the body start end exactly on the second frame's NUL.
    let raw = b"MESSAGE\nmessage-id:1\ncontent-length:27\n\nhi\0MESSAGE\nmessage-id:2\n\nyo\0".to_vec();
    let (first, consumed) = parse_frame_slice(&raw).expect("first frame");
    assert_eq!(first.body, b"hi".to_vec());
    assert_eq!(first.get_header("message-id"), Some("1"));

    let (second, rest) = parse_frame_slice(&raw[consumed..]).expect("second frame");
    assert_eq!(second.get_header("message-id"), Some("2"));
    assert_eq!(second.body, b"yo".to_vec());
    assert_eq!(consumed + rest, raw.len());
}

#[test]
fn parse_frame_slice_huge_content_length_falls_back_to_nul() {
    let raw = b"MESSAGE\nmessage-id:1\ncontent-length:18446744073709551615\n\nhello\0".to_vec();
    let (frame, consumed) = parse_frame_slice(&raw).expect("frame");
    assert_eq!(frame.body, b"hello".to_vec());
    assert_eq!(consumed, raw.len());
}

#[test]
fn parse_frame_slice_binary_body_without_later_frame_head() {
    let raw = b"MESSAGE\ncontent-length:5\n\n\0\x01\nx\0\0".to_vec();
    let (frame, consumed) = parse_frame_slice(&raw).expect("frame");
    assert_eq!(frame.body, vec![0, 1, b'\n', b'x', 0]);
    assert_eq!(consumed, raw.len());
}
