//! Wire decode → orderbook text parse → CSV sink, exercised end-to-end the
//! way the streamer's read loop chains them on every inbound frame.

use chrono::TimeZone;

use idx_tape::clock::wib_offset;
use idx_tape::codec::{decode_message, parse_orderbook_text, test_encode_orderbook_frame};
use idx_tape::csv_sink::{OrderbookCsvSink, OrderbookRow};

#[test]
fn decoded_frame_levels_land_in_order_in_the_sink() {
    let frame = test_encode_orderbook_frame(
        "bbca",
        "#O|BBCA|BID|9000;10;90000|9050;5;45250|9100;2;18200",
    );
    let decoded = decode_message(&frame).unwrap().expect("frame carries an orderbook payload");
    assert_eq!(decoded.ticker, "BBCA");

    let (side, levels) = parse_orderbook_text(&decoded.raw).unwrap();
    assert_eq!(levels.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let sink = OrderbookCsvSink::new(dir.path().to_path_buf()).unwrap();
    let timestamp = wib_offset().with_ymd_and_hms(2025, 1, 7, 9, 30, 0).single().unwrap();

    for level in &levels {
        sink.write_level(
            &decoded.ticker,
            &OrderbookRow {
                timestamp,
                price: level.price_raw.clone(),
                lots: level.lots,
                total_value: level.total_value,
                side,
            },
        )
        .unwrap();
    }

    let path = dir.path().join("2025-01-07_BBCA.csv");
    let contents = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4, "header plus one row per level");
    assert!(lines[1].contains(",9000,"), "price written verbatim, not reformatted: {}", lines[1]);
    assert!(lines[2].contains(",9050,"));
    assert!(lines[3].contains(",9100,"));
    assert!(lines.iter().skip(1).all(|l| l.ends_with("BID")));
}

#[test]
fn malformed_short_frame_is_skipped_by_decoder() {
    // A bare unknown varint-0 tag with no length-delimited payload: decode_message
    // should terminate cleanly with no orderbook frame rather than erroring.
    let mut data = Vec::new();
    data.push(0x08); // field 1, wire type 0 (varint)
    data.push(0x01); // value 1
    let decoded = decode_message(&data).unwrap();
    assert!(decoded.is_none());
}
