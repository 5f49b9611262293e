//! Protocol Codec — spec §4.D.
//!
//! Hand-rolled varint + length-delimited wire format, not proper Protobuf: the
//! vendor's wire shape was reverse-engineered field by field and is encoded
//! and decoded here exactly as observed, tag by tag.

use crate::csv_sink::Side;
use crate::error::{AppError, Result};

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn decode_varint(data: &[u8], mut pos: usize) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(pos)
            .ok_or_else(|| AppError::ProtocolMalformed("truncated varint".to_string()))?;
        pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, pos));
        }
        shift += 7;
        if shift >= 64 {
            return Err(AppError::ProtocolMalformed("varint too long".to_string()));
        }
    }
}

fn encode_field_string(field_number: u32, value: &str, out: &mut Vec<u8>) {
    let tag = (field_number << 3) | 2;
    encode_varint(tag as u64, out);
    let bytes = value.as_bytes();
    encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Builds the subscription request: field 1 userId, field 2 nested container of
/// ticker variations, field 3 trading key, field 5 bearer. The four-way ticker
/// expansion order (plain, `2`-prefixed, `:`-prefixed, `J`-prefixed, each looped
/// over every ticker in turn) must match the vendor's client exactly or the
/// subscription is silently ignored.
pub fn encode_subscription(user_id: i64, tickers: &[String], trading_key: &str, bearer: &str) -> Vec<u8> {
    let mut field2_inner = Vec::new();
    for ticker in tickers {
        encode_field_string(2, ticker, &mut field2_inner);
    }
    for ticker in tickers {
        encode_field_string(2, &format!("2{ticker}"), &mut field2_inner);
    }
    for ticker in tickers {
        encode_field_string(2, &format!(":{ticker}"), &mut field2_inner);
    }
    for ticker in tickers {
        encode_field_string(2, &format!("J{ticker}"), &mut field2_inner);
    }

    let mut message = Vec::new();
    encode_field_string(1, &user_id.to_string(), &mut message);

    let field2_tag = (2u64 << 3) | 2;
    encode_varint(field2_tag, &mut message);
    encode_varint(field2_inner.len() as u64, &mut message);
    message.extend_from_slice(&field2_inner);

    encode_field_string(3, trading_key, &mut message);
    encode_field_string(5, bearer, &mut message);

    message
}

/// Ticker symbol plus the raw `#O|TICKER|SIDE|PRICE;LOTS;VALUE|...` payload, as
/// recovered from field 10's nested sub-fields 1 and 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderbookFrame {
    pub ticker: String,
    pub raw: String,
}

/// Builds a raw field-10 frame wrapping the given ticker/orderbook-text pair.
/// Exposed for other modules' tests that need a realistic frame on the wire
/// without reaching into this module's private varint helpers.
#[doc(hidden)]
pub fn test_encode_orderbook_frame(ticker: &str, orderbook_text: &str) -> Vec<u8> {
    let mut nested = Vec::new();
    encode_field_string(1, ticker, &mut nested);
    encode_field_string(2, orderbook_text, &mut nested);

    let mut message = Vec::new();
    let tag = (10u64 << 3) | 2;
    encode_varint(tag, &mut message);
    encode_varint(nested.len() as u64, &mut message);
    message.extend_from_slice(&nested);
    message
}

/// Scans the top-level message's tag/length/value fields. As soon as field 10
/// (length-delimited) is seen, its bytes are decoded as the nested orderbook
/// message and returned — the vendor never sends more than one per frame.
/// Unknown wire types end the scan rather than erroring: newer fields the
/// vendor might add should not break decoding of the fields we understand.
pub fn decode_message(data: &[u8]) -> Result<Option<OrderbookFrame>> {
    let mut pos = 0usize;
    while pos < data.len() {
        let (tag, new_pos) = decode_varint(data, pos)?;
        pos = new_pos;
        let field_number = tag >> 3;
        let wire_type = tag & 0x7;

        match wire_type {
            0 => {
                let (_, new_pos) = decode_varint(data, pos)?;
                pos = new_pos;
            }
            2 => {
                let (length, new_pos) = decode_varint(data, pos)?;
                pos = new_pos;
                let length = length as usize;
                let value = data
                    .get(pos..pos + length)
                    .ok_or_else(|| AppError::ProtocolMalformed("length-delimited field overruns buffer".to_string()))?;

                if field_number == 10 {
                    return decode_nested_orderbook(value);
                }
                pos += length;
            }
            _ => break,
        }
    }
    Ok(None)
}

fn decode_nested_orderbook(data: &[u8]) -> Result<Option<OrderbookFrame>> {
    let mut pos = 0usize;
    let mut ticker: Option<String> = None;
    let mut raw: Option<String> = None;

    while pos < data.len() {
        let (tag, new_pos) = decode_varint(data, pos)?;
        pos = new_pos;
        let field_number = tag >> 3;
        let wire_type = tag & 0x7;

        match wire_type {
            0 => {
                let (_, new_pos) = decode_varint(data, pos)?;
                pos = new_pos;
            }
            2 => {
                let (length, new_pos) = decode_varint(data, pos)?;
                pos = new_pos;
                let length = length as usize;
                let value = data
                    .get(pos..pos + length)
                    .ok_or_else(|| AppError::ProtocolMalformed("nested field overruns buffer".to_string()))?;
                pos += length;

                let text = String::from_utf8_lossy(value).into_owned();
                match field_number {
                    1 => ticker = Some(text),
                    2 => raw = Some(text),
                    _ => {}
                }
            }
            _ => break,
        }
    }

    match (ticker, raw) {
        (Some(ticker), Some(raw)) if !ticker.trim().is_empty() && !raw.is_empty() => {
            Ok(Some(OrderbookFrame {
                ticker: ticker.trim().to_uppercase(),
                raw,
            }))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    /// The price field exactly as it appeared on the wire, e.g. `"8200"` stays
    /// `"8200"` rather than being reformatted through `f64`.
    pub price_raw: String,
    pub lots: i64,
    pub total_value: i64,
}

/// Parses `#O|TICKER|SIDE|PRICE;LOTS;VALUE|PRICE;LOTS;VALUE|...`. Malformed
/// individual levels are skipped rather than failing the whole frame — one bad
/// level from the vendor shouldn't discard the rest of a valid orderbook snapshot.
pub fn parse_orderbook_text(raw: &str) -> Result<(Side, Vec<PriceLevel>)> {
    let parts: Vec<&str> = raw.split('|').collect();
    if parts.len() < 4 {
        return Err(AppError::ProtocolMalformed(format!(
            "orderbook text has {} pipe-separated parts, need at least 4",
            parts.len()
        )));
    }

    let side = match parts[2].trim().to_uppercase().as_str() {
        "BID" => Side::Bid,
        "OFFER" => Side::Offer,
        other => {
            return Err(AppError::ProtocolMalformed(format!(
                "unknown orderbook side {other:?}"
            )))
        }
    };

    let mut levels = Vec::new();
    for level in &parts[3..] {
        let level = level.trim();
        if level.is_empty() {
            continue;
        }
        let fields: Vec<&str> = level.split(';').collect();
        if fields.len() < 3 {
            continue;
        }
        let (Ok(price), Ok(lots), Ok(total_value)) = (
            fields[0].parse::<f64>(),
            fields[1].parse::<i64>(),
            fields[2].parse::<i64>(),
        ) else {
            continue;
        };
        levels.push(PriceLevel {
            price,
            price_raw: fields[0].to_string(),
            lots,
            total_value,
        });
    }

    Ok((side, levels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_field_string_test(field_number: u32, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_field_string(field_number, value, &mut out);
        out
    }

    #[test]
    fn varint_roundtrip_small_and_large() {
        for value in [0u64, 1, 127, 128, 300, 16384, u64::from(u32::MAX)] {
            let mut out = Vec::new();
            encode_varint(value, &mut out);
            let (decoded, consumed) = decode_varint(&out, 0).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn subscription_expands_tickers_in_four_way_order() {
        let tickers = vec!["BBCA".to_string(), "TLKM".to_string()];
        let encoded = encode_subscription(42, &tickers, "trading-key", "bearer-token");

        let mut expected_field2 = Vec::new();
        for t in &tickers {
            encode_field_string(2, t, &mut expected_field2);
        }
        for t in &tickers {
            encode_field_string(2, &format!("2{t}"), &mut expected_field2);
        }
        for t in &tickers {
            encode_field_string(2, &format!(":{t}"), &mut expected_field2);
        }
        for t in &tickers {
            encode_field_string(2, &format!("J{t}"), &mut expected_field2);
        }

        // the inner container must appear as a contiguous length-delimited blob
        let mut haystack = Vec::new();
        let field2_tag = (2u64 << 3) | 2;
        encode_varint(field2_tag, &mut haystack);
        encode_varint(expected_field2.len() as u64, &mut haystack);
        haystack.extend_from_slice(&expected_field2);

        let pos = encoded
            .windows(haystack.len())
            .position(|w| w == haystack.as_slice());
        assert!(pos.is_some(), "field 2 container not found verbatim in encoding");
    }

    #[test]
    fn subscription_contains_user_id_key_and_bearer_fields() {
        let tickers = vec!["BBCA".to_string()];
        let encoded = encode_subscription(7, &tickers, "tkey", "bear");

        let user_id_field = encode_field_string_test(1, "7");
        let key_field = encode_field_string_test(3, "tkey");
        let bearer_field = encode_field_string_test(5, "bear");

        assert!(encoded.starts_with(&user_id_field));
        assert!(encoded.windows(key_field.len()).any(|w| w == key_field));
        assert!(encoded.ends_with(&bearer_field));
    }

    #[test]
    fn decode_message_extracts_nested_orderbook_frame() {
        let frame_bytes =
            test_encode_orderbook_frame("bbca", "#O|BBCA|BID|9000;10;90000|9050;5;45250");
        let decoded = decode_message(&frame_bytes).unwrap().unwrap();
        assert_eq!(decoded.ticker, "BBCA");
        assert_eq!(decoded.raw, "#O|BBCA|BID|9000;10;90000|9050;5;45250");
    }

    #[test]
    fn decode_message_skips_unknown_wire_type() {
        let mut data = Vec::new();
        let bad_tag = (99u64 << 3) | 6;
        encode_varint(bad_tag, &mut data);
        let decoded = decode_message(&data).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn parse_orderbook_text_bid_side() {
        let (side, levels) =
            parse_orderbook_text("#O|BBCA|BID|9000;10;90000|9050;5;45250").unwrap();
        assert_eq!(side, Side::Bid);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 9000.0);
        assert_eq!(levels[0].price_raw, "9000");
        assert_eq!(levels[0].lots, 10);
        assert_eq!(levels[0].total_value, 90000);
    }

    #[test]
    fn parse_orderbook_text_skips_malformed_level() {
        let (_, levels) = parse_orderbook_text("#O|BBCA|OFFER|garbage|9050;5;45250").unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, 9050.0);
    }

    #[test]
    fn parse_orderbook_text_rejects_too_few_parts() {
        assert!(parse_orderbook_text("#O|BBCA").is_err());
    }
}
