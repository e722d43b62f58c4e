//! Epoch field rewrite.
//!
//! Advances every epoch timestamp embedded in a feed message by the relay
//! delay, so the message reads as if it had happened at delivery time.
//!
//! Matching is textual, not structural. A field is recognized when a quoted
//! key named `epoch` or ending in `_epoch` (`"epoch":`, `"prev_epoch":`) is
//! immediately followed by decimal digits. Consequences:
//!
//! - whitespace between the colon and the value defeats the match
//! - quoted values (`"epoch":"123"`) and negative values are left alone
//! - a value followed by `.`, `e` or `E` is not an integer and is left alone
//! - a value that does not fit `u64`, or would overflow it, is left alone
//!
//! Unmatched or malformed occurrences never raise errors. The rewrite is not
//! idempotent: applying it twice advances the fields twice.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::borrow::Cow;

static EPOCH_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:[A-Za-z0-9]+_)*epoch":([0-9]+)"#).expect("valid epoch field regex")
});

/// Result of a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten<'a> {
    /// Borrowed when no field was rewritten.
    pub bytes: Cow<'a, [u8]>,
    /// Number of epoch fields advanced.
    pub fields: u64,
}

/// Advance every recognized epoch field in `message` by `delay_secs`.
pub fn rewrite_epochs(message: &[u8], delay_secs: u64) -> Rewritten<'_> {
    let mut out: Option<Vec<u8>> = None;
    let mut copied_to = 0;
    let mut fields = 0;

    for caps in EPOCH_FIELD.captures_iter(message) {
        let Some(digits) = caps.get(1) else {
            continue;
        };
        if !ends_integer(message, digits.end()) {
            continue;
        }
        let Some(advanced) = parse_u64(digits.as_bytes()).and_then(|t| t.checked_add(delay_secs))
        else {
            continue;
        };

        let buf = out.get_or_insert_with(|| Vec::with_capacity(message.len() + 8));
        buf.extend_from_slice(&message[copied_to..digits.start()]);
        buf.extend_from_slice(advanced.to_string().as_bytes());
        copied_to = digits.end();
        fields += 1;
    }

    match out {
        Some(mut buf) => {
            buf.extend_from_slice(&message[copied_to..]);
            Rewritten {
                bytes: Cow::Owned(buf),
                fields,
            }
        }
        None => Rewritten {
            bytes: Cow::Borrowed(message),
            fields: 0,
        },
    }
}

fn ends_integer(message: &[u8], end: usize) -> bool {
    !matches!(message.get(end), Some(b'.' | b'e' | b'E'))
}

fn parse_u64(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite_str(message: &str, delay: u64) -> String {
        String::from_utf8(rewrite_epochs(message.as_bytes(), delay).bytes.into_owned()).unwrap()
    }

    #[test]
    fn test_single_epoch_advanced() {
        assert_eq!(
            rewrite_str(r#"{"epoch":1610000000,"quote":1234.5}"#, 60),
            r#"{"epoch":1610000060,"quote":1234.5}"#
        );
    }

    #[test]
    fn test_multiple_epochs_advanced() {
        let out = rewrite_epochs(br#"{"epoch":100,"prev_epoch":90}"#, 5);
        assert_eq!(&*out.bytes, br#"{"epoch":105,"prev_epoch":95}"#);
        assert_eq!(out.fields, 2);
    }

    #[test]
    fn test_no_epoch_is_identity() {
        let input = br#"{"status":"ok"}"#;
        let out = rewrite_epochs(input, 10);
        assert!(matches!(out.bytes, Cow::Borrowed(_)));
        assert_eq!(&*out.bytes, input);
        assert_eq!(out.fields, 0);
    }

    #[test]
    fn test_rewrite_is_not_idempotent() {
        let once = rewrite_str(r#"{"epoch":100}"#, 7);
        let twice = rewrite_str(&once, 7);
        assert_eq!(once, r#"{"epoch":107}"#);
        assert_ne!(once, twice);
        assert_eq!(twice, r#"{"epoch":114}"#);
    }

    #[test]
    fn test_nested_tick_message() {
        let input = r#"{"echo_req":{"ticks":"R_100"},"msg_type":"tick","subscription":{"id":"abc"},"tick":{"ask":1234.6,"bid":1234.4,"epoch":1610000000,"id":"abc","pip_size":2,"quote":1234.5,"symbol":"R_100"}}"#;
        let expected = input.replace("1610000000", "1610000003");
        assert_eq!(rewrite_str(input, 3), expected);
    }

    #[test]
    fn test_digit_count_may_grow() {
        assert_eq!(
            rewrite_str(r#"{"epoch":9999999999,"x":1}"#, 1),
            r#"{"epoch":10000000000,"x":1}"#
        );
    }

    #[test]
    fn test_out_year_values_supported() {
        // Far beyond 2038 and beyond i32/u32 range.
        assert_eq!(
            rewrite_str(r#"{"epoch":253402300799}"#, 60),
            r#"{"epoch":253402300859}"#
        );
    }

    #[test]
    fn test_zero_delay_keeps_bytes() {
        let input = r#"{"epoch":1610000000,"quote":1.5}"#;
        assert_eq!(rewrite_str(input, 0), input);
    }

    #[test]
    fn test_whitespace_after_colon_not_matched() {
        let input = r#"{"epoch": 100}"#;
        assert_eq!(rewrite_str(input, 5), input);
    }

    #[test]
    fn test_quoted_and_negative_values_not_matched() {
        let input = r#"{"epoch":"100","prev_epoch":-5}"#;
        assert_eq!(rewrite_str(input, 5), input);
    }

    #[test]
    fn test_fractional_value_not_matched() {
        let input = r#"{"epoch":100.25,"exp_epoch":2e3}"#;
        assert_eq!(rewrite_str(input, 5), input);
    }

    #[test]
    fn test_similar_keys_not_matched() {
        let input = r#"{"epochs":1,"myepoch":2,"epoch_id":3}"#;
        assert_eq!(rewrite_str(input, 5), input);
    }

    #[test]
    fn test_overflow_left_unchanged() {
        let max = u64::MAX;
        let input = format!(r#"{{"epoch":{max},"prev_epoch":1}}"#);
        let expected = format!(r#"{{"epoch":{max},"prev_epoch":2}}"#);
        assert_eq!(rewrite_str(&input, 1), expected);

        let too_wide = r#"{"epoch":123456789012345678901234567890}"#;
        assert_eq!(rewrite_str(too_wide, 1), too_wide);
    }

    #[test]
    fn test_non_utf8_bytes_preserved() {
        let mut input = b"\xff\xfe{\"epoch\":1}".to_vec();
        input.extend_from_slice(b"\x80");
        let out = rewrite_epochs(&input, 1);
        assert_eq!(&*out.bytes, b"\xff\xfe{\"epoch\":2}\x80");
    }
}
