/// Canonical millisecond timestamps
///
/// Remote records carry timestamps of unknown vintage: seconds epochs,
/// millisecond epochs, numbers stored as strings, or nothing at all.
/// Everything funnels through `normalize_timestamp` before it is compared
/// or sorted.
use serde_json::Value;

/// Values in this range are read as seconds since the epoch (roughly the
/// years 2001..33658) and scaled up to milliseconds.
const SECONDS_EPOCH_MIN: f64 = 1e9;
const SECONDS_EPOCH_MAX: f64 = 1e12;

/// Current wall-clock time in canonical milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Coerce a raw, unit-ambiguous timestamp value to millisecond epoch.
///
/// Never panics; anything absent, non-numeric, negative, or non-finite
/// becomes 0.
pub fn normalize_timestamp(raw: Option<&Value>) -> u64 {
    let n = match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };

    if !n.is_finite() || n < 0.0 {
        return 0;
    }

    if (SECONDS_EPOCH_MIN..SECONDS_EPOCH_MAX).contains(&n) {
        (n * 1000.0) as u64
    } else {
        n as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seconds_epoch_scaled_to_ms() {
        let raw = json!(1_690_000_000);
        assert_eq!(normalize_timestamp(Some(&raw)), 1_690_000_000_000);
    }

    #[test]
    fn test_ms_epoch_passed_through() {
        let raw = json!(1_690_000_500_000u64);
        assert_eq!(normalize_timestamp(Some(&raw)), 1_690_000_500_000);

        let big = json!(2_000_000_000_000u64);
        assert_eq!(normalize_timestamp(Some(&big)), 2_000_000_000_000);
    }

    #[test]
    fn test_small_values_unchanged() {
        let raw = json!(5);
        assert_eq!(normalize_timestamp(Some(&raw)), 5);
    }

    #[test]
    fn test_garbage_defaults_to_zero() {
        assert_eq!(normalize_timestamp(None), 0);
        assert_eq!(normalize_timestamp(Some(&Value::Null)), 0);
        assert_eq!(normalize_timestamp(Some(&json!("abc"))), 0);
        assert_eq!(normalize_timestamp(Some(&json!(-42))), 0);
        assert_eq!(normalize_timestamp(Some(&json!({"nested": 1}))), 0);
    }

    #[test]
    fn test_numeric_string_accepted() {
        assert_eq!(
            normalize_timestamp(Some(&json!("1690000000"))),
            1_690_000_000_000
        );
    }
}
