//! Window Extractor

use crate::error::AuditError;
use crate::models::{TradeSet, Window};

/// Inclusive `[min, max]` block time of the stream trades.
pub fn extract_window(stream: &TradeSet) -> Result<Window, AuditError> {
    let (start, end) = stream.block_time_range().ok_or(AuditError::EmptyStream)?;
    Window::new(start, end).ok_or(AuditError::EmptyStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_block_time, TradeRecord};

    fn trade(time: &str, sig: &str) -> TradeRecord {
        TradeRecord::new(parse_block_time(time).unwrap(), sig, 0, 0)
    }

    #[test]
    fn test_empty_stream_has_no_window() {
        let err = extract_window(&TradeSet::new()).unwrap_err();
        assert!(matches!(err, AuditError::EmptyStream));
    }

    #[test]
    fn test_window_ignores_arrival_order() {
        let stream: TradeSet = vec![
            trade("2025-03-01T12:00:07Z", "C"),
            trade("2025-03-01T12:00:02Z", "A"),
            trade("2025-03-01T12:00:09Z", "D"),
            trade("2025-03-01T12:00:04Z", "B"),
        ]
        .into_iter()
        .collect();

        let window = extract_window(&stream).unwrap();
        assert_eq!(window.start(), parse_block_time("2025-03-01T12:00:02Z").unwrap());
        assert_eq!(window.end(), parse_block_time("2025-03-01T12:00:09Z").unwrap());
        assert!(window.start() <= window.end());
    }

    #[test]
    fn test_single_trade_window_is_a_point() {
        let stream: TradeSet = vec![trade("2025-03-01T12:00:07Z", "C")].into_iter().collect();
        let window = extract_window(&stream).unwrap();
        assert_eq!(window.start(), window.end());
    }
}
