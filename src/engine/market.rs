//! Line-movement reading: how far the market moved off the opener and
//! whether it moved against the model's lean.

/// Line-behavior summary for one game.
#[derive(Debug, Clone, Copy)]
pub struct MarketBehavior {
    /// 0..1 score of how sharply the lines moved off the opener
    pub sharp_movement_score: f64,
    /// true when a line moved against the model's edge
    pub reverse_line_movement: bool,
    /// 0..1 blend of sharpness and movement agreement
    pub market_confidence_indicator: f64,
}

/// Compare opening and live lines against the model's spread/total edges.
/// Missing lines count as no movement.
pub fn analyze_line_behavior(
    opening_spread: Option<f64>,
    live_spread: Option<f64>,
    model_spread_edge: f64,
    opening_total: Option<f64>,
    live_total: Option<f64>,
    model_total_edge: f64,
) -> MarketBehavior {
    let spread_move = match (opening_spread, live_spread) {
        (Some(open), Some(live)) => live - open,
        _ => 0.0,
    };
    let total_move = match (opening_total, live_total) {
        (Some(open), Some(live)) => live - open,
        _ => 0.0,
    };

    let sharp_movement = ((spread_move.abs() + total_move.abs() / 2.0) / 4.0).min(1.0);
    let reverse_line_movement =
        spread_move * model_spread_edge < 0.0 || total_move * model_total_edge < 0.0;

    let rlm = if reverse_line_movement { 1.0 } else { 0.0 };
    let market_confidence = (0.55 * sharp_movement + 0.45 * (1.0 - rlm)).clamp(0.0, 1.0);

    MarketBehavior {
        sharp_movement_score: sharp_movement,
        reverse_line_movement,
        market_confidence_indicator: market_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn no_lines_means_no_movement() {
        let b = analyze_line_behavior(None, None, 6.0, None, None, 2.0);
        assert_relative_eq!(b.sharp_movement_score, 0.0);
        assert!(!b.reverse_line_movement);
        assert_relative_eq!(b.market_confidence_indicator, 0.45);
    }

    #[test]
    fn movement_with_the_model_builds_confidence() {
        // Both the line move and the model edge point the same way.
        let b = analyze_line_behavior(Some(-6.0), Some(-4.0), 8.0, Some(218.0), Some(218.0), 0.0);
        assert!(b.sharp_movement_score > 0.0);
        assert!(!b.reverse_line_movement);
        assert!(b.market_confidence_indicator > 0.45);
    }

    #[test]
    fn movement_against_the_model_flags_rlm() {
        // Line moves one way while the model edge points the other.
        let b = analyze_line_behavior(Some(-4.0), Some(-2.0), -8.0, None, None, 0.0);
        assert!(b.reverse_line_movement);
        assert!(b.market_confidence_indicator < 0.45);
    }

    #[test]
    fn sharpness_saturates_at_one() {
        let b = analyze_line_behavior(Some(-1.0), Some(-9.0), -1.0, Some(210.0), Some(230.0), 1.0);
        assert_relative_eq!(b.sharp_movement_score, 1.0);
    }
}
