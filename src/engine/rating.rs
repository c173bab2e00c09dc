//! Pure rating math: star staircase, edge scores, expected value and
//! fractional Kelly stake sizing. No I/O, no state.

use crate::db::models::{SpreadPick, TotalPick};

/// Standard two-way juice price used when a bookmaker price is not tracked.
pub const DEFAULT_ODDS: f64 = 1.91;

/// Simulation-variance scale for the tightness term of the confidence blend.
const TIGHTNESS_SCALE: f64 = 150.0;

/// Rating for one market (spread or total) of one game.
#[derive(Debug, Clone, Copy)]
pub struct MarketRating {
    /// Signed edge versus the 50% implied line, in percent
    pub edge_pct: f64,
    pub stars: u8,
    /// Model probability expressed as a percentage
    pub confidence_pct: f64,
    pub recommendation_index: f64,
}

/// Sized stake recommendation.
#[derive(Debug, Clone, Copy)]
pub struct KellyStake {
    pub recommended_stake: f64,
    pub bankroll_after_bet: f64,
}

/// Map an absolute edge (in percent) onto the 0..5 star staircase.
pub fn edge_to_stars(edge_pct: f64) -> u8 {
    let e = edge_pct.abs();
    if e >= 15.0 {
        5
    } else if e >= 12.0 {
        4
    } else if e >= 9.0 {
        3
    } else if e >= 7.0 {
        2
    } else if e >= 5.0 {
        1
    } else {
        0
    }
}

/// Absolute distance of the model probability from the implied line,
/// scaled to 0..100.
pub fn compute_edge_score(model_prob: f64, implied_prob: f64) -> f64 {
    ((model_prob - implied_prob).abs() * 100.0).clamp(0.0, 100.0)
}

/// Expected value per unit staked at decimal odds.
pub fn compute_ev(probability: f64, odds: f64) -> f64 {
    probability * odds - 1.0
}

/// Fractional Kelly stake. Zero whenever the bet has no positive
/// expectation or the odds carry no payout.
pub fn compute_kelly_stake(probability: f64, odds: f64, bankroll: f64, fraction: f64) -> KellyStake {
    debug_assert!((0.0..=1.0).contains(&probability));
    debug_assert!(bankroll >= 0.0);

    let numerator = probability * odds - 1.0;
    let denominator = odds - 1.0;
    let stake = if numerator <= 0.0 || denominator <= 0.0 {
        0.0
    } else {
        round2(bankroll * (numerator / denominator) * fraction)
    };
    KellyStake {
        recommended_stake: stake,
        bankroll_after_bet: round2(bankroll - stake),
    }
}

/// Rate the spread market from its blended probability.
pub fn compute_spread_rating(prob: f64) -> MarketRating {
    rate_market(prob)
}

/// Rate the total market from its blended probability.
pub fn compute_total_rating(prob: f64) -> MarketRating {
    rate_market(prob)
}

fn rate_market(prob: f64) -> MarketRating {
    let edge_pct = (prob - 0.5) * 100.0;
    MarketRating {
        edge_pct,
        stars: edge_to_stars(edge_pct),
        confidence_pct: prob * 100.0,
        recommendation_index: compute_edge_score(prob, 0.5) * 10.0,
    }
}

/// Combined confidence in [0,1]: the edge term dominates, a tight
/// simulation distribution and a confident market each add a share.
pub fn confidence_score(edge_pct: f64, simulation_variance: f64, market_confidence: f64) -> f64 {
    let edge_frac = (edge_pct.abs() / 100.0).min(1.0);
    let tightness = 1.0 / (1.0 + simulation_variance.max(0.0) / TIGHTNESS_SCALE);
    (0.45 * edge_frac + 0.30 * tightness + 0.25 * market_confidence).clamp(0.0, 1.0)
}

/// Game-level rating rolled up from the strongest market edge.
#[derive(Debug, Clone, Copy)]
pub struct CombinedRating {
    pub confidence_score: f64,
    pub star_rating: u8,
    pub recommendation_index: f64,
}

pub fn compute_combined_rating(
    edge_pct: f64,
    simulation_variance: f64,
    market_confidence: f64,
) -> CombinedRating {
    let confidence = confidence_score(edge_pct, simulation_variance, market_confidence);
    CombinedRating {
        confidence_score: confidence,
        star_rating: edge_to_stars(edge_pct),
        recommendation_index: (confidence * 1000.0).round() / 10.0,
    }
}

/// Render stars for digests, e.g. `★★★☆☆`.
pub fn stars_display(stars: u8) -> String {
    let filled = stars.min(5) as usize;
    let mut s = String::with_capacity(5 * 3);
    for _ in 0..filled {
        s.push('★');
    }
    for _ in filled..5 {
        s.push('☆');
    }
    s
}

/// Whether a spread pick covered against the given home line.
/// Without a line the pick is graded incorrect rather than skipped.
pub fn is_spread_correct(
    pick: SpreadPick,
    home_score: i32,
    visitor_score: i32,
    spread_home: Option<f64>,
) -> bool {
    let Some(line) = spread_home else {
        return false;
    };
    let margin = f64::from(home_score - visitor_score);
    // pushes grade to the away side
    match pick {
        SpreadPick::Home => margin + line > 0.0,
        SpreadPick::Away => margin + line <= 0.0,
    }
}

/// Whether a total pick landed against the given total line.
pub fn is_total_correct(
    pick: TotalPick,
    home_score: i32,
    visitor_score: i32,
    total_line: Option<f64>,
) -> bool {
    let Some(line) = total_line else {
        return false;
    };
    let total = f64::from(home_score + visitor_score);
    // pushes grade to the under
    match pick {
        TotalPick::Over => total > line,
        TotalPick::Under => total <= line,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn star_staircase_boundaries() {
        assert_eq!(edge_to_stars(4.99), 0);
        assert_eq!(edge_to_stars(5.0), 1);
        assert_eq!(edge_to_stars(7.0), 2);
        assert_eq!(edge_to_stars(9.0), 3);
        assert_eq!(edge_to_stars(12.0), 4);
        assert_eq!(edge_to_stars(15.0), 5);
        assert_eq!(edge_to_stars(40.0), 5);
        // symmetric in sign
        assert_eq!(edge_to_stars(-9.5), 3);
    }

    #[test]
    fn star_staircase_is_monotone() {
        let mut prev = 0;
        for i in 0..=200 {
            let stars = edge_to_stars(i as f64 * 0.1);
            assert!(stars >= prev);
            prev = stars;
        }
    }

    #[test]
    fn edge_score_is_clamped() {
        assert_relative_eq!(compute_edge_score(0.58, 0.5), 8.0, epsilon = 1e-9);
        assert_relative_eq!(compute_edge_score(0.42, 0.5), 8.0, epsilon = 1e-9);
        assert_relative_eq!(compute_edge_score(1.0, 0.0), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn ev_at_fair_odds() {
        assert_relative_eq!(compute_ev(0.5236, 1.91), 0.5236 * 1.91 - 1.0);
        assert!(compute_ev(0.40, 1.91) < 0.0);
    }

    #[test]
    fn kelly_positive_edge_stakes_under_half_bankroll() {
        let stake = compute_kelly_stake(0.60, 1.91, 10_000.0, 0.5);
        assert!(stake.recommended_stake > 0.0);
        assert!(stake.recommended_stake < 5_000.0);
        assert_relative_eq!(
            stake.bankroll_after_bet,
            10_000.0 - stake.recommended_stake,
            epsilon = 1e-9
        );
    }

    #[test]
    fn kelly_negative_edge_is_exactly_zero() {
        let stake = compute_kelly_stake(0.40, 1.91, 10_000.0, 0.5);
        assert_eq!(stake.recommended_stake, 0.0);
        assert_relative_eq!(stake.bankroll_after_bet, 10_000.0);
    }

    #[test]
    fn kelly_degenerate_odds_is_zero() {
        let stake = compute_kelly_stake(0.99, 1.0, 10_000.0, 0.5);
        assert_eq!(stake.recommended_stake, 0.0);
    }

    #[test]
    fn market_rating_fields() {
        let r = compute_spread_rating(0.58);
        assert_relative_eq!(r.edge_pct, 8.0, epsilon = 1e-9);
        assert_eq!(r.stars, 2);
        assert_relative_eq!(r.confidence_pct, 58.0, epsilon = 1e-9);
        assert_relative_eq!(r.recommendation_index, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn confidence_rises_with_tighter_simulation() {
        let loose = confidence_score(8.0, 600.0, 0.5);
        let tight = confidence_score(8.0, 100.0, 0.5);
        assert!(tight > loose);
        assert!((0.0..=1.0).contains(&tight));
    }

    #[test]
    fn grading_respects_lines_and_sides() {
        // home -4, wins by 6: home covers
        assert!(is_spread_correct(SpreadPick::Home, 112, 106, Some(-4.0)));
        assert!(!is_spread_correct(SpreadPick::Away, 112, 106, Some(-4.0)));
        // wins by 3 against -4: away covers
        assert!(is_spread_correct(SpreadPick::Away, 109, 106, Some(-4.0)));
        // push grades to the away side
        assert!(is_spread_correct(SpreadPick::Away, 110, 106, Some(-4.0)));
        assert!(!is_spread_correct(SpreadPick::Home, 110, 106, Some(-4.0)));
        // missing line grades incorrect
        assert!(!is_spread_correct(SpreadPick::Home, 112, 106, None));

        assert!(is_total_correct(TotalPick::Over, 115, 110, Some(218.0)));
        assert!(is_total_correct(TotalPick::Under, 100, 100, Some(218.0)));
        assert!(!is_total_correct(TotalPick::Over, 100, 100, None));
    }

    #[test]
    fn stars_render() {
        assert_eq!(stars_display(0), "☆☆☆☆☆");
        assert_eq!(stars_display(3), "★★★☆☆");
        assert_eq!(stars_display(9), "★★★★★");
    }
}
