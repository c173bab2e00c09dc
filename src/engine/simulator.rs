//! Monte Carlo score simulation. A pure numeric transform: the same game
//! ID and inputs always reproduce the same draw sequence.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

/// Floor on the per-side standard deviation; a near-zero model variance
/// must not collapse the score distribution.
const MIN_SCORE_STD: f64 = 8.0;

/// Plausible single-team score range; draws outside are clipped.
const SCORE_MIN: f64 = 70.0;
const SCORE_MAX: f64 = 170.0;

/// Aggregate outcome of one Monte Carlo run.
#[derive(Debug, Clone, Copy)]
pub struct SimulationResult {
    /// Fraction of draws where the home side covered the spread
    pub spread_cover_probability: f64,
    /// Fraction of draws where combined score beat the total line
    pub over_probability: f64,
    pub expected_home_score: f64,
    pub expected_visitor_score: f64,
    pub predicted_margin: f64,
    pub predicted_total: f64,
    pub margin_std: f64,
    pub total_std: f64,
    /// Margin variance plus total variance, one combined spread metric
    pub score_distribution_variance: f64,
    pub simulation_count: usize,
}

/// Simulate one game. Per-side scores are drawn from a normal centered at
/// the predicted score, clipped into a plausible range. Cover probability
/// is graded against the home spread line, over probability against the
/// total line.
#[allow(clippy::too_many_arguments)]
pub fn simulate(
    game_id: i64,
    predicted_home_score: f64,
    predicted_visitor_score: f64,
    home_variance: f64,
    visitor_variance: f64,
    spread_line: f64,
    total_line: f64,
    n_sim: usize,
) -> SimulationResult {
    let seed = game_id.rem_euclid(1_000_000) as u64;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let home_std = home_variance.max(0.0).sqrt().max(MIN_SCORE_STD);
    let visitor_std = visitor_variance.max(0.0).sqrt().max(MIN_SCORE_STD);
    // Parameters are validated above, construction cannot fail.
    let home_dist = Normal::new(predicted_home_score, home_std).unwrap();
    let visitor_dist = Normal::new(predicted_visitor_score, visitor_std).unwrap();

    let mut margins = Vec::with_capacity(n_sim);
    let mut totals = Vec::with_capacity(n_sim);
    let mut home_sum = 0.0;
    let mut visitor_sum = 0.0;
    let mut covers = 0usize;
    let mut overs = 0usize;

    for _ in 0..n_sim {
        let home = draw_clipped(&home_dist, &mut rng);
        let visitor = draw_clipped(&visitor_dist, &mut rng);
        let margin = home - visitor;
        let total = home + visitor;

        if margin + spread_line > 0.0 {
            covers += 1;
        }
        if total > total_line {
            overs += 1;
        }
        home_sum += home;
        visitor_sum += visitor;
        margins.push(margin);
        totals.push(total);
    }

    let n = n_sim as f64;
    let margin_mean = margins.iter().sum::<f64>() / n;
    let total_mean = totals.iter().sum::<f64>() / n;
    let margin_var = variance(&margins, margin_mean);
    let total_var = variance(&totals, total_mean);

    SimulationResult {
        spread_cover_probability: covers as f64 / n,
        over_probability: overs as f64 / n,
        expected_home_score: home_sum / n,
        expected_visitor_score: visitor_sum / n,
        predicted_margin: margin_mean,
        predicted_total: total_mean,
        margin_std: margin_var.sqrt(),
        total_std: total_var.sqrt(),
        score_distribution_variance: total_var + margin_var,
        simulation_count: n_sim,
    }
}

fn draw_clipped(dist: &Normal, rng: &mut ChaCha8Rng) -> f64 {
    use rand::distributions::Distribution;
    dist.sample(rng).clamp(SCORE_MIN, SCORE_MAX)
}

fn variance(samples: &[f64], mean: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run_default(game_id: i64) -> SimulationResult {
        simulate(game_id, 112.0, 106.0, 64.0, 64.0, -4.0, 218.0, 10_000)
    }

    #[test]
    fn same_game_is_bit_identical() {
        let a = run_default(42);
        let b = run_default(42);
        assert_eq!(a.spread_cover_probability, b.spread_cover_probability);
        assert_eq!(a.over_probability, b.over_probability);
        assert_eq!(a.expected_home_score, b.expected_home_score);
        assert_eq!(a.score_distribution_variance, b.score_distribution_variance);
    }

    #[test]
    fn different_games_diverge() {
        let a = run_default(42);
        let b = run_default(43);
        assert_ne!(a.expected_home_score, b.expected_home_score);
    }

    #[test]
    fn seed_wraps_modulo_million() {
        let a = run_default(42);
        let b = run_default(42 + 1_000_000);
        assert_eq!(a.spread_cover_probability, b.spread_cover_probability);
        assert_eq!(a.predicted_margin, b.predicted_margin);
    }

    #[test]
    fn worked_example_six_point_favorite() {
        // Home favored by 6 against a -4 line: cover probability should sit
        // moderately above a coin flip, total near the 218 line.
        let r = run_default(42);
        assert_eq!(r.simulation_count, 10_000);
        assert!(r.spread_cover_probability > 0.52 && r.spread_cover_probability < 0.65);
        assert!(r.over_probability > 0.40 && r.over_probability < 0.60);
        assert_relative_eq!(r.expected_home_score, 112.0, epsilon = 0.5);
        assert_relative_eq!(r.expected_visitor_score, 106.0, epsilon = 0.5);
        assert_relative_eq!(r.predicted_margin, 6.0, epsilon = 0.7);
        assert_relative_eq!(r.predicted_total, 218.0, epsilon = 1.0);
        assert!(r.score_distribution_variance > 0.0);
    }

    #[test]
    fn variance_floor_applies() {
        // Zero model variance still produces a spread of outcomes.
        let r = simulate(7, 110.0, 105.0, 0.0, 0.0, 0.0, 215.0, 10_000);
        assert!(r.margin_std > 5.0);
        assert!(r.total_std > 5.0);
    }

    #[test]
    fn draws_are_clipped_to_plausible_scores() {
        // Extreme variance: means stay pulled inside the clip range.
        let r = simulate(9, 120.0, 100.0, 10_000.0, 10_000.0, 0.0, 220.0, 5_000);
        assert!(r.expected_home_score >= SCORE_MIN && r.expected_home_score <= SCORE_MAX);
        assert!(r.expected_visitor_score >= SCORE_MIN && r.expected_visitor_score <= SCORE_MAX);
    }
}
