//! Mapping between raw evaluation scores and expected game outcome.
//!
//! The training target for an evaluation network is a game score in [0, 1];
//! these curves convert an unbounded eval into win/draw probabilities and an
//! expected score, together with the derivatives backpropagation needs.

const WIN_PROBABILITY_OFFSET: f32 = 2.0;
const WIN_PROBABILITY_SCALE: f32 = 1.0;

pub fn eval_to_win_probability(eval: f32) -> f32 {
    1.0 / (1.0 + ((-eval + WIN_PROBABILITY_OFFSET) / WIN_PROBABILITY_SCALE).exp())
}

pub fn eval_to_draw_probability(eval: f32) -> f32 {
    let win_probability = eval_to_win_probability(eval);
    let loss_probability = eval_to_win_probability(-eval);
    1.0 - win_probability - loss_probability
}

pub fn eval_to_expected_game_score(eval: f32) -> f32 {
    let win_probability = eval_to_win_probability(eval);
    let loss_probability = eval_to_win_probability(-eval);
    (1.0 + win_probability - loss_probability) / 2.0
}

pub fn eval_to_win_probability_derivative(eval: f32) -> f32 {
    let t = ((-eval + WIN_PROBABILITY_OFFSET) / WIN_PROBABILITY_SCALE).exp();
    t / (WIN_PROBABILITY_SCALE * (1.0 + t) * (1.0 + t))
}

pub fn eval_to_expected_game_score_derivative(eval: f32) -> f32 {
    let win_probability_derivative = eval_to_win_probability_derivative(eval);
    let loss_probability_derivative = eval_to_win_probability_derivative(-eval);
    (win_probability_derivative + loss_probability_derivative) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_score_is_half_at_balance() {
        assert!((eval_to_expected_game_score(0.0) - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn probabilities_sum_to_one() {
        for eval in [-3.0f32, -0.5, 0.0, 1.25, 4.0] {
            let total = eval_to_win_probability(eval)
                + eval_to_win_probability(-eval)
                + eval_to_draw_probability(eval);
            assert!((total - 1.0).abs() < 1.0e-6);
        }
    }

    #[test]
    fn score_derivative_matches_finite_difference() {
        let h = 1.0e-3f32;
        for eval in [-2.0f32, -0.5, 0.0, 0.75, 2.5] {
            let numeric = (eval_to_expected_game_score(eval + h)
                - eval_to_expected_game_score(eval - h))
                / (2.0 * h);
            let analytic = eval_to_expected_game_score_derivative(eval);
            assert!(
                (numeric - analytic).abs() < 1.0e-3,
                "eval {eval}: numeric {numeric} vs analytic {analytic}"
            );
        }
    }

    #[test]
    fn expected_score_is_monotonic() {
        let mut previous = eval_to_expected_game_score(-6.0);
        let mut eval = -5.5f32;
        while eval <= 6.0 {
            let score = eval_to_expected_game_score(eval);
            assert!(score >= previous);
            previous = score;
            eval += 0.5;
        }
    }
}
