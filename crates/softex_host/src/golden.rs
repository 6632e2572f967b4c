//! Double-precision reference softmax.

/// Normalized probabilities of `scores` and their denominator
/// `sum(exp(x - max))`.
pub fn softmax(scores: &[f64]) -> (Vec<f64>, f64) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&x| (x - max).exp()).collect();
    let denominator: f64 = exps.iter().sum();
    let probs = exps.into_iter().map(|e| e / denominator).collect();
    (probs, denominator)
}
