//! Ocular-artifact correction: estimates the scalar mixing coefficient `d`
//! that minimizes the residual correlation between a contaminating channel
//! (EOG) and a target channel, so the caller can subtract `d * eog`.

use rand::Rng;
use rayon::prelude::*;

use crate::error::{Error, Result};

// OBJECTIVE -------------------------------------------------------------------

/// Pearson correlation; 0.0 when either signal has no variance.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let covariance: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n;

    let std_a = (a.iter().map(|&x| (x - mean_a).powi(2)).sum::<f64>() / n).sqrt();
    let std_b = (b.iter().map(|&x| (x - mean_b).powi(2)).sum::<f64>() / n).sqrt();

    if std_a == 0.0 || std_b == 0.0 {
        return 0.0;
    }

    covariance / (std_a * std_b)
}

/// |corr(target - d * contaminant, contaminant)| — the quantity the search
/// drives toward zero.
pub fn mixing_error(contaminant: &[f64], target: &[f64], d: f64) -> f64 {
    let residual: Vec<f64> = target
        .iter()
        .zip(contaminant.iter())
        .map(|(&t, &c)| t - d * c)
        .collect();
    correlation(&residual, contaminant).abs()
}

// HELPERS ---------------------------------------------------------------------

pub fn rms(x: &[f64]) -> f64 {
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

/// Removes the least-squares straight line from a signal. Run on the EOG
/// window before estimation to keep slow drifts (sweat, electrode movement)
/// out of the coefficient.
pub fn detrend(x: &[f64]) -> Vec<f64> {
    let n = x.len() as f64;
    if x.len() < 2 {
        return x.to_vec();
    }
    let mean_t = (n - 1.0) / 2.0;
    let mean_x = x.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &v) in x.iter().enumerate() {
        let dt = i as f64 - mean_t;
        num += dt * (v - mean_x);
        den += dt * dt;
    }
    let slope = num / den;
    let intercept = mean_x - slope * mean_t;
    x.iter()
        .enumerate()
        .map(|(i, &v)| v - (slope * i as f64 + intercept))
        .collect()
}

// SEARCH ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub initial_step: f64,
    /// Step size below which the estimate is accepted as converged.
    pub min_step: f64,
    /// Hard ceiling over all probe iterations.
    pub max_iterations: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            initial_step: 0.1,
            min_step: 1e-9,
            max_iterations: 100_000,
        }
    }
}

/// Estimates the mixing coefficient by a derivative-free probe search with
/// adaptive step halving. At each iteration the objective is evaluated one
/// step left and right of the current point; the search moves only on a
/// strict improvement and otherwise halves the step. This terminates even
/// when both probe errors are exactly equal; an equality-based stopping rule
/// can ping-pong forever.
///
/// Inputs must be equal length and already detrended; they are never
/// mutated. Hitting the iteration ceiling yields
/// `OptimizationDidNotConverge` carrying the best coefficient found so far.
pub fn estimate(contaminant: &[f64], target: &[f64]) -> Result<f64> {
    let start = rand::thread_rng().gen_range(-0.5..0.5);
    estimate_from(contaminant, target, start, SearchOptions::default())
}

pub fn estimate_from(
    contaminant: &[f64],
    target: &[f64],
    start: f64,
    opts: SearchOptions,
) -> Result<f64> {
    assert_eq!(
        contaminant.len(),
        target.len(),
        "contaminant and target must be equal length"
    );

    let mut d = start;
    let mut step = opts.initial_step;
    let mut best = mixing_error(contaminant, target, d);

    for iteration in 1..=opts.max_iterations {
        let left = mixing_error(contaminant, target, d - step);
        let right = mixing_error(contaminant, target, d + step);

        if left < best && left <= right {
            d -= step;
            best = left;
        } else if right < best {
            d += step;
            best = right;
        } else {
            // No strict improvement in either direction: refine.
            step /= 2.0;
            if step < opts.min_step {
                return Ok(d);
            }
        }

        if iteration == opts.max_iterations {
            return Err(Error::OptimizationDidNotConverge {
                coefficient: d,
                iterations: iteration,
            });
        }
    }
    Ok(d)
}

// PER-CHANNEL PROTOCOL --------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ChannelEstimate {
    pub coefficient: f64,
    pub converged: bool,
}

/// Runs the scale-then-estimate-then-rescale protocol over every channel of
/// a calibration window. The EOG window is detrended once; each channel's
/// amplitude difference is normalized by the ratio of RMS amplitudes before
/// the search and folded back into the returned coefficient. Required for
/// numerical stability across channels of very different amplitude.
///
/// CPU-bound; channels are independent, so they run in parallel.
pub fn estimate_all(data: &[Vec<f64>], eog_index: usize) -> Vec<ChannelEstimate> {
    let eog = detrend(&data[eog_index]);
    let rms_eog = rms(&eog);

    data.par_iter()
        .map(|channel| {
            let scale = rms(channel) / rms_eog;
            let scaled_eog: Vec<f64> = eog.iter().map(|v| v * scale).collect();
            match estimate(&scaled_eog, channel) {
                Ok(d) => ChannelEstimate {
                    coefficient: d * scale,
                    converged: true,
                },
                Err(Error::OptimizationDidNotConverge { coefficient, .. }) => ChannelEstimate {
                    coefficient: coefficient * scale,
                    converged: false,
                },
                Err(_) => unreachable!("probe search only fails by non-convergence"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(n: usize, d: f64) -> (Vec<f64>, Vec<f64>) {
        // Deterministic white-noise clean signal plus a sinusoidal blink.
        let mut clean = Vec::with_capacity(n);
        let mut state = 0x2545F4914F6CDD1Du64;
        for _ in 0..n {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            clean.push((state as f64 / u64::MAX as f64) - 0.5);
        }
        let eog: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 / 250.0).sin())
            .collect();
        let target: Vec<f64> = clean
            .iter()
            .zip(eog.iter())
            .map(|(&c, &e)| c + d * e)
            .collect();
        (eog, target)
    }

    #[test]
    fn recovers_true_mixing_coefficient() {
        let (eog, target) = synthetic(2500, 0.5);
        let d = estimate_from(&eog, &target, 0.0, SearchOptions::default()).unwrap();
        assert!((d - 0.5).abs() / 0.5 < 0.05, "estimated {}", d);
    }

    #[test]
    fn estimate_is_invariant_under_simultaneous_scaling() {
        let (eog, target) = synthetic(2000, 0.3);
        let scaled_eog: Vec<f64> = eog.iter().map(|v| v * 37.5).collect();
        let scaled_target: Vec<f64> = target.iter().map(|v| v * 37.5).collect();

        let d1 = estimate_from(&eog, &target, 0.0, SearchOptions::default()).unwrap();
        let d2 = estimate_from(&scaled_eog, &scaled_target, 0.0, SearchOptions::default()).unwrap();
        assert!((d1 - d2).abs() < 1e-3, "d1={} d2={}", d1, d2);
    }

    #[test]
    fn iteration_ceiling_is_reported_with_best_effort_coefficient() {
        let (eog, target) = synthetic(500, 0.5);
        let opts = SearchOptions {
            initial_step: 0.1,
            min_step: 1e-30,
            max_iterations: 3,
        };
        match estimate_from(&eog, &target, 0.0, opts) {
            Err(Error::OptimizationDidNotConverge { iterations, .. }) => assert_eq!(iterations, 3),
            other => panic!("expected non-convergence, got {:?}", other),
        }
    }

    #[test]
    fn flat_probe_landscape_terminates() {
        // Constant contaminant: objective is 0 everywhere. The strict
        // improvement rule halves the step until min_step and returns.
        let contaminant = vec![1.0; 100];
        let target: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let d = estimate_from(&contaminant, &target, 0.2, SearchOptions::default()).unwrap();
        assert_eq!(d, 0.2);
    }

    #[test]
    fn detrend_removes_straight_line() {
        let x: Vec<f64> = (0..100).map(|i| 3.0 + 0.5 * i as f64).collect();
        let out = detrend(&x);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn estimate_all_rescales_per_channel() {
        let (eog, target) = synthetic(2000, 0.2);
        // Second channel is the same mixture at 100x amplitude.
        let big: Vec<f64> = target.iter().map(|v| v * 100.0).collect();
        let data = vec![eog.clone(), target.clone(), big];

        let estimates = estimate_all(&data, 0);
        assert_eq!(estimates.len(), 3);
        assert!(estimates[1].converged);
        assert!((estimates[1].coefficient - 0.2).abs() < 0.05);
        assert!((estimates[2].coefficient - 20.0).abs() < 5.0);
    }
}
