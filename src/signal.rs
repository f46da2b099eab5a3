//! RSSI smoothing and conversion to a normalized signal strength.
//!
//! Raw RSSI samples are first smoothed with an [`RssiSmoother`], then mapped onto `[0, 1]` by a
//! [`SignalConverter`]. Every conversion strategy is monotonically non-decreasing in its input.

use crate::error::ErrorKind;
use crate::{Error, Result};

/// Default lower bound, in dBm, of the linear mappings.
pub const DEFAULT_MIN_RSSI: f64 = -100.0;
/// Default upper bound, in dBm, of the linear mappings.
pub const DEFAULT_MAX_RSSI: f64 = -30.0;

/// Selects how RSSI values are mapped onto `[0, 1]`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum SignalStrategy {
    /// Linear between `min` and `max`, widening the bounds whenever a sample falls outside them.
    AutoExpanding {
        /// Initial lower bound in dBm
        min: f64,
        /// Initial upper bound in dBm
        max: f64,
    },
    /// Linear between fixed bounds; samples outside are clamped.
    FixedRange {
        /// Lower bound in dBm, maps to 0
        min: f64,
        /// Upper bound in dBm, maps to 1
        max: f64,
    },
    /// Linear interpolation between `(rssi, strength)` breakpoints, giving each RSSI band its own slope.
    ///
    /// Breakpoints must be sorted by strictly increasing RSSI with non-decreasing strengths in `[0, 1]`.
    Piecewise(Vec<(f64, f64)>),
}

impl Default for SignalStrategy {
    fn default() -> Self {
        SignalStrategy::AutoExpanding {
            min: DEFAULT_MIN_RSSI,
            max: DEFAULT_MAX_RSSI,
        }
    }
}

impl SignalStrategy {
    /// A piecewise curve that favours resolution in the typical indoor range.
    pub fn indoor() -> Self {
        SignalStrategy::Piecewise(vec![
            (-100.0, 0.0),
            (-90.0, 0.1),
            (-75.0, 0.45),
            (-60.0, 0.8),
            (-45.0, 1.0),
        ])
    }
}

/// Maps smoothed RSSI values onto a `[0, 1]` signal strength.
///
/// The auto-expanding strategy keeps its bounds for the lifetime of the converter; they only ever widen.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConverter {
    strategy: SignalStrategy,
}

impl Default for SignalConverter {
    fn default() -> Self {
        SignalConverter {
            strategy: SignalStrategy::default(),
        }
    }
}

impl SignalConverter {
    /// Builds a converter, validating the strategy's parameters.
    pub fn new(strategy: SignalStrategy) -> Result<Self> {
        match &strategy {
            SignalStrategy::AutoExpanding { min, max } | SignalStrategy::FixedRange { min, max } => {
                if !(min.is_finite() && max.is_finite() && min < max) {
                    return Err(Error::new(
                        ErrorKind::InvalidParameter,
                        format!("invalid RSSI range [{min}, {max}]"),
                    ));
                }
            }
            SignalStrategy::Piecewise(points) => validate_breakpoints(points)?,
        }
        Ok(SignalConverter { strategy })
    }

    /// The active strategy, including the current bounds of an auto-expanding converter.
    pub fn strategy(&self) -> &SignalStrategy {
        &self.strategy
    }

    /// The current `(min, max)` bounds for the linear strategies.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self.strategy {
            SignalStrategy::AutoExpanding { min, max } | SignalStrategy::FixedRange { min, max } => Some((min, max)),
            SignalStrategy::Piecewise(_) => None,
        }
    }

    /// Converts `rssi` (dBm) to a strength in `[0, 1]`.
    ///
    /// Non-finite input never moves the bounds: NaN and negative infinity map to 0, positive infinity to 1.
    pub fn convert(&mut self, rssi: f64) -> f64 {
        if rssi.is_nan() {
            return 0.0;
        }
        match &mut self.strategy {
            SignalStrategy::AutoExpanding { min, max } => {
                if rssi.is_finite() {
                    if rssi < *min {
                        tracing::trace!(from = *min, to = rssi, "widening lower RSSI bound");
                        *min = rssi;
                    }
                    if rssi > *max {
                        tracing::trace!(from = *max, to = rssi, "widening upper RSSI bound");
                        *max = rssi;
                    }
                }
                linear(rssi, *min, *max)
            }
            SignalStrategy::FixedRange { min, max } => linear(rssi, *min, *max),
            SignalStrategy::Piecewise(points) => piecewise(rssi, points),
        }
    }
}

fn linear(rssi: f64, min: f64, max: f64) -> f64 {
    ((rssi - min) / (max - min)).clamp(0.0, 1.0)
}

fn piecewise(rssi: f64, points: &[(f64, f64)]) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return 0.0,
    };
    if rssi <= first.0 {
        return first.1;
    }
    if rssi >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if rssi <= x1 {
            return (y0 + (rssi - x0) / (x1 - x0) * (y1 - y0)).clamp(0.0, 1.0);
        }
    }
    last.1
}

fn validate_breakpoints(points: &[(f64, f64)]) -> Result<()> {
    let invalid = |why: &str| Error::new(ErrorKind::InvalidParameter, format!("invalid signal breakpoints: {why}"));
    if points.is_empty() {
        return Err(invalid("no breakpoints"));
    }
    if points
        .iter()
        .any(|&(x, y)| !x.is_finite() || !(0.0..=1.0).contains(&y))
    {
        return Err(invalid("strength must be within [0, 1]"));
    }
    if points.windows(2).any(|w| w[0].0 >= w[1].0 || w[0].1 > w[1].1) {
        return Err(invalid("breakpoints must increase"));
    }
    Ok(())
}

/// Exponential moving average over raw RSSI samples.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RssiSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl RssiSmoother {
    /// Creates a smoother weighting each new sample by `alpha`, clamped to `(0, 1]`.
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 { alpha.min(1.0) } else { 1.0 };
        RssiSmoother { alpha, value: None }
    }

    /// Feeds a raw sample and returns the smoothed value. The first sample seeds the average.
    pub fn update(&mut self, raw: i16) -> f64 {
        let raw = f64::from(raw);
        let next = match self.value {
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
            None => raw,
        };
        self.value = Some(next);
        next
    }

    /// The current smoothed value, if any sample has been seen.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_expanding_seeds_and_maps() {
        let mut conv = SignalConverter::default();
        assert_eq!(conv.bounds(), Some((-100.0, -30.0)));
        assert_eq!(conv.convert(-100.0), 0.0);
        assert_eq!(conv.convert(-30.0), 1.0);
        assert!((conv.convert(-65.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn auto_expanding_bounds_only_widen() {
        let mut conv = SignalConverter::default();
        assert_eq!(conv.convert(-110.0), 0.0);
        assert_eq!(conv.bounds(), Some((-110.0, -30.0)));
        assert_eq!(conv.convert(-20.0), 1.0);
        assert_eq!(conv.bounds(), Some((-110.0, -20.0)));
        conv.convert(-60.0);
        assert_eq!(conv.bounds(), Some((-110.0, -20.0)));
    }

    #[test]
    fn every_strategy_is_monotonic_and_bounded() {
        for strategy in [
            SignalStrategy::default(),
            SignalStrategy::FixedRange { min: -90.0, max: -40.0 },
            SignalStrategy::indoor(),
        ] {
            let mut conv = SignalConverter::new(strategy).unwrap();
            let mut prev = 0.0;
            let mut rssi = -130.0;
            while rssi <= 10.0 {
                let out = conv.convert(rssi);
                assert!((0.0..=1.0).contains(&out), "{out} out of range for {rssi}");
                assert!(out >= prev, "not monotonic at {rssi}: {out} < {prev}");
                prev = out;
                rssi += 0.5;
            }
        }
    }

    #[test]
    fn non_finite_input_leaves_bounds() {
        let mut conv = SignalConverter::default();
        assert_eq!(conv.convert(f64::NAN), 0.0);
        assert_eq!(conv.convert(f64::NEG_INFINITY), 0.0);
        assert_eq!(conv.convert(f64::INFINITY), 1.0);
        assert_eq!(conv.bounds(), Some((-100.0, -30.0)));
    }

    #[test]
    fn piecewise_uses_band_slopes() {
        let mut conv = SignalConverter::new(SignalStrategy::Piecewise(vec![(-100.0, 0.0), (-80.0, 0.2), (-60.0, 1.0)]))
            .unwrap();
        assert!((conv.convert(-90.0) - 0.1).abs() < 1e-9);
        assert!((conv.convert(-70.0) - 0.6).abs() < 1e-9);
        assert_eq!(conv.convert(-20.0), 1.0);
    }

    #[test]
    fn rejects_bad_strategies() {
        assert!(SignalConverter::new(SignalStrategy::FixedRange { min: -30.0, max: -30.0 }).is_err());
        assert!(SignalConverter::new(SignalStrategy::Piecewise(vec![])).is_err());
        assert!(SignalConverter::new(SignalStrategy::Piecewise(vec![(-90.0, 0.5), (-60.0, 0.2)])).is_err());
    }

    #[test]
    fn smoother_seeds_then_averages() {
        let mut ema = RssiSmoother::new(0.25);
        assert_eq!(ema.update(-80), -80.0);
        assert_eq!(ema.update(-40), -70.0);
        assert_eq!(ema.value(), Some(-70.0));
    }
}
