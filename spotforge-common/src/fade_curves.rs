//! Fade curve definitions
//!
//! The four curves the mixer accepts, matching the audio toolchain's fade
//! shape vocabulary. Gain functions are provided for the in-memory test
//! processor; the child-process adapter passes the curve name through.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Fade curve types for voice fades in the final mix
///
/// - Linear: constant rate of change
/// - Exp: slow start, fast finish (natural fade-in)
/// - Qsin: quarter sine, smooth and musical
/// - Log: fast start, slow finish (natural fade-out)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeCurve {
    Linear,
    Exp,
    Qsin,
    Log,
}

impl FadeCurve {
    /// Fade-in multiplier at normalized position 0.0..=1.0.
    pub fn gain_in(&self, position: f64) -> f64 {
        let t = position.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exp => t * t,
            FadeCurve::Qsin => (t * FRAC_PI_2).sin(),
            // Inverted quadratic gives the fast-start shape for fade-in
            FadeCurve::Log => t.sqrt(),
        }
    }

    /// Fade-out multiplier at normalized position 0.0..=1.0.
    pub fn gain_out(&self, position: f64) -> f64 {
        let t = position.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exp => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::Qsin => (t * FRAC_PI_2).cos(),
            FadeCurve::Log => (1.0 - t).sqrt(),
        }
    }

    /// Curve name understood by the audio toolchain's fade filter.
    pub fn toolchain_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "tri",
            FadeCurve::Exp => "exp",
            FadeCurve::Qsin => "qsin",
            FadeCurve::Log => "log",
        }
    }

    /// Parse a curve from its wire string. Unknown values are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" | "tri" => Some(FadeCurve::Linear),
            "exp" | "exponential" => Some(FadeCurve::Exp),
            "qsin" => Some(FadeCurve::Qsin),
            "log" | "logarithmic" => Some(FadeCurve::Log),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exp => "exp",
            FadeCurve::Qsin => "qsin",
            FadeCurve::Log => "log",
        }
    }

    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exp,
            FadeCurve::Qsin,
            FadeCurve::Log,
        ]
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::Exp
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
