//! Result types returned by a collection call.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

/// Mean, population standard deviation, min and max of a sequence.
///
/// All four are `0.0` for an empty sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl SequenceSummary {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

// ---------------------------------------------------------------------------
// Collection stats
// ---------------------------------------------------------------------------

/// What one `collect` call did.
///
/// The per-episode vectors are aligned: entry `i` of each describes the
/// `i`-th episode completed during the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Extrinsic return of every completed episode.
    pub returns: Vec<f32>,
    /// Intrinsic return of every completed episode (zeros when the policy
    /// supplies no intrinsic reward).
    pub intrinsic_returns: Vec<f32>,
    /// Length of every completed episode.
    pub lens: Vec<usize>,
    /// Global buffer index where every completed episode started.
    pub episode_starts: Vec<usize>,
    pub n_collected_steps: usize,
    pub n_collected_episodes: usize,
    /// Wall-clock seconds spent in the call.
    pub collect_time: f64,
    /// Steps per second.
    pub collect_speed: f64,
}

impl CollectionStats {
    pub fn returns_stat(&self) -> SequenceSummary {
        SequenceSummary::from_values(self.returns.iter().map(|&r| r as f64))
    }

    pub fn intrinsic_returns_stat(&self) -> SequenceSummary {
        SequenceSummary::from_values(self.intrinsic_returns.iter().map(|&r| r as f64))
    }

    pub fn lens_stat(&self) -> SequenceSummary {
        SequenceSummary::from_values(self.lens.iter().map(|&l| l as f64))
    }
}
