//! Engine configuration.
//!
//! All settings are passed explicitly to [`Engine::new`](crate::engine::Engine::new);
//! nothing is read from the environment.

use serde::{Deserialize, Serialize};

use crate::error::{CollocateError, Result};

/// Top-level engine settings.
///
/// ```
/// use collocate_impl::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!((config.min_window, config.max_window), (3, 20));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Smallest accepted collocation window (tokens per side).
    pub min_window: usize,
    /// Largest accepted collocation window (tokens per side).
    pub max_window: usize,
    /// Tokens per side shown around a concordance match.
    pub extended_window: usize,
    pub default_page_size: usize,
    /// Upper bound on per-subcorpus analyses running at once.
    pub max_concurrency: usize,
    pub measures: MeasureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_window: 3,
            max_window: 20,
            extended_window: 20,
            default_page_size: 10,
            max_concurrency: num_cpus::get().max(1),
            measures: MeasureConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn check_window(&self, window: usize) -> Result<()> {
        if window < self.min_window || window > self.max_window {
            return Err(CollocateError::invalid(
                "window",
                format!(
                    "{} is outside [{}, {}]",
                    window, self.min_window, self.max_window
                ),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_window > self.max_window {
            return Err(CollocateError::invalid(
                "min_window",
                "must not exceed max_window",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(CollocateError::invalid("max_concurrency", "must be positive"));
        }
        self.measures.validate()
    }
}

/// Constants used by the association measures for zero cells and the
/// conservative log ratio's confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    /// Stand-in for a zero `O11` in t-score and mutual information.
    pub disc: f64,
    /// Added to every frequency in (conservative) log ratio.
    pub log_ratio_disc: f64,
    /// Two-sided significance level of the conservative log ratio.
    pub clr_alpha: f64,
    /// Divide `clr_alpha` by the number of scored items.
    pub clr_bonferroni: bool,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        MeasureConfig {
            disc: 0.001,
            log_ratio_disc: 0.5,
            clr_alpha: 0.001,
            clr_bonferroni: true,
        }
    }
}

impl MeasureConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.disc > 0.0) {
            return Err(CollocateError::invalid("disc", "must be positive"));
        }
        if !(self.log_ratio_disc > 0.0) {
            return Err(CollocateError::invalid("log_ratio_disc", "must be positive"));
        }
        if !(self.clr_alpha > 0.0 && self.clr_alpha < 1.0) {
            return Err(CollocateError::invalid("clr_alpha", "must lie in (0, 1)"));
        }
        Ok(())
    }
}
