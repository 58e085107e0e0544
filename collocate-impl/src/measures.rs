//! Association measures over a [`ContingencyTable`].
//!
//! Scores are a pure function of the table, the [`MeasureConfig`] and the
//! number of items scored together (for the Bonferroni correction of the
//! conservative log ratio). A zero cell never makes a measure fail:
//!
//! | measure | zero convention |
//! |---|---|
//! | `t_score`, `mutual_information` | `O11 = 0` is replaced by `disc` |
//! | `local_mutual_information` | 0 when `O11 = 0` |
//! | `log_likelihood`, `simple_ll` | `0 · log 0 = 0` |
//! | `log_ratio`, `conservative_log_ratio` | `log_ratio_disc` added to every frequency |
//! | any ratio | 0 when the denominator is 0 |

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::MeasureConfig;
use crate::contingency::ContingencyTable;
use crate::error::CollocateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    O11,
    E11,
    Ipm,
    IpmReference,
    IpmExpected,
    ZScore,
    TScore,
    LogLikelihood,
    SimpleLl,
    Dice,
    LogRatio,
    ConservativeLogRatio,
    MutualInformation,
    LocalMutualInformation,
    MinSensitivity,
    Liddell,
}

impl Measure {
    pub const ALL: [Measure; 16] = [
        Measure::O11,
        Measure::E11,
        Measure::Ipm,
        Measure::IpmReference,
        Measure::IpmExpected,
        Measure::ZScore,
        Measure::TScore,
        Measure::LogLikelihood,
        Measure::SimpleLl,
        Measure::Dice,
        Measure::LogRatio,
        Measure::ConservativeLogRatio,
        Measure::MutualInformation,
        Measure::LocalMutualInformation,
        Measure::MinSensitivity,
        Measure::Liddell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Measure::O11 => "o11",
            Measure::E11 => "e11",
            Measure::Ipm => "ipm",
            Measure::IpmReference => "ipm_reference",
            Measure::IpmExpected => "ipm_expected",
            Measure::ZScore => "z_score",
            Measure::TScore => "t_score",
            Measure::LogLikelihood => "log_likelihood",
            Measure::SimpleLl => "simple_ll",
            Measure::Dice => "dice",
            Measure::LogRatio => "log_ratio",
            Measure::ConservativeLogRatio => "conservative_log_ratio",
            Measure::MutualInformation => "mutual_information",
            Measure::LocalMutualInformation => "local_mutual_information",
            Measure::MinSensitivity => "min_sensitivity",
            Measure::Liddell => "liddell",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Measure {
    type Err = CollocateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        Measure::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| CollocateError::invalid("measure", format!("unknown measure '{}'", s)))
    }
}

/// Named scores of one contingency table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet(BTreeMap<Measure, f64>);

impl ScoreSet {
    pub fn get(&self, measure: Measure) -> f64 {
        self.0.get(&measure).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Measure, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }

    /// Scores in [`Measure::ALL`] order.
    pub fn vector(&self) -> Vec<f64> {
        Measure::ALL.iter().map(|m| self.get(*m)).collect()
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// `o · ln(o / e)` with `0 · ln 0 = 0`.
fn xlogx(o: f64, e: f64) -> f64 {
    if o == 0.0 || e == 0.0 {
        0.0
    } else {
        o * (o / e).ln()
    }
}

fn signed(o11: f64, e11: f64, value: f64) -> f64 {
    if o11 < e11 {
        -value
    } else {
        value
    }
}

/// Scores tables with one configuration and item count.
#[derive(Debug, Clone)]
pub struct Calculator {
    config: MeasureConfig,
    /// Two-sided normal quantile for the conservative log ratio.
    z: f64,
}

impl Calculator {
    pub fn new(config: &MeasureConfig, vocabulary: usize) -> Self {
        let alpha = if config.clr_bonferroni {
            config.clr_alpha / vocabulary.max(1) as f64
        } else {
            config.clr_alpha
        };
        Calculator {
            config: config.clone(),
            // the standard normal always constructs
            z: Normal::new(0.0, 1.0)
                .map(|n| n.inverse_cdf(1.0 - alpha / 2.0))
                .unwrap_or(f64::INFINITY),
        }
    }

    pub fn score(&self, t: &ContingencyTable) -> ScoreSet {
        let (o11, o12, o21, o22) = (t.o11 as f64, t.o12 as f64, t.o21 as f64, t.o22 as f64);
        let (r1, r2, c1, c2) = (t.r1 as f64, t.r2 as f64, t.c1 as f64, t.c2 as f64);
        let (e11, e12, e21, e22) = t.expected();
        let disc = self.config.disc;
        let o11_disc = if o11 == 0.0 { disc } else { o11 };

        let log_likelihood = 2.0
            * (xlogx(o11, e11) + xlogx(o12, e12) + xlogx(o21, e21) + xlogx(o22, e22));
        let simple_ll = 2.0 * (xlogx(o11, e11) - (o11 - e11));
        let (log_ratio, conservative_log_ratio) = self.log_ratios(t);

        let scores = [
            (Measure::O11, o11),
            (Measure::E11, e11),
            (Measure::Ipm, ratio(o11, r1) * 1e6),
            (Measure::IpmReference, ratio(o21, r2) * 1e6),
            (Measure::IpmExpected, ratio(e11, r1) * 1e6),
            (Measure::ZScore, ratio(o11 - e11, e11.sqrt())),
            (Measure::TScore, (o11 - e11) / o11_disc.sqrt()),
            (Measure::LogLikelihood, signed(o11, e11, log_likelihood.abs())),
            (Measure::SimpleLl, signed(o11, e11, simple_ll.abs())),
            (Measure::Dice, ratio(2.0 * o11, r1 + c1)),
            (Measure::LogRatio, log_ratio),
            (Measure::ConservativeLogRatio, conservative_log_ratio),
            (
                Measure::MutualInformation,
                if e11 == 0.0 { 0.0 } else { (o11_disc / e11).log10() },
            ),
            (
                Measure::LocalMutualInformation,
                if o11 == 0.0 || e11 == 0.0 { 0.0 } else { o11 * (o11 / e11).log10() },
            ),
            (Measure::MinSensitivity, ratio(o11, r1).min(ratio(o11, c1))),
            (Measure::Liddell, ratio(o11 * o22 - o12 * o21, c1 * c2)),
        ];
        ScoreSet(scores.into_iter().collect())
    }

    /// Log ratio and its conservative variant: the bound of the confidence
    /// interval closest to zero, or zero if the interval contains it.
    fn log_ratios(&self, t: &ContingencyTable) -> (f64, f64) {
        let d = self.config.log_ratio_disc;
        let (o11, o21, r1, r2) = (t.o11 as f64 + d, t.o21 as f64 + d, t.r1 as f64 + d, t.r2 as f64 + d);
        let log_ratio = ((o11 / r1) / (o21 / r2)).log2();

        let variance = (1.0 / o11 - 1.0 / r1 + 1.0 / o21 - 1.0 / r2).max(0.0);
        let margin = self.z * variance.sqrt() / std::f64::consts::LN_2;
        let (lower, upper) = (log_ratio - margin, log_ratio + margin);
        let conservative = if lower > 0.0 {
            lower
        } else if upper < 0.0 {
            upper
        } else {
            0.0
        };
        (log_ratio, conservative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> Calculator {
        Calculator::new(&MeasureConfig::default(), 1)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn names_round_trip() {
        for m in Measure::ALL {
            assert_eq!(m.name().parse::<Measure>().unwrap(), m);
            assert_eq!(serde_json::to_string(&m).unwrap(), format!("\"{}\"", m.name()));
        }
        assert!("pmi".parse::<Measure>().is_err());
    }

    #[test]
    fn textbook_values() {
        let t = ContingencyTable::new(10, 100, 50, 10_000).unwrap();
        let s = calc().score(&t);
        // E11 = 100 * 50 / 10000
        assert!(approx(s.get(Measure::E11), 0.5));
        assert!(approx(s.get(Measure::ZScore), 9.5 / 0.5f64.sqrt()));
        assert!(approx(s.get(Measure::TScore), 9.5 / 10f64.sqrt()));
        assert!(approx(s.get(Measure::MutualInformation), 20f64.log10()));
        assert!(approx(s.get(Measure::LocalMutualInformation), 10.0 * 20f64.log10()));
        assert!(approx(s.get(Measure::Dice), 20.0 / 150.0));
        assert!(approx(s.get(Measure::MinSensitivity), 0.1));
        assert!(approx(s.get(Measure::Ipm), 100_000.0));
        assert!(s.get(Measure::LogLikelihood) > 0.0);
        assert!(s.get(Measure::ConservativeLogRatio) > 0.0);
        assert!(s.get(Measure::ConservativeLogRatio) < s.get(Measure::LogRatio));
    }

    #[test]
    fn repulsion_is_negative() {
        // expected 50, observed 1
        let t = ContingencyTable::new(1, 1000, 500, 10_000).unwrap();
        let s = calc().score(&t);
        assert!(s.get(Measure::LogLikelihood) < 0.0);
        assert!(s.get(Measure::SimpleLl) < 0.0);
        assert!(s.get(Measure::LogRatio) < 0.0);
    }

    #[test]
    fn zero_cells_stay_finite() {
        let tables = [
            ContingencyTable::new(0, 0, 0, 0).unwrap(),
            ContingencyTable::new(0, 10, 0, 10).unwrap(),
            ContingencyTable::new(0, 10, 20, 100).unwrap(),
            ContingencyTable::new(5, 5, 5, 5).unwrap(),
        ];
        for t in tables {
            for (measure, value) in calc().score(&t).iter() {
                assert!(value.is_finite(), "{} is {} for {:?}", measure, value, t);
            }
        }
    }

    #[test]
    fn deterministic() {
        let t = ContingencyTable::new(3, 40, 12, 900).unwrap();
        assert_eq!(calc().score(&t), calc().score(&t));
    }

    #[test]
    fn bonferroni_widens_the_interval() {
        let t = ContingencyTable::new(10, 100, 50, 10_000).unwrap();
        let few = Calculator::new(&MeasureConfig::default(), 1).score(&t);
        let many = Calculator::new(&MeasureConfig::default(), 10_000).score(&t);
        assert!(many.get(Measure::ConservativeLogRatio) < few.get(Measure::ConservativeLogRatio));
    }
}
