//! Volume derivation: pure, deterministic math over the input table.
//!
//! Two independent calculators:
//! - **dilution mode** turns per-sample concentrations into (total, sample,
//!   diluent) volume triples for a target concentration;
//! - **reaction-mix mode** tops a fixed-recipe reaction up with water.
//!
//! Nothing here rounds: volumes stay full-precision until the serialization
//! boundary in [`crate::gwl`], so derived quantities never accumulate
//! rounding error. Physical infeasibility is fatal for the batch; the robot
//! must not receive a worklist it cannot execute.

use crate::error::{FluentError, Result};

/// Tolerance for the `sample + diluent == total` and non-negativity checks.
const VOL_EPS: f64 = 1e-9;

/// Parameters of a dilution run.
///
/// `min_sample_vol` / `max_sample_vol` bound the **sample aliquot**, not the
/// post-dilution total. The smallest allowed aliquot drives the implied
/// total; the largest is a hard cap on what a row may consume.
#[derive(Clone, Copy, Debug)]
pub struct DilutionParams {
    /// Target concentration after dilution (same units as the input).
    pub target_conc: f64,
    /// Smallest pipettable sample aliquot (ul).
    pub min_sample_vol: f64,
    /// Largest allowed sample aliquot (ul).
    pub max_sample_vol: f64,
    /// Per-row floor on the post-dilution total (ul).
    pub min_total_vol: f64,
    /// Physical well capacity of the destination plate (ul).
    pub max_well_vol: f64,
}

/// Per-sample computed volumes. Invariant: `sample + diluent == total`
/// (within float tolerance), all fields >= 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumePlan {
    pub total: f64,
    pub sample: f64,
    pub diluent: f64,
}

/// Compute dilution volumes for a batch of sample concentrations.
///
/// Per row: `total = c * min_sample_vol / target_conc`, floored to
/// `min_total_vol`; then `sample = target_conc * total / c` and
/// `diluent = total - sample`.
///
/// The well-capacity check runs over the *raw* totals of the whole batch
/// before any flooring, so a single physically impossible row rejects the
/// run up front.
pub fn dilution_plan(concentrations: &[f64], p: &DilutionParams) -> Result<Vec<VolumePlan>> {
    let raw_totals: Vec<f64> = concentrations
        .iter()
        .map(|c| c * p.min_sample_vol / p.target_conc)
        .collect();

    for (row, total) in raw_totals.iter().enumerate() {
        if *total > p.max_well_vol + VOL_EPS {
            return Err(FluentError::ExceedsWellCapacity {
                row,
                total: *total,
                max_well_vol: p.max_well_vol,
            });
        }
    }

    let mut plans = Vec::with_capacity(concentrations.len());
    for (row, (&c, &raw)) in concentrations.iter().zip(&raw_totals).enumerate() {
        let total = raw.max(p.min_total_vol);
        let sample = p.target_conc * total / c;
        let diluent = total - sample;
        if sample > p.max_sample_vol + VOL_EPS || diluent < -VOL_EPS || !sample.is_finite() {
            return Err(FluentError::InfeasibleDilution { row, sample, total });
        }
        plans.push(VolumePlan {
            total,
            sample,
            diluent: diluent.max(0.0),
        });
    }
    Ok(plans)
}

/// Fixed per-reaction recipe for PCR-style setups.
#[derive(Clone, Copy, Debug)]
pub struct ReactionRecipe {
    /// Total reaction volume (ul).
    pub total_volume: f64,
    /// MasterMix volume per reaction (ul).
    pub mastermix_volume: f64,
    /// Forward primer volume per reaction (ul).
    pub fp_volume: f64,
    /// Reverse primer volume per reaction (ul).
    pub rp_volume: f64,
}

impl ReactionRecipe {
    /// Reject recipes where the mastermix alone overflows the reaction.
    /// A mastermix above half the reaction volume is suspicious but legal;
    /// it only warrants a warning at the call site.
    pub fn validate(&self) -> Result<()> {
        if self.mastermix_volume > self.total_volume {
            return Err(FluentError::MastermixExceedsTotal {
                mastermix: self.mastermix_volume,
                total: self.total_volume,
            });
        }
        Ok(())
    }
}

/// Water top-up for one reaction:
/// `total - (sample + mastermix + fp + rp)`.
pub fn water_volume(recipe: &ReactionRecipe, sample_volume: f64, row: usize) -> Result<f64> {
    let water = recipe.total_volume
        - (sample_volume + recipe.mastermix_volume + recipe.fp_volume + recipe.rp_volume);
    if water < -VOL_EPS {
        return Err(FluentError::NegativeWaterVolume { row, water });
    }
    Ok(water.max(0.0))
}

/// [`water_volume`] across a batch; the first negative row aborts the batch.
pub fn reaction_plan(sample_volumes: &[f64], recipe: &ReactionRecipe) -> Result<Vec<f64>> {
    sample_volumes
        .iter()
        .enumerate()
        .map(|(row, &sv)| water_volume(recipe, sv, row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DilutionParams {
        DilutionParams {
            target_conc: 10.0,
            min_sample_vol: 2.0,
            max_sample_vol: 100.0,
            min_total_vol: 10.0,
            max_well_vol: 280.0,
        }
    }

    #[test]
    fn dilution_worked_example() {
        // c=100, target=10, minVol=2 -> total = 100*2/10 = 20 >= minTotal.
        let plans = dilution_plan(&[100.0], &params()).unwrap();
        assert_eq!(plans.len(), 1);
        let p = plans[0];
        assert!((p.total - 20.0).abs() < 1e-9);
        assert!((p.sample - 2.0).abs() < 1e-9);
        assert!((p.diluent - 18.0).abs() < 1e-9);
    }

    #[test]
    fn low_concentration_rows_floor_to_min_total() {
        // c=20 -> raw total 4, floored to 10; sample = 10*10/20 = 5.
        let plans = dilution_plan(&[20.0], &params()).unwrap();
        let p = plans[0];
        assert!((p.total - 10.0).abs() < 1e-9);
        assert!((p.sample - 5.0).abs() < 1e-9);
        assert!((p.diluent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn plan_invariant_holds_across_a_spread_of_inputs() {
        let concs = [10.5, 33.0, 99.9, 250.0, 1000.0];
        for p in dilution_plan(&concs, &params()).unwrap() {
            assert!(p.sample >= 0.0 && p.diluent >= 0.0 && p.total >= 0.0);
            assert!((p.sample + p.diluent - p.total).abs() < 1e-9);
        }
    }

    #[test]
    fn overcapacity_total_is_fatal_for_the_whole_batch() {
        let p = DilutionParams {
            target_conc: 1.0,
            min_sample_vol: 50.0,
            max_sample_vol: 100.0,
            min_total_vol: 10.0,
            max_well_vol: 280.0,
        };
        // c=1 -> raw total 50 (fits); c=5000 -> total 250000, far beyond any well.
        let err = dilution_plan(&[1.0, 5000.0], &p).unwrap_err();
        assert!(matches!(err, FluentError::ExceedsWellCapacity { row: 1, .. }));
    }

    #[test]
    fn aliquot_above_max_sample_vol_is_infeasible() {
        let p = DilutionParams {
            max_sample_vol: 4.0,
            ..params()
        };
        // c=20 floors total to 10, needing a 5 ul aliquot > 4 ul cap.
        let err = dilution_plan(&[20.0], &p).unwrap_err();
        assert!(matches!(err, FluentError::InfeasibleDilution { row: 0, .. }));
    }

    fn recipe() -> ReactionRecipe {
        ReactionRecipe {
            total_volume: 25.0,
            mastermix_volume: 13.1,
            fp_volume: 1.0,
            rp_volume: 1.0,
        }
    }

    #[test]
    fn reaction_mix_worked_example() {
        let water = water_volume(&recipe(), 5.0, 0).unwrap();
        assert!((water - 4.9).abs() < 1e-9);
    }

    #[test]
    fn oversized_sample_fails_with_negative_water() {
        let err = water_volume(&recipe(), 20.0, 7).unwrap_err();
        assert!(matches!(err, FluentError::NegativeWaterVolume { row: 7, .. }));
    }

    #[test]
    fn reaction_plan_stops_at_the_first_bad_row() {
        let err = reaction_plan(&[5.0, 5.0, 20.0], &recipe()).unwrap_err();
        assert!(matches!(err, FluentError::NegativeWaterVolume { row: 2, .. }));
        let plan = reaction_plan(&[5.0, 9.9], &recipe()).unwrap();
        assert_eq!(plan.len(), 2);
        assert!((plan[1] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn recipe_validation_rejects_overfull_mastermix() {
        let bad = ReactionRecipe {
            mastermix_volume: 26.0,
            ..recipe()
        };
        assert!(matches!(
            bad.validate(),
            Err(FluentError::MastermixExceedsTotal { .. })
        ));
        assert!(recipe().validate().is_ok());
    }
}
