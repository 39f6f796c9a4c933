//! Fee split calculation - turns a purchase amount into the platform,
//! course-creation, and grading shares.
//!
//! Rates are versioned: a schedule entry applies to purchases paid at or
//! after its effective date, so changing the rates never retroactively
//! alters the settlement of an already-paid purchase.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One versioned set of fee rates. Rates are fractions and must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub effective_from: DateTime<Utc>,

    #[serde(with = "rust_decimal::serde::float")]
    pub system_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub course_creation_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub grading_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            effective_from: Utc.timestamp_opt(0, 0).unwrap(),
            system_rate: dec!(0.10),
            course_creation_rate: dec!(0.55),
            grading_rate: dec!(0.35),
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> AppResult<()> {
        if self.system_rate < Decimal::ZERO
            || self.course_creation_rate < Decimal::ZERO
            || self.grading_rate < Decimal::ZERO
        {
            return Err(AppError::InvalidInput(format!(
                "Fee rates must be non-negative: {}/{}/{}",
                self.system_rate, self.course_creation_rate, self.grading_rate
            )));
        }
        let sum = self.system_rate + self.course_creation_rate + self.grading_rate;
        if sum != Decimal::ONE {
            return Err(AppError::InvalidInput(format!(
                "Fee rates must sum to 1, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// The three shares of one purchase. Conservation invariant:
/// `system + course_creation + grading == final_amount` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    #[serde(with = "rust_decimal::serde::float")]
    pub system: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub course_creation: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub grading: Decimal,
}

impl FeeSplit {
    pub fn total(&self) -> Decimal {
        self.system + self.course_creation + self.grading
    }
}

/// Select the schedule in effect at the purchase's paid-at timestamp:
/// the latest entry whose effective date is not after `paid_at`.
pub fn schedule_for(schedules: &[FeeSchedule], paid_at: DateTime<Utc>) -> AppResult<&FeeSchedule> {
    schedules
        .iter()
        .filter(|schedule| schedule.effective_from <= paid_at)
        .max_by_key(|schedule| schedule.effective_from)
        .ok_or_else(|| {
            AppError::Config(format!("No fee schedule in effect at {}", paid_at))
        })
}

/// Split a purchase amount (minor currency units) into the three shares.
///
/// The teacher-bound shares are rounded down and the rounding remainder
/// accrues to the system share, so the shares always sum exactly to the
/// input amount.
pub fn split(amount: Decimal, schedule: &FeeSchedule) -> AppResult<FeeSplit> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "Purchase amount must be positive, got {}",
            amount
        )));
    }
    schedule.validate()?;

    let course_creation = (amount * schedule.course_creation_rate).floor();
    let grading = (amount * schedule.grading_rate).floor();
    let system = amount - course_creation - grading;

    Ok(FeeSplit {
        system,
        course_creation,
        grading,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_schedules() -> Vec<FeeSchedule> {
        vec![FeeSchedule::default()]
    }

    #[test]
    fn splits_the_worked_example() {
        let split = split(dec!(1_000_000), &FeeSchedule::default()).unwrap();

        assert_eq!(split.system, dec!(100_000));
        assert_eq!(split.course_creation, dec!(550_000));
        assert_eq!(split.grading, dec!(350_000));
    }

    #[test]
    fn conserves_awkward_amounts() {
        // Amounts indivisible by 20 leave a remainder; it must land in the
        // system share, never leak.
        for amount in [dec!(1), dec!(3), dec!(7), dec!(99), dec!(100), dec!(101), dec!(1_999)] {
            let split = split(amount, &FeeSchedule::default()).unwrap();
            assert_eq!(split.total(), amount, "leaked on {}", amount);
            assert!(split.system >= Decimal::ZERO);
            assert!(split.course_creation >= Decimal::ZERO);
            assert!(split.grading >= Decimal::ZERO);
        }
    }

    #[test]
    fn remainder_goes_to_system_share() {
        // 99 * 0.55 = 54.45 -> 54, 99 * 0.35 = 34.65 -> 34, system gets 11
        let split = split(dec!(99), &FeeSchedule::default()).unwrap();

        assert_eq!(split.course_creation, dec!(54));
        assert_eq!(split.grading, dec!(34));
        assert_eq!(split.system, dec!(11));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(split(dec!(0), &FeeSchedule::default()).is_err());
        assert!(split(dec!(-5), &FeeSchedule::default()).is_err());
    }

    #[test]
    fn rejects_rates_not_summing_to_one() {
        let schedule = FeeSchedule {
            system_rate: dec!(0.10),
            course_creation_rate: dec!(0.55),
            grading_rate: dec!(0.30),
            ..FeeSchedule::default()
        };
        assert!(split(dec!(100), &schedule).is_err());
    }

    #[test]
    fn schedule_selection_is_bound_to_paid_at() {
        let old = FeeSchedule::default();
        let new = FeeSchedule {
            effective_from: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            system_rate: dec!(0.20),
            course_creation_rate: dec!(0.50),
            grading_rate: dec!(0.30),
        };
        let schedules = vec![old, new];

        let before = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(
            schedule_for(&schedules, before).unwrap().system_rate,
            dec!(0.10)
        );
        assert_eq!(
            schedule_for(&schedules, after).unwrap().system_rate,
            dec!(0.20)
        );
    }

    #[test]
    fn no_schedule_in_effect_is_a_config_error() {
        let schedules = vec![FeeSchedule {
            effective_from: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ..FeeSchedule::default()
        }];
        let paid_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(schedule_for(&schedules, paid_at).is_err());
        assert!(schedule_for(&default_schedules(), paid_at).is_ok());
    }
}
