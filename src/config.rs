use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::fees::FeeSchedule;
use crate::settlement::scheduler::{PayoutFrequency, PayoutScheduleConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Days after payment during which a refund request blocks payout
    pub dispute_window_days: i64,
    pub payout_frequency: PayoutFrequency,
    pub payout_execution_hour: u32,
    pub payout_interval_minutes: u64,
    pub payout_batch_size: i64,
    /// Versioned fee rates, oldest first; the schedule in effect at a
    /// purchase's paid-at timestamp decides its split
    pub fee_schedules: Vec<FeeSchedule>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut fee_schedules = vec![FeeSchedule::default()];
        if let Ok(rates) = std::env::var("FEE_RATES") {
            let effective_from = match std::env::var("FEE_RATES_EFFECTIVE_FROM") {
                Ok(raw) => parse_utc(&raw)?,
                Err(_) => Utc::now(),
            };
            fee_schedules.push(parse_fee_rates(&rates, effective_from)?);
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/coursepay".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            dispute_window_days: parse_env("DISPUTE_WINDOW_DAYS", 3)?,
            payout_frequency: match std::env::var("PAYOUT_FREQUENCY").as_deref() {
                Ok("interval") => PayoutFrequency::Interval,
                _ => PayoutFrequency::Daily,
            },
            payout_execution_hour: parse_env("PAYOUT_EXECUTION_HOUR", 2)?,
            payout_interval_minutes: parse_env("PAYOUT_INTERVAL_MINUTES", 60)?,
            payout_batch_size: parse_env("PAYOUT_BATCH_SIZE", 100)?,
            fee_schedules,
        })
    }

    pub fn dispute_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.dispute_window_days)
    }

    pub fn payout_schedule(&self) -> PayoutScheduleConfig {
        PayoutScheduleConfig {
            frequency: self.payout_frequency,
            execution_hour: self.payout_execution_hour,
            interval_minutes: self.payout_interval_minutes,
            batch_size: self.payout_batch_size,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, config::ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| config::ConfigError::Message(format!("Invalid {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, config::ConfigError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|_| config::ConfigError::Message(format!("Invalid RFC3339 timestamp: {}", raw)))
}

/// Parse "system,course_creation,grading" fractions, e.g. "0.10,0.55,0.35"
fn parse_fee_rates(
    raw: &str,
    effective_from: DateTime<Utc>,
) -> Result<FeeSchedule, config::ConfigError> {
    let parts: Vec<Decimal> = raw
        .split(',')
        .map(|part| Decimal::from_str(part.trim()))
        .collect::<Result<_, _>>()
        .map_err(|_| config::ConfigError::Message(format!("Invalid FEE_RATES: {}", raw)))?;

    if parts.len() != 3 {
        return Err(config::ConfigError::Message(format!(
            "FEE_RATES needs exactly 3 rates, got {}",
            parts.len()
        )));
    }

    let schedule = FeeSchedule {
        effective_from,
        system_rate: parts[0],
        course_creation_rate: parts[1],
        grading_rate: parts[2],
    };
    schedule
        .validate()
        .map_err(|err| config::ConfigError::Message(err.to_string()))?;

    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_valid_fee_rates() {
        let schedule = parse_fee_rates("0.20, 0.50, 0.30", Utc::now()).unwrap();

        assert_eq!(schedule.system_rate, dec!(0.20));
        assert_eq!(schedule.course_creation_rate, dec!(0.50));
        assert_eq!(schedule.grading_rate, dec!(0.30));
    }

    #[test]
    fn rejects_malformed_fee_rates() {
        assert!(parse_fee_rates("0.10,0.55", Utc::now()).is_err());
        assert!(parse_fee_rates("0.10,0.55,abc", Utc::now()).is_err());
        // Must sum to 1
        assert!(parse_fee_rates("0.10,0.55,0.40", Utc::now()).is_err());
    }
}
