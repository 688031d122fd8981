//! Cron schedule evaluation in the trigger's own timezone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::error::{FlowError, FlowResult};

/// The first fire time strictly after `after`, evaluated in `timezone`.
///
/// Accepts the common 5-field form (`min hour dom month dow`) by
/// normalizing it to the 6-field form the parser expects.
pub fn next_run_after(
    cron_expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> FlowResult<DateTime<Utc>> {
    let normalized = normalize(cron_expression);
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| FlowError::InvalidCron(format!("{cron_expression}: {e}")))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| FlowError::InvalidCron(format!("unknown timezone: {timezone}")))?;

    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| FlowError::InvalidCron(format!("{cron_expression}: no upcoming fire time")))
}

/// Prepend a seconds field to 5-field expressions.
fn normalize(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expression_accepted() {
        // 2024-01-01 00:00:00 UTC
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = next_run_after("0 9 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn timezone_shifts_fire_time() {
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        // 09:00 in New York is 13:00 UTC during DST.
        let next = next_run_after("0 9 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn strictly_after() {
        let at_nine = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let next = next_run_after("0 9 * * *", "UTC", at_nine).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expression_rejected() {
        let after = Utc::now();
        assert!(matches!(
            next_run_after("not a cron", "UTC", after),
            Err(FlowError::InvalidCron(_))
        ));
        assert!(matches!(
            next_run_after("0 9 * * *", "Mars/Olympus", after),
            Err(FlowError::InvalidCron(_))
        ));
    }
}
