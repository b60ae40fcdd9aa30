use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

use netvault_errors::{VaultError, VaultResult};

/// CRON表达式解析与触发点计算
pub struct CronPlan {
    schedule: Schedule,
}

impl CronPlan {
    pub fn new(cron_expr: &str) -> VaultResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| VaultError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { schedule })
    }

    pub fn validate(cron_expr: &str) -> VaultResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// (after, until] 区间内的全部触发点，升序。
    /// 调度器tick用它同时得到正常触发和错过的触发。
    pub fn fire_times_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take_while(|t| *t <= until)
            .collect()
    }

    pub fn next_fire_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 是否到达触发时间。从未触发过的计划回看一分钟。
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let after = last_run.unwrap_or(now - Duration::minutes(1));
        self.schedule
            .after(&after)
            .next()
            .is_some_and(|next| next <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 秒 分 时 日 月 星期：每天 02:00:00
    const DAILY: &str = "0 0 2 * * *";

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(matches!(
            CronPlan::new("not a cron"),
            Err(VaultError::InvalidCron { .. })
        ));
        assert!(CronPlan::validate(DAILY).is_ok());
    }

    #[test]
    fn fire_times_cover_missed_window() {
        let plan = CronPlan::new(DAILY).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 3, 3, 3, 0, 0).unwrap();
        let fires = plan.fire_times_between(after, until);
        assert_eq!(fires.len(), 3);
        assert_eq!(fires[0], Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap());
        assert_eq!(fires[2], Utc.with_ymd_and_hms(2026, 3, 3, 2, 0, 0).unwrap());
    }

    #[test]
    fn should_trigger_after_fire_point() {
        let plan = CronPlan::new(DAILY).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 3, 2, 1, 59, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 30).unwrap();
        assert!(!plan.should_trigger(Some(last), before));
        assert!(plan.should_trigger(Some(last), at));
    }
}
