//! Uptime math and the dashboard overview aggregate.
//!
//! Everything here is recomputed on demand; nothing is cached between requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Instance, InstanceStatus};

/// Length of the trend window shown next to each instance.
pub const TREND_WINDOW: usize = 20;

/// Round to two decimal places, the precision of the `uptime` column.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of online checks, `0.0` when nothing has been recorded yet.
pub fn uptime(count_online: i64, count_total: i64) -> f64 {
    if count_total <= 0 {
        return 0.0;
    }
    round2(count_online as f64 / count_total as f64 * 100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub active: usize,
    pub all: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// Mean of per-instance uptime, each instance weighted equally.
    pub uptime: f64,
    pub service_status: ServiceStatus,
    /// Share of instances currently online.
    pub health_score: f64,
}

/// Instances that have not been checked yet contribute `0` to the mean.
pub fn overview(instances: &[Instance]) -> Overview {
    let all = instances.len();
    if all == 0 {
        return Overview::default();
    }

    let active = instances
        .iter()
        .filter(|i| i.status == Some(InstanceStatus::Online))
        .count();
    let total_uptime: f64 = instances.iter().filter_map(|i| i.uptime).sum();

    Overview {
        uptime: round2(total_uptime / all as f64),
        service_status: ServiceStatus { active, all },
        health_score: round2(active as f64 / all as f64 * 100.0),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: Uuid,
    pub name: String,
    pub status: Option<InstanceStatus>,
    pub uptime: f64,
    /// Most recent outcomes, newest first.
    pub history: Vec<bool>,
    pub interval: i32,
    pub response_time_ms: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceSummary {
    pub fn new(instance: &Instance, history: Vec<bool>) -> Self {
        Self {
            id: instance.id,
            name: instance.name.clone(),
            status: instance.status,
            uptime: instance.uptime.unwrap_or(0.0),
            history,
            interval: instance.interval,
            response_time_ms: instance.response_time_ms,
            updated_at: instance.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(status: Option<InstanceStatus>, uptime: Option<f64>) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            name: "svc".to_string(),
            url: "http://ok.test".to_string(),
            interval: 60,
            status,
            response_time_ms: None,
            uptime,
            notification_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_uptime_without_history_is_zero() {
        assert_eq!(uptime(0, 0), 0.0);
        assert!(!uptime(0, 0).is_nan());
    }

    #[test]
    fn test_uptime_rounds_to_two_decimals() {
        assert_eq!(uptime(7, 10), 70.0);
        assert_eq!(uptime(1, 3), 33.33);
        assert_eq!(uptime(2, 3), 66.67);
        assert_eq!(uptime(10, 10), 100.0);
    }

    #[test]
    fn test_newest_record_moves_uptime_in_its_direction() {
        for total in 1..40i64 {
            for online in 0..=total {
                let before = uptime(online, total);
                assert!(uptime(online + 1, total + 1) >= before);
                assert!(uptime(online, total + 1) <= before);
            }
        }
    }

    #[test]
    fn test_overview_is_instance_weighted() {
        let instances = vec![
            instance(Some(InstanceStatus::Online), Some(100.0)),
            instance(Some(InstanceStatus::Offline), Some(50.0)),
            instance(None, None),
        ];
        let o = overview(&instances);
        assert_eq!(o.uptime, 50.0);
        assert_eq!(o.service_status, ServiceStatus { active: 1, all: 3 });
        assert_eq!(o.health_score, 33.33);
    }

    #[test]
    fn test_overview_of_nothing() {
        assert_eq!(overview(&[]), Overview::default());
    }
}
