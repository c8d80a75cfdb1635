//! Check results and the filters used to page through history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alarm::{AlarmId, UserId};

/// Latency sample from one successful check. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub timestamp: DateTime<Utc>,
    pub alarm_id: AlarmId,
    /// Round trip in nanoseconds
    pub latency_ns: i64,
}

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Filter shared by incident and result queries.
///
/// Time bounds are inclusive on `from` and exclusive on `to`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub alarm_id: Option<AlarmId>,
    pub user_id: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn for_alarm(alarm_id: AlarmId) -> Self {
        Self {
            alarm_id: Some(alarm_id),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

/// One page of a newest-first listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    /// Cut a page out of an already ordered, already filtered list
    pub fn slice(all: Vec<T>, filter: &HistoryFilter) -> Self {
        let total = all.len();
        let limit = filter.effective_limit();
        let items = all.into_iter().skip(filter.offset).take(limit).collect();
        Self {
            items,
            total,
            offset: filter.offset,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_is_half_open() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let filter = HistoryFilter::default().between(from, to);

        assert!(filter.in_range(from));
        assert!(!filter.in_range(to));
    }

    #[test]
    fn test_page_slice() {
        let filter = HistoryFilter::default().page(2, 3);
        let page = Page::slice((0..10).collect::<Vec<_>>(), &filter);

        assert_eq!(page.items, vec![2, 3, 4]);
        assert_eq!(page.total, 10);
    }

    #[test]
    fn test_limit_clamped() {
        let filter = HistoryFilter::default().page(0, 10_000);
        assert_eq!(filter.effective_limit(), MAX_PAGE_SIZE);
        assert_eq!(HistoryFilter::default().effective_limit(), DEFAULT_PAGE_SIZE);
    }
}
