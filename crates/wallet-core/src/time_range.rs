use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use wallet_error::{Result, WalletError};

/// 时间范围选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRangeSelector {
    Last7Days,
    Last30Days,
    /// 两端均为日历日，`end` 当天整天包含在内
    Custom { start: NaiveDate, end: NaiveDate },
    /// 最近 N 条，不是时间范围
    LastN(u32),
}

/// 半开区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

impl TimeRangeSelector {
    /// 从请求字段解析选择器。
    ///
    /// `query_type = "last_n"` 优先于 `time_range`；`max_last_n` 限制单次返回条数。
    pub fn parse(
        time_range: Option<&str>,
        query_type: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        count: Option<i64>,
        max_last_n: u32,
    ) -> Result<Self> {
        if let Some(kind) = query_type.filter(|s| !s.is_empty()) {
            return match kind {
                "last_n" | "latest" => {
                    let n = count.ok_or_else(|| {
                        WalletError::validation("For 'last_n' queries, 'count' is required.")
                    })?;
                    if n < 1 || n > i64::from(max_last_n) {
                        return Err(WalletError::validation(format!(
                            "'count' must be between 1 and {}",
                            max_last_n
                        )));
                    }
                    Ok(TimeRangeSelector::LastN(n as u32))
                }
                _ => Err(unsupported()),
            };
        }

        match time_range {
            Some("last_7_days") => Ok(TimeRangeSelector::Last7Days),
            Some("last_30_days") => Ok(TimeRangeSelector::Last30Days),
            Some("custom") => {
                let (start, end) = match (
                    start_date.filter(|s| !s.is_empty()),
                    end_date.filter(|s| !s.is_empty()),
                ) {
                    (Some(s), Some(e)) => (s, e),
                    _ => {
                        return Err(WalletError::validation(
                            "For 'custom' time_range, 'start_date' and 'end_date' are required.",
                        ))
                    }
                };
                let start = parse_date("start_date", start)?;
                let end = parse_date("end_date", end)?;
                if start > end {
                    return Err(WalletError::validation(
                        "'start_date' must not be after 'end_date'",
                    ));
                }
                Ok(TimeRangeSelector::Custom { start, end })
            }
            Some(_) => Err(unsupported()),
            None => Err(WalletError::validation(
                "Missing 'collection' or 'time_range' in request body",
            )),
        }
    }

    pub fn is_last_n(&self) -> bool {
        matches!(self, TimeRangeSelector::LastN(_))
    }
}

fn unsupported() -> WalletError {
    WalletError::validation("unsupported selector")
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        WalletError::validation(format!("'{}' must be a YYYY-MM-DD date", field))
    })
}

/// 将选择器解析为具体的时间区间
///
/// 所有区间都是左闭右开的 `[start, end)`，滚动窗口同样不包含 `now` 本身。
pub fn resolve(selector: &TimeRangeSelector, now: DateTime<Utc>) -> Result<TimeRange> {
    match selector {
        TimeRangeSelector::Last7Days => Ok(TimeRange {
            start: now - Duration::days(7),
            end: now,
        }),
        TimeRangeSelector::Last30Days => Ok(TimeRange {
            start: now - Duration::days(30),
            end: now,
        }),
        TimeRangeSelector::Custom { start, end } => {
            let end = end
                .succ_opt()
                .ok_or_else(|| WalletError::validation("'end_date' is out of range"))?;
            Ok(TimeRange {
                start: start.and_time(chrono::NaiveTime::MIN).and_utc(),
                end: end.and_time(chrono::NaiveTime::MIN).and_utc(),
            })
        }
        TimeRangeSelector::LastN(_) => Err(unsupported()),
    }
}

/// 可注入的时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
