//! Wall-clock helpers. All timestamps in the data model are UTC
//! milliseconds (§3), so this is the single place that calls `Utc::now()`.

use chrono::Utc;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
