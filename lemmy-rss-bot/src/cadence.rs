//! 4.E Cadence estimator — a pure function of a feed's recent publication
//! timestamps that decides when to poll it again. No I/O, no locks.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

pub const MIN: Duration = Duration::minutes(5);
pub const SHORT: Duration = Duration::hours(2);
pub const LONG: Duration = Duration::hours(24);
pub const MAX: Duration = Duration::days(4);

/// Compute the next instant this feed should be polled, given `now` and the
/// publication timestamps considered (the most recent ~20 when fresh
/// entries were fetched this cycle, otherwise the previously stored ones).
pub fn next_check_at(timestamps: &[DateTime<Utc>], now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(most_recent) = timestamps.iter().max().copied() else {
        return now + LONG;
    };

    let since = now - most_recent;
    let median_period = median_burst_length(timestamps);

    if since > MAX {
        slow_strategy(most_recent, now)
    } else if since < SHORT {
        now + clamp(median_period, MIN, LONG)
    } else {
        now + clamp(median_period, SHORT, LONG)
    }
}

fn clamp(d: Duration, lo: Duration, hi: Duration) -> Duration {
    if d < lo {
        lo
    } else if d > hi {
        hi
    } else {
        d
    }
}

/// Partition ascending timestamps into bursts (a burst closes once the gap
/// from its start reaches `MIN`) and return the median burst length, or
/// `SHORT` if no burst closed (fewer than two timestamps, or a single
/// burst that never reached `MIN` span).
fn median_burst_length(timestamps: &[DateTime<Utc>]) -> Duration {
    let mut sorted: Vec<DateTime<Utc>> = timestamps.to_vec();
    sorted.sort();

    let mut burst_lengths: Vec<Duration> = Vec::new();
    let mut burst_start = match sorted.first() {
        Some(t) => *t,
        None => return SHORT,
    };

    for &ts in sorted.iter().skip(1) {
        let gap = ts - burst_start;
        if gap >= MIN {
            burst_lengths.push(gap);
            burst_start = ts;
        }
    }

    if burst_lengths.is_empty() {
        return SHORT;
    }

    burst_lengths.sort();
    let mid = burst_lengths.len() / 2;
    if burst_lengths.len() % 2 == 1 {
        burst_lengths[mid]
    } else {
        (burst_lengths[mid - 1] + burst_lengths[mid]) / 2
    }
}

/// The feed has gone quiet for longer than `MAX`: pick a single daily
/// check-in near the feed's historical publish time rather than polling
/// every `SHORT`/`LONG` window, which would waste cycles on a dead feed.
fn slow_strategy(most_recent: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate_time = most_recent + SHORT;
    let snapped = Utc
        .with_ymd_and_hms(
            now.date_naive().year(),
            now.date_naive().month(),
            now.date_naive().day(),
            candidate_time.time().hour(),
            candidate_time.time().minute(),
            candidate_time.time().second(),
        )
        .single()
        .unwrap_or(candidate_time);

    if snapped <= now {
        snapped + Duration::hours(24)
    } else {
        snapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_timestamps_yield_now_plus_long() {
        let now = Utc::now();
        assert_eq!(next_check_at(&[], now), now + LONG);
    }

    #[test]
    fn fresh_even_hourly_feed_uses_median_burst_length_actively() {
        let now = Utc::now();
        // 20 entries, one per hour over the past day, most recent 30 minutes ago.
        let most_recent = now - Duration::minutes(30);
        let timestamps: Vec<DateTime<Utc>> = (0..20)
            .map(|i| most_recent - Duration::hours(i))
            .collect();
        let next = next_check_at(&timestamps, now);
        assert_eq!(next, now + Duration::hours(1));
    }

    #[test]
    fn stale_feed_uses_slow_strategy_on_todays_date() {
        let now = Utc::now();
        let most_recent = now - Duration::days(10);
        let next = next_check_at(&[most_recent], now);
        assert_eq!(next.date_naive(), {
            let candidate = most_recent + SHORT;
            if candidate <= now {
                (now + Duration::hours(24)).date_naive()
            } else {
                now.date_naive()
            }
        });
    }

    #[test]
    fn bursty_recent_feed_uses_active_branch_clamped_to_min() {
        let now = Utc::now();
        // All timestamps within the last hour, spaced far less than MIN apart.
        let timestamps = vec![
            now - Duration::seconds(30),
            now - Duration::seconds(60),
            now - Duration::seconds(90),
        ];
        let next = next_check_at(&timestamps, now);
        assert_eq!(next, now + MIN);
    }

    #[test]
    fn median_burst_length_is_none_without_a_closing_gap() {
        let now = Utc::now();
        let timestamps = vec![now - Duration::seconds(10), now - Duration::seconds(20)];
        assert_eq!(median_burst_length(&timestamps), SHORT);
    }
}
