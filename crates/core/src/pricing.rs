use crate::domain::stock::{Candles, PriceChanges, StockMetrics};
use crate::ingest::types::UpstreamMetrics;
use chrono::{DateTime, Utc};

const DAY_SECS: i64 = 24 * 60 * 60;
pub const HORIZON_24H_SECS: i64 = DAY_SECS;
pub const HORIZON_7D_SECS: i64 = 7 * DAY_SECS;
pub const HORIZON_30D_SECS: i64 = 30 * DAY_SECS;

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Percent change from `start` to `current`, rounded to 2 decimals. A zero start price
/// has no meaningful change and yields 0.
pub fn percent_change(current: f64, start: f64) -> f64 {
    if start == 0.0 {
        return 0.0;
    }
    round2((current / start - 1.0) * 100.0)
}

/// Open of the earliest candle at or after `now - horizon_secs`.
pub fn horizon_start_price(candles: &Candles, now_ts: i64, horizon_secs: i64) -> Option<f64> {
    let since = now_ts - horizon_secs;
    candles
        .timestamps()
        .iter()
        .position(|&t| t >= since)
        .map(|i| candles.open()[i])
}

/// Price changes over the 24h/7d/30d horizons, measured against the intraday series.
///
/// The current price is the last intraday close. Horizons with no candle fall back to 0%,
/// as does everything when there is no intraday series yet.
pub fn price_changes(intraday: Option<&Candles>, now: DateTime<Utc>) -> PriceChanges {
    let Some(candles) = intraday else {
        return PriceChanges::default();
    };
    let Some(price) = candles.last_close() else {
        return PriceChanges::default();
    };

    let now_ts = now.timestamp();
    let change = |horizon| {
        horizon_start_price(candles, now_ts, horizon)
            .map(|start| percent_change(price, start))
            .unwrap_or(0.0)
    };

    PriceChanges {
        last24h: change(HORIZON_24H_SECS),
        last7d: change(HORIZON_7D_SECS),
        last30d: change(HORIZON_30D_SECS),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extreme {
    pub price: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowHigh {
    pub low: Extreme,
    pub high: Extreme,
}

/// Lowest low and highest high among daily candles inside the trailing 30-day window.
/// Ties keep the earliest candle.
pub fn window_low_high(daily: &Candles, now: DateTime<Utc>) -> Option<LowHigh> {
    let since = now.timestamp() - HORIZON_30D_SECS;

    let mut out: Option<LowHigh> = None;
    for (i, &t) in daily.timestamps().iter().enumerate() {
        if t < since {
            continue;
        }
        let low = Extreme {
            price: daily.low()[i],
            timestamp: t,
        };
        let high = Extreme {
            price: daily.high()[i],
            timestamp: t,
        };

        match out.as_mut() {
            None => out = Some(LowHigh { low, high }),
            Some(acc) => {
                if low.price < acc.low.price {
                    acc.low = low;
                }
                if high.price > acc.high.price {
                    acc.high = high;
                }
            }
        }
    }
    out
}

/// Closes of candles strictly newer than `now - window_secs`.
pub fn closes_since(candles: &Candles, now: DateTime<Utc>, window_secs: i64) -> Vec<f64> {
    let since = now.timestamp() - window_secs;
    candles
        .timestamps()
        .iter()
        .zip(candles.close())
        .filter(|(&t, _)| t > since)
        .map(|(_, &c)| c)
        .collect()
}

fn date_string(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|d| d.date_naive().to_string())
}

/// Combines upstream fundamentals with figures derived from the stored candle series.
pub fn assemble_metrics(
    upstream: UpstreamMetrics,
    intraday: Option<&Candles>,
    daily: Option<&Candles>,
    now: DateTime<Utc>,
) -> StockMetrics {
    let low_high = daily.and_then(|d| window_low_high(d, now));

    StockMetrics {
        changes: price_changes(intraday, now),
        low_price_weekly: low_high.map(|lh| lh.low.price),
        low_date_weekly: low_high.and_then(|lh| date_string(lh.low.timestamp)),
        high_price_weekly: low_high.map(|lh| lh.high.price),
        high_date_weekly: low_high.and_then(|lh| date_string(lh.high.timestamp)),
        low_price_yearly: upstream.week52_low,
        low_date_yearly: upstream.week52_low_date,
        high_price_yearly: upstream.week52_high,
        high_date_yearly: upstream.week52_high_date,
        price_relative_to_sp500_yearly: upstream.price_relative_to_sp500_52week,
        market_cap: upstream.market_capitalization,
        dividend_per_share_yearly: upstream.dividend_per_share_annual,
        revenue_per_share_yearly: upstream.revenue_per_share_annual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn series(ts: Vec<i64>, open: Vec<f64>, low: Vec<f64>, high: Vec<f64>, close: Vec<f64>) -> Candles {
        Candles::try_new(ts, open, high, low, close).unwrap()
    }

    #[test]
    fn last7d_uses_first_open_inside_horizon() {
        let t = now().timestamp();
        let intraday = series(
            vec![t - 9 * DAY_SECS, t - 2 * DAY_SECS, t],
            vec![100.0, 105.0, 110.0],
            vec![99.0, 104.0, 109.0],
            vec![101.0, 106.0, 122.0],
            vec![100.0, 106.0, 121.0],
        );

        let changes = price_changes(Some(&intraday), now());
        assert_eq!(changes.last7d, 15.24);
        assert_eq!(changes.last24h, 10.0);
        assert_eq!(changes.last30d, 21.0);
    }

    #[test]
    fn horizons_without_candles_fall_back_to_zero() {
        let t = now().timestamp();
        let intraday = series(
            vec![t - 40 * DAY_SECS],
            vec![100.0],
            vec![100.0],
            vec![100.0],
            vec![120.0],
        );

        assert_eq!(price_changes(Some(&intraday), now()), PriceChanges::default());
        assert_eq!(price_changes(None, now()), PriceChanges::default());
    }

    #[test]
    fn weekly_low_high_picks_extremes_inside_window() {
        let t = now().timestamp();
        let daily = series(
            vec![t - 20 * DAY_SECS, t - 10 * DAY_SECS, t - DAY_SECS],
            vec![12.0, 10.0, 13.0],
            vec![10.0, 8.0, 12.0],
            vec![15.0, 20.0, 14.0],
            vec![14.0, 9.0, 13.0],
        );

        let lh = window_low_high(&daily, now()).unwrap();
        assert_eq!(lh.low.price, 8.0);
        assert_eq!(lh.low.timestamp, daily.timestamps()[1]);
        assert_eq!(lh.high.price, 20.0);
        assert_eq!(lh.high.timestamp, daily.timestamps()[1]);
    }

    #[test]
    fn weekly_low_high_ignores_old_candles_and_keeps_first_tie() {
        let t = now().timestamp();
        let daily = series(
            vec![t - 60 * DAY_SECS, t - 5 * DAY_SECS, t - 2 * DAY_SECS],
            vec![1.0, 10.0, 10.0],
            vec![1.0, 9.0, 9.0],
            vec![99.0, 11.0, 11.0],
            vec![1.0, 10.0, 10.0],
        );

        let lh = window_low_high(&daily, now()).unwrap();
        assert_eq!(lh.low.price, 9.0);
        assert_eq!(lh.low.timestamp, t - 5 * DAY_SECS);
        assert_eq!(lh.high.price, 11.0);
        assert_eq!(lh.high.timestamp, t - 5 * DAY_SECS);
    }

    #[test]
    fn weekly_low_high_is_none_when_window_is_empty() {
        let t = now().timestamp();
        let daily = series(vec![t - 45 * DAY_SECS], vec![1.0], vec![1.0], vec![1.0], vec![1.0]);
        assert!(window_low_high(&daily, now()).is_none());
    }

    #[test]
    fn closes_since_is_strictly_after_cutoff() {
        let t = now().timestamp();
        let intraday = series(
            vec![t - HORIZON_7D_SECS, t - 3 * DAY_SECS, t],
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 3.0],
            vec![1.5, 2.5, 3.5],
        );

        assert_eq!(closes_since(&intraday, now(), HORIZON_7D_SECS), vec![2.5, 3.5]);
    }

    #[test]
    fn assembled_metrics_carry_dates_and_fundamentals() {
        let t = now().timestamp();
        let daily = series(vec![t - DAY_SECS], vec![5.0], vec![4.0], vec![6.0], vec![5.5]);
        let upstream = UpstreamMetrics {
            week52_low: Some(3.0),
            week52_low_date: Some("2025-06-01".to_string()),
            market_capitalization: Some(1234.5),
            ..Default::default()
        };

        let m = assemble_metrics(upstream, None, Some(&daily), now());
        assert_eq!(m.low_price_weekly, Some(4.0));
        assert_eq!(m.low_date_weekly.as_deref(), Some("2026-03-01"));
        assert_eq!(m.high_date_weekly.as_deref(), Some("2026-03-01"));
        assert_eq!(m.low_price_yearly, Some(3.0));
        assert_eq!(m.market_cap, Some(1234.5));
        assert_eq!(m.changes, PriceChanges::default());
    }

    #[test]
    fn zero_start_price_is_not_a_change() {
        assert_eq!(percent_change(10.0, 0.0), 0.0);
        assert_eq!(percent_change(121.0, 105.0), 15.24);
    }
}
