//! Aggregations behind every dashboard view. Pure functions over rows.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Performance, Player, Price};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn market_cap(latest_price: f64, circulating_shares: f64) -> f64 {
    latest_price * circulating_shares
}

/// Percentage of rows that earned TP. 0.0 when there are no rows.
pub fn tp_rate(perfs: &[Performance]) -> f64 {
    if perfs.is_empty() {
        return 0.0;
    }
    let earning = perfs.iter().filter(|p| p.reward.unwrap_or(0.0) > 0.0).count();
    earning as f64 * 100.0 / perfs.len() as f64
}

/// Sum of rewards. Missing or negative rewards add nothing, so this always
/// equals the last point of [`cumulative_tp`].
pub fn total_tp(perfs: &[Performance]) -> f64 {
    perfs.iter().map(|p| p.reward.unwrap_or(0.0).max(0.0)).sum()
}

/// Mean reward per row; rows without a reward count as zero.
pub fn average_tp(perfs: &[Performance]) -> Option<f64> {
    let rewards: Vec<f64> = perfs.iter().map(|p| p.reward.unwrap_or(0.0)).collect();
    mean(&rewards)
}

pub fn average_score(perfs: &[Performance]) -> Option<f64> {
    let scores: Vec<f64> = perfs.iter().filter_map(|p| p.raw_score).collect();
    mean(&scores)
}

/// Lowest (best) ranking achieved.
pub fn best_ranking(perfs: &[Performance]) -> Option<i64> {
    perfs.iter().filter_map(|p| p.ranking).min()
}

/// Average TP earned per dollar of token price.
pub fn tp_per_dollar(average_tp: Option<f64>, latest_price: Option<f64>) -> Option<f64> {
    match (average_tp, latest_price) {
        (Some(tp), Some(price)) if price > 0.0 => Some(tp / price),
        _ => None,
    }
}

/// Standard deviation of consecutive percentage returns, in percent.
/// `prices` must be in fetch order; samples with a non-positive base are skipped.
pub fn volatility(prices: &[Price]) -> Option<f64> {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0].price > 0.0)
        .map(|w| (w[1].price - w[0].price) / w[0].price * 100.0)
        .collect();
    std_dev(&returns)
}

/// First-to-last change across `prices`, in percent.
pub fn price_change_pct(prices: &[Price]) -> Option<f64> {
    let first = prices.first()?.price;
    let last = prices.last()?.price;
    if prices.len() < 2 || first <= 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CumulativePoint {
    pub match_date: NaiveDate,
    pub reward: f64,
    pub cumulative_tp: f64,
}

/// Running TP total in chronological order. Missing or negative rewards add
/// nothing (the same rule as [`total_tp`]), so `cumulative_tp` never decreases.
pub fn cumulative_tp(perfs: &[Performance]) -> Vec<CumulativePoint> {
    let mut sorted: Vec<&Performance> = perfs.iter().collect();
    sorted.sort_by_key(|p| p.match_date);

    let mut running = 0.0;
    sorted
        .into_iter()
        .map(|p| {
            let reward = p.reward.unwrap_or(0.0).max(0.0);
            running += reward;
            CumulativePoint { match_date: p.match_date, reward, cumulative_tp: running }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Per-player summary and rankings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_id: i64,
    pub display_name: String,
    pub team: Option<String>,
    pub position: Option<String>,
    pub token_symbol: Option<String>,
    pub latest_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub holders: Option<i64>,
    pub price_change_pct: Option<f64>,
    pub volatility: Option<f64>,
    pub matches: usize,
    pub total_tp: f64,
    pub average_tp: Option<f64>,
    pub tp_rate: f64,
    pub tp_per_dollar: Option<f64>,
    pub average_score: Option<f64>,
    pub best_ranking: Option<i64>,
}

impl PlayerSummary {
    /// `prices` in fetch order; `perfs` in any order.
    pub fn build(player: &Player, prices: &[Price], perfs: &[Performance]) -> Self {
        let latest = prices.last();
        let latest_price = latest.map(|p| p.price);
        let market_cap = match (latest_price, player.circulating_shares) {
            (Some(price), Some(shares)) => Some(market_cap(price, shares)),
            _ => latest.and_then(|p| p.market_cap),
        };
        let avg_tp = average_tp(perfs);

        Self {
            player_id: player.id,
            display_name: player.display_name.clone(),
            team: player.team.clone(),
            position: player.position.clone(),
            token_symbol: player.token_symbol.clone(),
            latest_price,
            market_cap,
            holders: latest.and_then(|p| p.holders),
            price_change_pct: price_change_pct(prices),
            volatility: volatility(prices),
            matches: perfs.len(),
            total_tp: total_tp(perfs),
            average_tp: avg_tp,
            tp_rate: tp_rate(perfs),
            tp_per_dollar: tp_per_dollar(avg_tp, latest_price),
            average_score: average_score(perfs),
            best_ranking: best_ranking(perfs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    #[default]
    MarketCap,
    TpRate,
    TotalTp,
    AverageTp,
    TpPerDollar,
    Volatility,
    PriceChange,
}

impl RankingMetric {
    pub const ALL: [RankingMetric; 7] = [
        RankingMetric::MarketCap,
        RankingMetric::TpRate,
        RankingMetric::TotalTp,
        RankingMetric::AverageTp,
        RankingMetric::TpPerDollar,
        RankingMetric::Volatility,
        RankingMetric::PriceChange,
    ];

    pub fn value(&self, s: &PlayerSummary) -> Option<f64> {
        match self {
            RankingMetric::MarketCap => s.market_cap,
            RankingMetric::TpRate => Some(s.tp_rate),
            RankingMetric::TotalTp => Some(s.total_tp),
            RankingMetric::AverageTp => s.average_tp,
            RankingMetric::TpPerDollar => s.tp_per_dollar,
            RankingMetric::Volatility => s.volatility,
            RankingMetric::PriceChange => s.price_change_pct,
        }
    }
}

impl std::fmt::Display for RankingMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RankingMetric::MarketCap => "market_cap",
            RankingMetric::TpRate => "tp_rate",
            RankingMetric::TotalTp => "total_tp",
            RankingMetric::AverageTp => "average_tp",
            RankingMetric::TpPerDollar => "tp_per_dollar",
            RankingMetric::Volatility => "volatility",
            RankingMetric::PriceChange => "price_change",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RankingMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RankingMetric::ALL
            .into_iter()
            .find(|m| m.to_string() == s)
            .ok_or_else(|| format!("unknown ranking metric {s:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub rank: usize,
    pub value: Option<f64>,
    #[serde(flatten)]
    pub summary: PlayerSummary,
}

/// Descending by `metric`; players without a value go last, ties break by player id.
pub fn rank_players(summaries: Vec<PlayerSummary>, metric: RankingMetric) -> Vec<RankedPlayer> {
    let mut keyed: Vec<(Option<f64>, PlayerSummary)> =
        summaries.into_iter().map(|s| (metric.value(&s), s)).collect();

    keyed.sort_by(|(va, a), (vb, b)| {
        let by_value = match (va, vb) {
            (Some(x), Some(y)) => y.partial_cmp(x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_value.then(a.player_id.cmp(&b.player_id))
    });

    keyed
        .into_iter()
        .enumerate()
        .map(|(i, (value, summary))| RankedPlayer { rank: i + 1, value, summary })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn perf(day: u32, reward: Option<f64>) -> Performance {
        Performance {
            player_id: 1,
            match_date: NaiveDate::from_ymd_opt(2025, 5, day).unwrap(),
            raw_score: Some(day as f64),
            ranking: Some(day as i64 + 1),
            reward,
        }
    }

    fn prices(values: &[f64]) -> Vec<Price> {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &price)| Price {
                id: i as i64 + 1,
                player_id: 1,
                price,
                market_cap: None,
                holders: Some(10 + i as i64),
                fetched_at: base + Duration::hours(i as i64),
            })
            .collect()
    }

    #[test]
    fn tp_rate_counts_positive_rewards() {
        let rows: Vec<Performance> = (1..=10)
            .map(|d| perf(d, if d <= 3 { Some(5.0) } else if d == 4 { None } else { Some(0.0) }))
            .collect();
        assert_eq!(tp_rate(&rows), 30.0);
        assert_eq!(tp_rate(&[]), 0.0);
    }

    #[test]
    fn market_cap_is_price_times_shares() {
        assert!((market_cap(0.05, 1_000_000.0) - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn cumulative_tp_never_decreases() {
        let rows = vec![perf(9, Some(3.0)), perf(1, Some(2.0)), perf(4, None), perf(6, Some(-1.0)), perf(2, Some(0.5))];
        let points = cumulative_tp(&rows);
        assert_eq!(points.len(), 5);
        assert!(points.windows(2).all(|w| w[1].cumulative_tp >= w[0].cumulative_tp));
        assert!(points.windows(2).all(|w| w[1].match_date >= w[0].match_date));
        assert_eq!(points.last().unwrap().cumulative_tp, 5.5);
    }

    #[test]
    fn total_tp_agrees_with_cumulative_tp() {
        let rows = vec![perf(1, Some(4.0)), perf(2, Some(-3.0)), perf(3, None), perf(4, Some(1.5))];
        assert_eq!(total_tp(&rows), 5.5);
        assert_eq!(cumulative_tp(&rows).last().unwrap().cumulative_tp, total_tp(&rows));
    }

    #[test]
    fn mean_and_std_dev() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.0).abs() < 1e-12);
    }

    #[test]
    fn volatility_of_returns() {
        assert_eq!(volatility(&prices(&[1.0])), None);
        // +10% then -10%: returns 10 and -10, population sd = 10
        let v = volatility(&prices(&[1.0, 1.1, 0.99])).unwrap();
        assert!((v - 10.0).abs() < 1e-9, "volatility={v}");
        assert_eq!(volatility(&prices(&[2.0, 2.0, 2.0])), Some(0.0));
    }

    #[test]
    fn price_change_first_to_last() {
        let change = price_change_pct(&prices(&[0.5, 0.2, 0.75])).unwrap();
        assert!((change - 50.0).abs() < 1e-9);
        assert_eq!(price_change_pct(&prices(&[0.5])), None);
    }

    #[test]
    fn tp_per_dollar_requires_positive_price() {
        assert_eq!(tp_per_dollar(Some(5.0), Some(0.5)), Some(10.0));
        assert_eq!(tp_per_dollar(Some(5.0), Some(0.0)), None);
        assert_eq!(tp_per_dollar(None, Some(1.0)), None);
    }

    #[test]
    fn summary_combines_prices_and_performance() {
        let player = Player { circulating_shares: Some(1_000_000.0), ..Player::named(1, "Saka") };
        let rows = vec![perf(1, Some(4.0)), perf(2, None)];
        let s = PlayerSummary::build(&player, &prices(&[0.04, 0.05]), &rows);
        assert_eq!(s.latest_price, Some(0.05));
        assert!((s.market_cap.unwrap() - 50_000.0).abs() < 1e-6);
        assert_eq!(s.holders, Some(11));
        assert_eq!(s.total_tp, 4.0);
        assert_eq!(s.average_tp, Some(2.0));
        assert_eq!(s.tp_rate, 50.0);
        assert!((s.tp_per_dollar.unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(s.best_ranking, Some(2));
        assert_eq!(s.matches, 2);
    }

    #[test]
    fn summary_without_shares_falls_back_to_quoted_market_cap() {
        let player = Player::named(1, "X");
        let mut p = prices(&[0.5]);
        p[0].market_cap = Some(123.0);
        assert_eq!(PlayerSummary::build(&player, &p, &[]).market_cap, Some(123.0));
        assert_eq!(PlayerSummary::build(&player, &[], &[]).market_cap, None);
    }

    #[test]
    fn ranking_sorts_descending_with_missing_last() {
        let mk = |id: i64, cap: Option<f64>| {
            let mut s = PlayerSummary::build(&Player::named(id, "p"), &[], &[]);
            s.market_cap = cap;
            s
        };
        let ranked = rank_players(
            vec![mk(1, None), mk(2, Some(10.0)), mk(3, Some(30.0)), mk(4, Some(10.0))],
            RankingMetric::MarketCap,
        );
        let order: Vec<(usize, i64)> = ranked.iter().map(|r| (r.rank, r.summary.player_id)).collect();
        assert_eq!(order, vec![(1, 3), (2, 2), (3, 4), (4, 1)]);
    }

    #[test]
    fn metric_names_round_trip() {
        for m in RankingMetric::ALL {
            assert_eq!(m.to_string().parse::<RankingMetric>(), Ok(m));
        }
        assert!("elo".parse::<RankingMetric>().is_err());
    }
}
