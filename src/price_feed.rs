//! C1 — multi-oracle price feed with a short-TTL per-pair cache.
//!
//! The production fetcher is injected as a trait object so tests can
//! stub it; `main.rs` wires an HTTP-backed implementation.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::crypto::hmac_hash;
use crate::domain::PriceSource;
use crate::error::QFlashError;

#[async_trait]
pub trait OracleSource: Send + Sync {
    /// Fetches independent source quotes for `pair`. Returns as many
    /// sources as responded within the fetcher's own timeout; the
    /// caller decides whether that count meets the K threshold.
    async fn fetch(&self, pair: &str) -> Result<Vec<PriceSource>>;
}

#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub pair: String,
    pub median_price: f64,
    pub sources: Vec<PriceSource>,
    pub fetched_at: i64,
    pub attestation_hash: String,
}

struct CacheEntry {
    quote: PriceQuote,
}

pub struct PriceFeed {
    fetcher: Box<dyn OracleSource>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl_ms: i64,
    min_sources: usize,
    attestation_key: String,
}

fn median(mut prices: Vec<f64>) -> f64 {
    prices.sort_by(|a, b| a.partial_cmp(b).expect("prices are never NaN"));
    let n = prices.len();
    if n % 2 == 1 {
        prices[n / 2]
    } else {
        (prices[n / 2 - 1] + prices[n / 2]) / 2.0
    }
}

impl PriceFeed {
    pub fn new(
        fetcher: Box<dyn OracleSource>,
        cache_ttl_ms: i64,
        min_sources: usize,
        attestation_key: String,
    ) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
            cache_ttl_ms,
            min_sources,
            attestation_key,
        }
    }

    /// Drops any cached tick for `pair`. Called immediately before
    /// fetching a closing price so a stale opening tick can never be
    /// reused as a closing tick.
    pub fn invalidate(&self, pair: &str) {
        self.cache.lock().remove(pair);
    }

    pub async fn price_for(&self, pair: &str, force_fresh: bool, now_ms: i64) -> Result<PriceQuote, QFlashError> {
        if !force_fresh {
            if let Some(entry) = self.cache.lock().get(pair) {
                let age_ms = now_ms - entry.quote.fetched_at * 1000;
                if age_ms >= 0 && age_ms < self.cache_ttl_ms {
                    return Ok(entry.quote.clone());
                }
            }
        }

        let sources = self
            .fetcher
            .fetch(pair)
            .await
            .map_err(|_| QFlashError::OracleUnavailable(pair.to_string()))?;

        if sources.len() < self.min_sources {
            return Err(QFlashError::OracleUnavailable(pair.to_string()));
        }

        let median_price = median(sources.iter().map(|s| s.price).collect());
        let fetched_at = now_ms / 1000;

        let attestation_hash = hmac_hash(
            &self.attestation_key,
            &json!({
                "pair": pair,
                "medianPrice": median_price,
                "sources": sources,
                "fetchedAt": fetched_at,
            }),
        );

        let quote = PriceQuote {
            pair: pair.to_string(),
            median_price,
            sources,
            fetched_at,
            attestation_hash,
        };

        self.cache.lock().insert(
            pair.to_string(),
            CacheEntry {
                quote: quote.clone(),
            },
        );

        Ok(quote)
    }
}

/// Production fetcher: queries a fixed set of HTTP price endpoints
/// concurrently and returns whichever respond inside the timeout.
pub struct HttpOracleSource {
    client: reqwest::Client,
    endpoints: Vec<(String, String)>,
}

impl HttpOracleSource {
    pub fn new(endpoints: Vec<(String, String)>, timeout: StdDuration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a plain timeout");
        Self { client, endpoints }
    }
}

#[async_trait]
impl OracleSource for HttpOracleSource {
    async fn fetch(&self, pair: &str) -> Result<Vec<PriceSource>> {
        let mut sources = Vec::new();
        for (name, url_template) in &self.endpoints {
            let url = url_template.replace("{pair}", pair);
            let resp = match self.client.get(&url).send().await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let body: serde_json::Value = match resp.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(price) = body.get("price").and_then(|p| p.as_f64()) {
                sources.push(PriceSource {
                    name: name.clone(),
                    price,
                });
            }
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        prices: Vec<f64>,
    }

    #[async_trait]
    impl OracleSource for StubSource {
        async fn fetch(&self, _pair: &str) -> Result<Vec<PriceSource>> {
            Ok(self
                .prices
                .iter()
                .enumerate()
                .map(|(i, p)| PriceSource {
                    name: format!("src{i}"),
                    price: *p,
                })
                .collect())
        }
    }

    #[test]
    fn median_even_count_averages_middle_two() {
        assert_eq!(median(vec![1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn median_odd_count_picks_middle() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
    }

    #[tokio::test]
    async fn below_threshold_is_unavailable() {
        let feed = PriceFeed::new(
            Box::new(StubSource {
                prices: vec![100.0],
            }),
            5000,
            2,
            "k".into(),
        );
        let result = feed.price_for("BTC-USD", true, 0).await;
        assert!(matches!(result, Err(QFlashError::OracleUnavailable(_))));
    }

    #[tokio::test]
    async fn cache_hit_within_ttl_skips_fetch() {
        let feed = PriceFeed::new(
            Box::new(StubSource {
                prices: vec![100.0, 101.0],
            }),
            5000,
            2,
            "k".into(),
        );
        let first = feed.price_for("BTC-USD", true, 0).await.unwrap();
        let second = feed.price_for("BTC-USD", false, 1000).await.unwrap();
        assert_eq!(first.attestation_hash, second.attestation_hash);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_even_without_force_fresh() {
        let feed = PriceFeed::new(
            Box::new(StubSource {
                prices: vec![100.0, 101.0],
            }),
            5000,
            2,
            "k".into(),
        );
        feed.price_for("BTC-USD", true, 0).await.unwrap();
        feed.invalidate("BTC-USD");
        // After invalidation the cache is empty, so even a non-forced
        // call must go back through the fetcher rather than returning
        // a stale entry from before invalidation.
        assert!(feed.cache.lock().get("BTC-USD").is_none());
    }
}
