use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use common::{BookLevel, Error, MarketSource, MarketState, Result};

/// Order-book snapshots from a Polymarket-style CLOB REST endpoint
/// (`GET {base}/book?token_id={market_id}`).
pub struct HttpSnapshotSource {
    base_url: String,
    http: Client,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl MarketSource for HttpSnapshotSource {
    async fn snapshot(&self, market_id: &str) -> Result<MarketState> {
        let url = format!("{}/book", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", market_id)])
            .send()
            .await
            .map_err(|e| Error::FeedUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::FeedUnavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::FeedUnavailable(format!("HTTP {status}: {body}")));
        }

        let book: BookResponse = serde_json::from_str(&body)
            .map_err(|e| Error::FeedUnavailable(format!("malformed book: {e}")))?;
        let market = book.into_market_state(market_id)?;
        debug!(
            market_id,
            mid = market.mid(),
            bids = market.bids.len(),
            asks = market.asks.len(),
            "Snapshot fetched"
        );
        Ok(market)
    }
}

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
    #[serde(default, deserialize_with = "opt_num")]
    last_trade_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    #[serde(deserialize_with = "num")]
    price: f64,
    #[serde(deserialize_with = "num")]
    size: f64,
}

/// The CLOB sends decimals as strings; accept plain numbers too.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(f64),
    Str(String),
}

impl NumOrString {
    fn value<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            NumOrString::Num(n) => Ok(n),
            NumOrString::Str(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn num<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    NumOrString::deserialize(d)?.value()
}

fn opt_num<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Option::<NumOrString>::deserialize(d)?
        .map(NumOrString::value::<D::Error>)
        .transpose()
}

impl BookResponse {
    fn into_market_state(self, market_id: &str) -> Result<MarketState> {
        let clean = |levels: Vec<WireLevel>| -> Vec<BookLevel> {
            levels
                .into_iter()
                .filter(|l| l.price.is_finite() && l.size.is_finite() && l.size > 0.0)
                .map(|l| BookLevel {
                    price: l.price,
                    size: l.size,
                })
                .collect()
        };
        let mut bids = clean(self.bids);
        let mut asks = clean(self.asks);
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));

        let price = match (bids.first(), asks.first(), self.last_trade_price) {
            (_, _, Some(last)) if last.is_finite() && last > 0.0 => last,
            (Some(bid), Some(ask), _) => (bid.price + ask.price) / 2.0,
            (Some(only), None, _) | (None, Some(only), _) => only.price,
            _ => return Err(Error::FeedUnavailable("empty order book".into())),
        };

        Ok(MarketState {
            market_id: market_id.to_string(),
            timestamp: Utc::now(),
            price,
            bids,
            asks,
        })
    }
}
