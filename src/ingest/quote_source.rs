//! Quote source - upstream market data provider
//!
//! The scheduler only sees the [`QuoteSource`] trait; the production
//! implementation polls a Yahoo-style quote endpoint over HTTP. A quote
//! record that exists but carries no price is a valid observation
//! (`price: None`), distinct from a fetch failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// One fetched quote. `price` is None when the source had no quote at
/// poll time.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub price: Option<f64>,
    pub currency: Option<String>,
}

/// Per-symbol fetch failure. Non-fatal: the scheduler skips the symbol
/// for the cycle and logs it.
#[derive(Debug, Error)]
pub enum QuoteFetchError {
    #[error("quote request failed for {symbol}: {source}")]
    Http {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("quote API returned status {status} for {symbol}")]
    Status { symbol: String, status: u16 },

    #[error("no quote record in response for {symbol}")]
    MissingQuote { symbol: String },

    #[error("malformed quote payload for {symbol}: {message}")]
    Malformed { symbol: String, message: String },
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the current quote for one symbol.
    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, QuoteFetchError>;
}

// Yahoo v7 quote response shape (only the fields we read)

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResult,
}

#[derive(Debug, Deserialize)]
struct QuoteResult {
    result: Vec<QuoteRecord>,
}

#[derive(Debug, Deserialize)]
struct QuoteRecord {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    currency: Option<String>,
}

/// HTTP quote source against a Yahoo-style `/v7/finance/quote` endpoint.
pub struct YahooQuoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuoteSource {
    /// Build a source against the given API base URL
    /// (e.g. `https://query1.finance.yahoo.com`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn quote_url(&self, symbol: &str) -> String {
        format!(
            "{}/v7/finance/quote?symbols={}",
            self.base_url.trim_end_matches('/'),
            symbol
        )
    }
}

/// Map a quote response body to a snapshot for one symbol.
fn parse_quote_body(symbol: &str, body: &str) -> Result<QuoteSnapshot, QuoteFetchError> {
    let envelope: QuoteEnvelope =
        serde_json::from_str(body).map_err(|e| QuoteFetchError::Malformed {
            symbol: symbol.to_string(),
            message: e.to_string(),
        })?;

    let record = envelope
        .quote_response
        .result
        .into_iter()
        .next()
        .ok_or_else(|| QuoteFetchError::MissingQuote {
            symbol: symbol.to_string(),
        })?;

    Ok(QuoteSnapshot {
        price: record.regular_market_price,
        currency: record.currency,
    })
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, QuoteFetchError> {
        let url = self.quote_url(symbol);

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| QuoteFetchError::Http {
                    symbol: symbol.to_string(),
                    source: e,
                })?;

        if !response.status().is_success() {
            return Err(QuoteFetchError::Status {
                symbol: symbol.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| QuoteFetchError::Http {
            symbol: symbol.to_string(),
            source: e,
        })?;

        parse_quote_body(symbol, &body)
    }
}
