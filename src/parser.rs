//! Parser for Binance USDT-futures market data messages
//!
//! Pure deserialization of the combined-stream envelope, depth updates,
//! aggregated trades, and the REST depth snapshot. No I/O; a frame that
//! fails to decode is reported and dropped by the caller.

use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::fixed::FixedDecimal;

/// A single price level delta. A quantity of exactly zero means the level
/// is deleted; stored book levels are always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: FixedDecimal,
    pub qty: f64,
}

/// Incremental update from the `@depth@100ms` stream
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event type ("depthUpdate")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (ms)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Transaction time (ms)
    #[serde(rename = "T", default)]
    pub transaction_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Final update ID of the previous event; the sync key
    #[serde(rename = "pu")]
    pub prev_final_update_id: u64,

    /// Bid deltas
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Ask deltas
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Aggregated trade from the `@aggTrade` stream
#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    /// Event type ("aggTrade")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (ms)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_f64_str")]
    pub price: f64,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_f64_str")]
    pub quantity: f64,

    /// First constituent trade ID
    #[serde(rename = "f")]
    pub first_trade_id: u64,

    /// Last constituent trade ID
    #[serde(rename = "l")]
    pub last_trade_id: u64,

    /// Trade time (ms)
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// True when the buyer was the maker, i.e. the taker sold
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl AggTrade {
    /// Aggressor side: `is_buyer_maker == false` means the taker bought.
    #[inline]
    pub fn is_buy(&self) -> bool {
        !self.is_buyer_maker
    }
}

/// Full depth snapshot from `GET /fapi/v1/depth`
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    /// Parse a REST response body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Combined-stream envelope: `{"stream": name, "data": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    pub stream: String,
    pub data: serde_json::Value,
}

/// A decoded WebSocket frame
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    DepthUpdate(DepthUpdate),
    AggTrade(AggTrade),
    Unknown(String),
}

impl ParsedMessage {
    /// Decode a raw text frame from the combined stream.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: StreamMessage = serde_json::from_str(raw)?;
        Self::from_stream_data(&envelope.stream, envelope.data)
    }

    fn from_stream_data(
        stream: &str,
        data: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        if stream.contains("@depth") {
            Ok(ParsedMessage::DepthUpdate(serde_json::from_value(data)?))
        } else if stream.contains("@aggTrade") {
            Ok(ParsedMessage::AggTrade(serde_json::from_value(data)?))
        } else {
            Ok(ParsedMessage::Unknown(stream.to_string()))
        }
    }
}

/// Deserialize an f64 carried as an ASCII decimal string
fn deserialize_f64_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    // owned String: the envelope hands us an already-parsed Value, which
    // cannot lend borrowed strings
    let s: String = Deserialize::deserialize(deserializer)?;
    f64::from_str(&s).map_err(serde::de::Error::custom)
}

/// Deserialize `[["price", "qty"], ...]` arrays of decimal-string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<(String, String)> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(price, qty)| {
            Ok(PriceLevel {
                price: FixedDecimal::from_str(&price).map_err(serde::de::Error::custom)?,
                qty: f64::from_str(&qty).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}
