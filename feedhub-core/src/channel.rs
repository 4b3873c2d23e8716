//! Market data channels and delivery modes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::FeedError;

/// Market data channel a strategy can request from an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Best bid/ask and last price
    Ticker,
    /// Candlesticks, usually parameterised by `interval`
    Klines,
    /// Order book snapshots and deltas
    #[serde(rename = "orderbook")]
    OrderBook,
    /// Public trades
    Trades,
    /// Mark price for derivatives
    MarkPrice,
    /// Funding rate updates for perpetuals
    FundingRate,
    /// Forced liquidations
    Liquidations,
}

impl Channel {
    /// Canonical lowercase name, also used inside key fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Ticker => "ticker",
            Channel::Klines => "klines",
            Channel::OrderBook => "orderbook",
            Channel::Trades => "trades",
            Channel::MarkPrice => "mark_price",
            Channel::FundingRate => "funding_rate",
            Channel::Liquidations => "liquidations",
        }
    }

    pub fn all() -> [Channel; 7] {
        [
            Channel::Ticker,
            Channel::Klines,
            Channel::OrderBook,
            Channel::Trades,
            Channel::MarkPrice,
            Channel::FundingRate,
            Channel::Liquidations,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ticker" => Ok(Channel::Ticker),
            "klines" | "kline" | "candles" => Ok(Channel::Klines),
            "orderbook" | "order_book" | "book" | "depth" => Ok(Channel::OrderBook),
            "trades" | "trade" => Ok(Channel::Trades),
            "mark_price" | "markprice" => Ok(Channel::MarkPrice),
            "funding_rate" | "funding" => Ok(Channel::FundingRate),
            "liquidations" | "liquidation" => Ok(Channel::Liquidations),
            _ => Err(FeedError::parse(format!("Unknown channel: {}", s))),
        }
    }
}

/// Wire transport used to deliver a feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Streaming push over a websocket connection
    #[default]
    Websocket,
    /// Periodic polling over REST
    Rest,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Websocket => "websocket",
            DeliveryMode::Rest => "rest",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(DeliveryMode::Websocket),
            "rest" | "http" | "poll" => Ok(DeliveryMode::Rest),
            _ => Err(FeedError::parse(format!("Unknown delivery mode: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_display_round_trips_through_from_str() {
        for channel in Channel::all() {
            let parsed: Channel = channel.to_string().parse().unwrap();
            assert_eq!(parsed, channel);
        }
    }

    #[test]
    fn test_channel_aliases() {
        assert_eq!("Depth".parse::<Channel>().unwrap(), Channel::OrderBook);
        assert_eq!(" kline ".parse::<Channel>().unwrap(), Channel::Klines);
        assert!("candlesticks".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_serde_names_match_display() {
        let json = serde_json::to_string(&Channel::OrderBook).unwrap();
        assert_eq!(json, "\"orderbook\"");
        let json = serde_json::to_string(&Channel::MarkPrice).unwrap();
        assert_eq!(json, "\"mark_price\"");
    }

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!("WS".parse::<DeliveryMode>().unwrap(), DeliveryMode::Websocket);
        assert_eq!("rest".parse::<DeliveryMode>().unwrap(), DeliveryMode::Rest);
        assert!("grpc".parse::<DeliveryMode>().is_err());
    }
}
