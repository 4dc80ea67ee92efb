//! Aggressive-limit pricing for close orders.
//!
//! A close must execute, so the limit crosses the spread: sell at
//! `bid × (1 − cross_pct)`, buy at `ask × (1 + cross_pct)`. A wide spread
//! (over `wide_spread_pct`) distrusts both sides and falls back to
//! `last × (1 ∓ fallback_pct)`. Prices floor at `min_price`.

use rust_decimal::Decimal;

use qrl_config::OutboxConfig;
use qrl_schemas::{Quote, Side};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("unusable quote: bid={bid}, ask={ask}")]
    UnusableQuote { bid: Decimal, ask: Decimal },

    #[error("wide spread and no usable last price")]
    NoFallbackPrice,
}

/// Compute the limit price for a close order from a quote.
pub fn compute_limit_price(
    quote: &Quote,
    side: Side,
    config: &OutboxConfig,
) -> Result<Decimal, PricingError> {
    if !quote.is_usable() {
        return Err(PricingError::UnusableQuote {
            bid: quote.bid,
            ask: quote.ask,
        });
    }

    let spread = quote.spread_pct().expect("usable quote has positive bid");
    let one = Decimal::ONE;

    let raw = if spread > config.wide_spread_pct {
        tracing::warn!(symbol = %quote.symbol, %spread, "wide spread; pricing from last");
        if quote.last <= Decimal::ZERO {
            return Err(PricingError::NoFallbackPrice);
        }
        match side {
            Side::Sell => quote.last * (one - config.fallback_pct),
            Side::Buy => quote.last * (one + config.fallback_pct),
        }
    } else {
        match side {
            Side::Sell => quote.bid * (one - config.cross_pct),
            Side::Buy => quote.ask * (one + config.cross_pct),
        }
    };

    Ok(raw.max(config.min_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(bid: Decimal, ask: Decimal, last: Decimal) -> Quote {
        Quote {
            symbol: "AAPL".into(),
            bid,
            ask,
            last,
            timestamp: Utc::now(),
        }
    }

    fn config() -> OutboxConfig {
        OutboxConfig::default()
    }

    #[test]
    fn normal_spread_sell_crosses_bid_down() {
        let price =
            compute_limit_price(&quote(dec!(100), dec!(101), dec!(100.5)), Side::Sell, &config())
                .unwrap();
        assert_eq!(price, dec!(95.00));
    }

    #[test]
    fn normal_spread_buy_crosses_ask_up() {
        let price =
            compute_limit_price(&quote(dec!(100), dec!(101), dec!(100.5)), Side::Buy, &config())
                .unwrap();
        assert_eq!(price, dec!(106.05));
    }

    #[test]
    fn wide_spread_falls_back_to_last() {
        // Spread = 25% > 20% threshold.
        let q = quote(dec!(100), dec!(125), dec!(110));
        let sell = compute_limit_price(&q, Side::Sell, &config()).unwrap();
        assert_eq!(sell, dec!(99.00)); // 110 × 0.90
        let buy = compute_limit_price(&q, Side::Buy, &config()).unwrap();
        assert_eq!(buy, dec!(121.00)); // 110 × 1.10
    }

    #[test]
    fn wide_spread_without_last_fails() {
        let q = quote(dec!(100), dec!(125), Decimal::ZERO);
        assert_eq!(
            compute_limit_price(&q, Side::Sell, &config()),
            Err(PricingError::NoFallbackPrice)
        );
    }

    #[test]
    fn zero_bid_or_ask_is_unusable() {
        let q = quote(Decimal::ZERO, dec!(1), dec!(1));
        assert!(matches!(
            compute_limit_price(&q, Side::Sell, &config()),
            Err(PricingError::UnusableQuote { .. })
        ));
    }

    #[test]
    fn price_floors_at_minimum() {
        let q = quote(dec!(0.01), dec!(0.012), dec!(0.01));
        let price = compute_limit_price(&q, Side::Sell, &config()).unwrap();
        assert_eq!(price, dec!(0.01));
    }

    #[test]
    fn exactly_at_wide_threshold_uses_normal_path() {
        // Spread of exactly 20% is not "over" the threshold.
        let q = quote(dec!(100), dec!(120), dec!(110));
        let price = compute_limit_price(&q, Side::Sell, &config()).unwrap();
        assert_eq!(price, dec!(95.00));
    }
}
