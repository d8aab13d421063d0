//! Listing-price arithmetic: distributor markup and platform fee, expressed
//! entirely in [`Money`] with explicit basis-point rounding. Pure; no ledger
//! access.

use serde::{Deserialize, Serialize};

use payvault_core::{DomainResult, Money};

/// Markup and fee rates in basis points (1 bps = 0.01%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub markup_bps: u32,
    pub platform_fee_bps: u32,
}

/// How a base price splits into the buyer-facing price, the platform's cut,
/// and the provider's net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub list_price: Money,
    pub platform_fee: Money,
    pub provider_net: Money,
}

impl PricingPolicy {
    /// Price a base amount: list = base + markup, fee is taken from the
    /// list price, provider nets the remainder. `fee + net == list` always.
    pub fn price(&self, base: Money) -> DomainResult<PriceBreakdown> {
        let markup = base.mul_bps(self.markup_bps)?;
        let list_price = base.checked_add(markup)?;
        let platform_fee = list_price.mul_bps(self.platform_fee_bps)?;
        let provider_net = list_price.checked_sub(platform_fee)?;
        Ok(PriceBreakdown {
            list_price,
            platform_fee,
            provider_net,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payvault_core::Currency;
    use proptest::prelude::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn money(s: &str) -> Money {
        Money::parse(s, usd()).unwrap()
    }

    #[test]
    fn markup_and_fee_split() {
        let policy = PricingPolicy {
            markup_bps: 2_000,       // 20%
            platform_fee_bps: 500,   // 5% of list
        };
        let breakdown = policy.price(money("100")).unwrap();
        assert_eq!(breakdown.list_price, money("120"));
        assert_eq!(breakdown.platform_fee, money("6"));
        assert_eq!(breakdown.provider_net, money("114"));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let policy = PricingPolicy {
            markup_bps: 0,
            platform_fee_bps: 333, // 3.33%
        };
        // 15.99 * 3.33% = 0.532467 -> 0.5325 at scale 4
        let breakdown = policy.price(money("15.99")).unwrap();
        assert_eq!(breakdown.platform_fee, money("0.5325"));
        assert_eq!(breakdown.provider_net, money("15.4575"));
    }

    proptest! {
        // The split always conserves the list price exactly.
        #[test]
        fn fee_plus_net_equals_list(
            base_minor in 0i64..1_000_000_000,
            markup_bps in 0u32..10_000,
            fee_bps in 0u32..10_000,
        ) {
            let policy = PricingPolicy { markup_bps, platform_fee_bps: fee_bps };
            let breakdown = policy.price(Money::from_minor(base_minor, usd())).unwrap();
            let recombined = breakdown.platform_fee.checked_add(breakdown.provider_net).unwrap();
            prop_assert_eq!(recombined, breakdown.list_price);
        }
    }
}
