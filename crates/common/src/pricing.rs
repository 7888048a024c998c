//! Resource pricing and stake-based discount tiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ResourceSpec;

/// Price of one unit of a resource per month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPrice {
    pub price_per_unit: f64,
    pub currency: String,
}

impl UnitPrice {
    fn usd(price_per_unit: f64) -> Self {
        Self {
            price_per_unit,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountTier {
    pub name: String,
    pub discount_percent: f64,
    pub minimum_stake: f64,
}

impl DiscountTier {
    pub fn new(name: &str, discount_percent: f64, minimum_stake: f64) -> Self {
        Self {
            name: name.to_string(),
            discount_percent,
            minimum_stake,
        }
    }
}

/// Platform-wide pricing, managed by operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfiguration {
    /// Per core
    pub cpu: UnitPrice,

    /// Per GB
    pub memory: UnitPrice,

    /// Per GB
    pub storage: UnitPrice,

    pub discount_tiers: Vec<DiscountTier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PricingConfiguration {
    fn default() -> Self {
        Self {
            cpu: UnitPrice::usd(5.0),
            memory: UnitPrice::usd(2.0),
            storage: UnitPrice::usd(0.1),
            discount_tiers: vec![
                DiscountTier::new("Standard", 0.0, 0.0),
                DiscountTier::new("Silver", 10.0, 1000.0),
                DiscountTier::new("Gold", 20.0, 5000.0),
                DiscountTier::new("Platinum", 30.0, 10000.0),
            ],
            updated_at: None,
        }
    }
}

/// Monthly price for a resource bundle after the stake discount
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub subtotal: f64,
    pub discount_percent: f64,
    pub total: f64,
    pub currency: String,
}

impl PricingConfiguration {
    pub fn quote(&self, resources: &ResourceSpec, stake: f64) -> Quote {
        let subtotal = f64::from(resources.cpu) * self.cpu.price_per_unit
            + f64::from(resources.memory) * self.memory.price_per_unit
            + f64::from(resources.storage) * self.storage.price_per_unit;
        let discount_percent = compute_discount(stake, &self.discount_tiers);

        Quote {
            subtotal,
            discount_percent,
            total: subtotal * (100.0 - discount_percent) / 100.0,
            currency: self.cpu.currency.clone(),
        }
    }
}

/// Discount of the highest tier whose threshold the stake meets, or 0.
///
/// Tiers are ordered by threshold with a stable sort, so among tiers sharing
/// a threshold the one declared last applies.
pub fn compute_discount(stake: f64, tiers: &[DiscountTier]) -> f64 {
    let mut ordered: Vec<&DiscountTier> = tiers.iter().collect();
    ordered.sort_by(|a, b| a.minimum_stake.total_cmp(&b.minimum_stake));

    ordered
        .iter()
        .take_while(|tier| tier.minimum_stake <= stake)
        .last()
        .map_or(0.0, |tier| tier.discount_percent)
}
