//! 模型调用价格查询
//!
//! 可选能力：查不到价格时成本记为 0，不影响运行。

use std::collections::HashMap;

use serde::Deserialize;

/// price(model_id, input_tokens, output_tokens) -> (cost_in, cost_out)
pub trait PricingLookup: Send + Sync {
    fn price(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> Option<(f64, f64)>;
}

/// 单个模型的单价（每百万 token，美元）
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// 静态价格表（来自配置 [pricing.models]）
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self { prices }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model_id.into(), price);
        self
    }
}

impl PricingLookup for PriceTable {
    fn price(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> Option<(f64, f64)> {
        let p = self.prices.get(model_id)?;
        Some((
            input_tokens as f64 * p.input_per_million / 1_000_000.0,
            output_tokens as f64 * p.output_per_million / 1_000_000.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_table_lookup() {
        let table = PriceTable::default().with_model(
            "gpt-4o-mini",
            ModelPrice {
                input_per_million: 1.0,
                output_per_million: 2.0,
            },
        );
        let (cin, cout) = table.price("gpt-4o-mini", 500_000, 250_000).unwrap();
        assert!((cin - 0.5).abs() < 1e-9);
        assert!((cout - 0.5).abs() < 1e-9);
        assert!(table.price("unknown", 1, 1).is_none());
    }
}
