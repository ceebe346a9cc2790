//! Per-token and per-media pricing tables.

use std::collections::HashMap;

use crate::types::Platform;

/// USD price per single token (not per-million) for one model, by token class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

/// Flat per-image price, used instead of the token table for media billing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePrice {
    pub per_image: f64,
}

pub struct PriceTable {
    models: HashMap<(Platform, String), ModelPrice>,
    images: HashMap<(Platform, String), ImagePrice>,
}

impl PriceTable {
    /// A static table. Out-of-scope entries fall back to `ModelPrice::default()`
    /// (zero cost) rather than erroring, so an unrecognized model doesn't block
    /// dispatch — billing enforcement is still driven by balance/quota checks.
    pub fn with_defaults() -> Self {
        let mut models = HashMap::new();
        // prices per token, in USD, per published per-million-token rates / 1_000_000
        models.insert(
            (Platform::Anthropic, "claude-opus-4".to_string()),
            ModelPrice { input: 15.0 / 1_000_000.0, output: 75.0 / 1_000_000.0, cache_creation: 18.75 / 1_000_000.0, cache_read: 1.5 / 1_000_000.0 },
        );
        models.insert(
            (Platform::Anthropic, "claude-sonnet-4".to_string()),
            ModelPrice { input: 3.0 / 1_000_000.0, output: 15.0 / 1_000_000.0, cache_creation: 3.75 / 1_000_000.0, cache_read: 0.3 / 1_000_000.0 },
        );
        models.insert(
            (Platform::OpenAi, "gpt-4o".to_string()),
            ModelPrice { input: 2.5 / 1_000_000.0, output: 10.0 / 1_000_000.0, cache_creation: 0.0, cache_read: 1.25 / 1_000_000.0 },
        );
        models.insert(
            (Platform::Gemini, "gemini-1.5-pro".to_string()),
            ModelPrice { input: 1.25 / 1_000_000.0, output: 5.0 / 1_000_000.0, cache_creation: 0.0, cache_read: 0.3125 / 1_000_000.0 },
        );

        let mut images = HashMap::new();
        images.insert((Platform::OpenAi, "gpt-4o".to_string()), ImagePrice { per_image: 0.00765 });

        Self { models, images }
    }

    pub fn model_price(&self, platform: Platform, model: &str) -> ModelPrice {
        self.models.get(&(platform, model.to_string())).copied().unwrap_or_default()
    }

    pub fn image_price(&self, platform: Platform, model: &str) -> ImagePrice {
        self.images.get(&(platform, model.to_string())).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub images: i64,
}

/// `cost = sum_over_token_classes(tokens * price * group.rate_multiplier *
/// account.rate_multiplier * apikey_multiplier_if_any)`.
pub fn compute_cost(
    prices: &PriceTable,
    platform: Platform,
    model: &str,
    usage: TokenUsage,
    group_rate_multiplier: f64,
    account_rate_multiplier: f64,
    apikey_multiplier: Option<f64>,
) -> f64 {
    let multiplier = group_rate_multiplier * account_rate_multiplier * apikey_multiplier.unwrap_or(1.0);

    if usage.images > 0 {
        let image_price = prices.image_price(platform, model);
        return usage.images as f64 * image_price.per_image * multiplier;
    }

    let price = prices.model_price(platform, model);
    let token_cost = usage.input_tokens as f64 * price.input
        + usage.output_tokens as f64 * price.output
        + usage.cache_creation_tokens as f64 * price.cache_creation
        + usage.cache_read_tokens as f64 * price.cache_read;
    token_cost * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_nonzero_cost() {
        let prices = PriceTable::with_defaults();
        let usage = TokenUsage { input_tokens: 1000, output_tokens: 500, ..Default::default() };
        let cost = compute_cost(&prices, Platform::Anthropic, "claude-sonnet-4", usage, 1.0, 1.0, None);
        assert!(cost > 0.0);
    }

    #[test]
    fn unknown_model_costs_zero_instead_of_erroring() {
        let prices = PriceTable::with_defaults();
        let usage = TokenUsage { input_tokens: 1000, output_tokens: 500, ..Default::default() };
        let cost = compute_cost(&prices, Platform::Anthropic, "some-unlisted-model", usage, 1.0, 1.0, None);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn rate_multipliers_compound() {
        let prices = PriceTable::with_defaults();
        let usage = TokenUsage { input_tokens: 1_000_000, ..Default::default() };
        let base = compute_cost(&prices, Platform::Anthropic, "claude-sonnet-4", usage, 1.0, 1.0, None);
        let doubled = compute_cost(&prices, Platform::Anthropic, "claude-sonnet-4", usage, 2.0, 1.0, None);
        assert!((doubled - base * 2.0).abs() < 1e-9);
    }

    #[test]
    fn image_usage_uses_image_price_table() {
        let prices = PriceTable::with_defaults();
        let usage = TokenUsage { images: 3, ..Default::default() };
        let cost = compute_cost(&prices, Platform::OpenAi, "gpt-4o", usage, 1.0, 1.0, None);
        assert!((cost - 3.0 * 0.00765).abs() < 1e-9);
    }
}
