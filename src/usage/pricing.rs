//! Pricing calculation and plan limits for Claude models

use std::collections::HashMap;

use crate::usage::models::Budget;

/// Pricing per million tokens (USD)
#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    pub fn new(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }
}

/// Calculator for API costs based on token usage
pub struct PricingCalculator {
    pricing: HashMap<&'static str, ModelPricing>,
    default_pricing: ModelPricing,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingCalculator {
    pub fn new() -> Self {
        let mut pricing = HashMap::new();

        pricing.insert("claude-opus-4-5", ModelPricing::new(5.0, 25.0, 6.25, 0.5));
        pricing.insert("claude-sonnet-4-5", ModelPricing::new(3.0, 15.0, 3.75, 0.3));
        pricing.insert("claude-haiku-4-5", ModelPricing::new(1.0, 5.0, 1.25, 0.1));

        // Legacy models
        let opus = ModelPricing::new(15.0, 75.0, 18.75, 1.5);
        pricing.insert("claude-opus-4", opus.clone());
        pricing.insert("claude-3-opus", opus);

        let sonnet = ModelPricing::new(3.0, 15.0, 3.75, 0.3);
        pricing.insert("claude-3-sonnet", sonnet.clone());
        pricing.insert("claude-3-5-sonnet", sonnet.clone());
        pricing.insert("claude-sonnet-4", sonnet.clone());

        pricing.insert("claude-3-haiku", ModelPricing::new(0.25, 1.25, 0.3, 0.03));
        pricing.insert("claude-3-5-haiku", ModelPricing::new(0.8, 4.0, 1.0, 0.08));

        Self {
            pricing,
            default_pricing: sonnet, // Unknown models are priced as Sonnet 4
        }
    }

    /// Get pricing for a model
    fn get_pricing(&self, model: &str) -> &ModelPricing {
        let normalized = normalize_model_name(model);
        self.pricing
            .get(normalized.as_str())
            .unwrap_or(&self.default_pricing)
    }

    /// Calculate cost for token usage
    pub fn calculate_cost(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
    ) -> f64 {
        let pricing = self.get_pricing(model);

        let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output;
        let cache_creation_cost =
            (cache_creation_tokens as f64 / 1_000_000.0) * pricing.cache_creation;
        let cache_read_cost = (cache_read_tokens as f64 / 1_000_000.0) * pricing.cache_read;

        input_cost + output_cost + cache_creation_cost + cache_read_cost
    }
}

/// Normalize model name for pricing lookup and per-model grouping
pub fn normalize_model_name(model: &str) -> String {
    let model_lower = model.to_lowercase();
    let is_4_5 = model_lower.contains("4-5") || model_lower.contains("4.5");
    let is_3_5 = model_lower.contains("3-5") || model_lower.contains("3.5");

    if model_lower.contains("opus") {
        if is_4_5 {
            return "claude-opus-4-5".to_string();
        }
        if model_lower.contains('3') {
            return "claude-3-opus".to_string();
        }
        return "claude-opus-4".to_string();
    }
    if model_lower.contains("sonnet") {
        if is_4_5 {
            return "claude-sonnet-4-5".to_string();
        }
        if is_3_5 {
            return "claude-3-5-sonnet".to_string();
        }
        if model_lower.contains('4') {
            return "claude-sonnet-4".to_string();
        }
        return "claude-3-sonnet".to_string();
    }
    if model_lower.contains("haiku") {
        if is_4_5 {
            return "claude-haiku-4-5".to_string();
        }
        if is_3_5 {
            return "claude-3-5-haiku".to_string();
        }
        return "claude-3-haiku".to_string();
    }

    model.to_string()
}

pub fn is_sonnet_model(model: &str) -> bool {
    model.to_lowercase().contains("sonnet")
}

pub fn is_opus_model(model: &str) -> bool {
    model.to_lowercase().contains("opus")
}

/// Known plan identifiers
pub const PLAN_TYPES: [&str; 4] = ["pro", "max5", "max20", "custom"];

/// Token ceilings of the known tiers, ascending (Pro, Max5, Max20)
pub const TIER_TOKEN_LIMITS: [u64; 3] = [19_000, 88_000, 220_000];

/// Get the window budget for a plan type.
///
/// Plans carry no per-window token ceiling; only `custom` may set one.
pub fn get_plan_limits(plan_type: &str) -> Budget {
    match plan_type.to_lowercase().as_str() {
        "max5" => Budget {
            plan_name: "Max5".to_string(),
            token_limit: 0,
            cost_limit_usd: 35.0,
            message_limit: 1_000,
        },
        "max20" => Budget {
            plan_name: "Max20".to_string(),
            token_limit: 0,
            cost_limit_usd: 140.0,
            message_limit: 2_000,
        },
        _ => Budget {
            plan_name: "Pro".to_string(),
            token_limit: 0,
            cost_limit_usd: 18.0,
            message_limit: 250,
        },
    }
}

/// Token ceiling used when comparing completed windows against a tier
pub fn tier_token_limit(plan_type: &str) -> u64 {
    match plan_type.to_lowercase().as_str() {
        "max5" => TIER_TOKEN_LIMITS[1],
        "max20" => TIER_TOKEN_LIMITS[2],
        _ => TIER_TOKEN_LIMITS[0],
    }
}

/// Weekly hour allowances per model family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyLimits {
    pub sonnet_hours: f64,
    /// Zero while Opus weekly limits are not enforced
    pub opus_hours: f64,
}

pub fn get_weekly_limits(plan_type: &str) -> WeeklyLimits {
    match plan_type.to_lowercase().as_str() {
        "max5" => WeeklyLimits {
            sonnet_hours: 210.0,
            opus_hours: 0.0,
        },
        "max20" => WeeklyLimits {
            sonnet_hours: 360.0,
            opus_hours: 0.0,
        },
        _ => WeeklyLimits {
            sonnet_hours: 60.0,
            opus_hours: 0.0,
        },
    }
}

/// Display tokens treated as one hour of active use, (sonnet, opus)
pub fn tokens_per_hour(plan_type: &str) -> (f64, f64) {
    match plan_type.to_lowercase().as_str() {
        "max20" => (120_000.0, 60_000.0),
        "max5" => (100_000.0, 50_000.0),
        _ => (80_000.0, 40_000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_cost_sonnet() {
        let calculator = PricingCalculator::new();
        let cost = calculator.calculate_cost("claude-3-5-sonnet", 1_000_000, 1_000_000, 0, 0);
        // Expected: 3.0 + 15.0 = 18.0
        assert!((cost - 18.0).abs() < 0.001);
    }

    #[test]
    fn test_calculate_cost_with_cache() {
        let calculator = PricingCalculator::new();
        let cost = calculator.calculate_cost(
            "claude-opus-4-5-20251101",
            1_000_000,
            0,
            1_000_000,
            1_000_000,
        );
        // 5.0 + 6.25 + 0.5
        assert!((cost - 11.75).abs() < 0.001);
    }

    #[test]
    fn test_unknown_model_uses_sonnet_pricing() {
        let calculator = PricingCalculator::new();
        let cost = calculator.calculate_cost("gpt-something", 1_000_000, 0, 0, 0);
        assert!((cost - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(
            normalize_model_name("claude-3-5-sonnet-20240620"),
            "claude-3-5-sonnet"
        );
        assert_eq!(normalize_model_name("Claude 3 Opus"), "claude-3-opus");
        assert_eq!(
            normalize_model_name("claude-sonnet-4-5-20250929"),
            "claude-sonnet-4-5"
        );
        assert_eq!(
            normalize_model_name("claude-sonnet-4-20250514"),
            "claude-sonnet-4"
        );
        assert_eq!(normalize_model_name("claude-haiku-4-5"), "claude-haiku-4-5");
        assert_eq!(normalize_model_name("<synthetic>"), "<synthetic>");
    }

    #[test]
    fn test_plan_limits_default_to_pro() {
        assert_eq!(get_plan_limits("unknown").plan_name, "Pro");
        assert_eq!(get_plan_limits("MAX20").cost_limit_usd, 140.0);
        assert_eq!(tier_token_limit("max5"), 88_000);
    }
}
