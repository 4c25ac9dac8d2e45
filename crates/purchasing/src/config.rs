//! Engine configuration.

use iapkit_core::ProductId;

/// Comma-separated product identifiers configured at startup.
pub const PRODUCT_IDS_ENV: &str = "IAPKIT_PRODUCT_IDS";
/// When truthy, direct purchases that verify but map to no catalog product are
/// still finished.
pub const FINISH_UNMAPPABLE_ENV: &str = "IAPKIT_FINISH_UNMAPPABLE";

/// Purchase engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identifiers the first fetch asks the store for.
    pub product_ids: Vec<ProductId>,
    /// Finish verified-but-unmappable transactions on the direct purchase path.
    ///
    /// Off by default: the transaction stays open at the store for support to
    /// resolve. The listener path always finishes.
    pub finish_unmappable_purchases: bool,
    /// Name for logging.
    pub listener_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_ids: Vec::new(),
            finish_unmappable_purchases: false,
            listener_name: "transaction-listener".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_product_ids<I, P>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProductId>,
    {
        self.product_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_product_id(mut self, id: impl Into<ProductId>) -> Self {
        self.product_ids.push(id.into());
        self
    }

    pub fn with_finish_unmappable_purchases(mut self, finish: bool) -> Self {
        self.finish_unmappable_purchases = finish;
        self
    }

    pub fn with_listener_name(mut self, name: impl Into<String>) -> Self {
        self.listener_name = name.into();
        self
    }

    /// Build from process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, settings file, ...).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup(PRODUCT_IDS_ENV) {
            Some(raw) => config.product_ids = parse_product_ids(&raw),
            None => tracing::warn!("{PRODUCT_IDS_ENV} not set; starting with no products"),
        }

        if let Some(raw) = lookup(FINISH_UNMAPPABLE_ENV) {
            config.finish_unmappable_purchases = parse_flag(&raw);
        }

        config
    }
}

/// Split a comma-separated list, trimming whitespace and dropping empties and
/// repeats.
pub fn parse_product_ids(raw: &str) -> Vec<ProductId> {
    let mut ids: Vec<ProductId> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = ProductId::from(part);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
