use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use common::LogicRef;

use crate::builtin::{MomentumStrategy, OrderBookImbalanceStrategy, RsiReversionStrategy};
use crate::Strategy;

type Builder = Arc<dyn Fn(&LogicParams) -> Result<Arc<dyn Strategy>, String> + Send + Sync>;

/// Typed accessors over a descriptor's free-form logic parameters.
///
/// Missing keys fall back to the default; present keys of the wrong type are
/// an error so that a malformed descriptor fails validation.
pub struct LogicParams<'a>(pub &'a BTreeMap<String, serde_json::Value>);

impl LogicParams<'_> {
    pub fn f64(&self, key: &str, default: f64) -> Result<f64, String> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| format!("param '{key}' must be a finite number, got {v}")),
        }
    }

    pub fn usize(&self, key: &str, default: usize) -> Result<usize, String> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|x| x as usize)
                .ok_or_else(|| format!("param '{key}' must be a non-negative integer, got {v}")),
        }
    }
}

/// Compiled-in evaluation logics a descriptor may reference by `kind`.
///
/// Nothing outside this table is ever executed; admission means "build one of
/// these with the descriptor's parameters".
#[derive(Clone, Default)]
pub struct StrategyCatalog {
    builders: HashMap<String, Builder>,
}

impl StrategyCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with the built-in logics registered.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register("momentum", |p| {
            Ok(Arc::new(MomentumStrategy::from_params(p)?) as Arc<dyn Strategy>)
        });
        catalog.register("orderbook_imbalance", |p| {
            Ok(Arc::new(OrderBookImbalanceStrategy::from_params(p)?) as Arc<dyn Strategy>)
        });
        catalog.register("rsi_reversion", |p| {
            Ok(Arc::new(RsiReversionStrategy::from_params(p)?) as Arc<dyn Strategy>)
        });
        catalog
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&LogicParams) -> Result<Arc<dyn Strategy>, String> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Arc::new(builder));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a fresh capability instance for `logic`.
    pub fn build(&self, logic: &LogicRef) -> Result<Arc<dyn Strategy>, String> {
        let builder = self
            .builders
            .get(&logic.kind)
            .ok_or_else(|| format!("unknown logic kind '{}'", logic.kind))?;
        builder(&LogicParams(&logic.params))
    }
}
