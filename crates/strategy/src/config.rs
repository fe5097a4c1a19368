use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, InterfaceDecl, LogicRef, Result, StrategyDescriptor};

/// Base strategies file (TOML), admitted at startup through the same
/// validation path as discovered descriptors.
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// id = "momentum-fast"
/// name = "Fast momentum"
/// kind = "momentum"
/// cooldown_seconds = 30
/// max_notional_per_trade = 5.0
///
/// [strategy.params]
/// window = 10
/// short_window = 2
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub id: String,
    /// Human-readable name shown in logs and the API.
    #[serde(default)]
    pub name: Option<String>,
    /// Catalog logic kind, e.g. "momentum".
    pub kind: String,
    /// Falls back to the configured default cooldown.
    #[serde(default)]
    pub cooldown_seconds: Option<i64>,
    #[serde(default)]
    pub max_notional_per_trade: f64,
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

impl StrategyFileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid strategy file: {e}")))
    }

    /// Load from a TOML file. A missing file yields an empty set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Convert every entry into a descriptor with id `config:<id>`.
    pub fn descriptors(&self) -> Result<Vec<StrategyDescriptor>> {
        self.strategies
            .iter()
            .map(StrategyConfig::to_descriptor)
            .collect()
    }
}

impl StrategyConfig {
    pub fn to_descriptor(&self) -> Result<StrategyDescriptor> {
        let params = self
            .params
            .iter()
            .map(|(k, v)| -> Result<(String, serde_json::Value)> {
                Ok((k.clone(), serde_json::to_value(v)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(StrategyDescriptor {
            descriptor_id: format!("config:{}", self.id),
            strategy_id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            logic: Some(LogicRef {
                kind: self.kind.clone(),
                params,
            }),
            interface: InterfaceDecl::evaluator(),
            cooldown_seconds: self.cooldown_seconds,
            max_notional_per_trade: self.max_notional_per_trade,
            hypothesis_confidence: 1.0,
            source: Some("config".to_string()),
        })
    }
}
