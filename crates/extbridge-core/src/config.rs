//! Bridge configuration.

use rustc_hash::FxHashMap;

/// Engine initialization phases, in the order the engine enters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum InitializationLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitializationLevel {
    pub fn from_usize(value: usize) -> Option<Self> {
        match value {
            0 => Some(InitializationLevel::Core),
            1 => Some(InitializationLevel::Servers),
            2 => Some(InitializationLevel::Scene),
            3 => Some(InitializationLevel::Editor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeProperty {
    /// Level at which extension classes are registered with the engine.
    MinimumInitializationLevel,
    /// Abort the process when a contract violation reaches a callback boundary.
    AbortOnContractViolation,
    /// Log every outbound call and inbound virtual at trace level.
    TraceCalls,
    /// Register extension classes as exposed to the editor and scripts.
    ExposeClasses,
}

impl BridgeProperty {
    pub fn default_value(&self) -> usize {
        match self {
            BridgeProperty::MinimumInitializationLevel => InitializationLevel::Scene as usize,
            BridgeProperty::AbortOnContractViolation => 1,
            BridgeProperty::TraceCalls => 0,
            BridgeProperty::ExposeClasses => 1,
        }
    }
}

/// Property overrides on top of the defaults.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    overrides: FxHashMap<BridgeProperty, usize>,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: BridgeProperty) -> usize {
        self.overrides
            .get(&property)
            .copied()
            .unwrap_or_else(|| property.default_value())
    }

    pub fn set(&mut self, property: BridgeProperty, value: usize) -> &mut Self {
        self.overrides.insert(property, value);
        self
    }

    pub fn with(mut self, property: BridgeProperty, value: usize) -> Self {
        self.set(property, value);
        self
    }

    pub fn flag(&self, property: BridgeProperty) -> bool {
        self.get(property) != 0
    }

    /// The configured registration level. Out-of-range values fall back to the default.
    pub fn minimum_level(&self) -> InitializationLevel {
        InitializationLevel::from_usize(self.get(BridgeProperty::MinimumInitializationLevel))
            .unwrap_or(InitializationLevel::Scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::new();
        assert_eq!(config.minimum_level(), InitializationLevel::Scene);
        assert!(config.flag(BridgeProperty::AbortOnContractViolation));
        assert!(!config.flag(BridgeProperty::TraceCalls));
    }

    #[test]
    fn overrides() {
        let config = BridgeConfig::new()
            .with(BridgeProperty::MinimumInitializationLevel, InitializationLevel::Core as usize)
            .with(BridgeProperty::TraceCalls, 1);
        assert_eq!(config.minimum_level(), InitializationLevel::Core);
        assert!(config.flag(BridgeProperty::TraceCalls));
    }

    #[test]
    fn invalid_level_falls_back() {
        let config = BridgeConfig::new().with(BridgeProperty::MinimumInitializationLevel, 99);
        assert_eq!(config.minimum_level(), InitializationLevel::Scene);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(InitializationLevel::Core < InitializationLevel::Scene);
        assert!(InitializationLevel::Editor > InitializationLevel::Servers);
    }
}
