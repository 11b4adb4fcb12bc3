use std::collections::BTreeMap;

use crate::cpu::acc8;
use crate::{ConfigError, Device, DeviceParams};

/// Builds a device instance from its construction parameters.
pub type DeviceConstructor = Box<dyn Fn(&DeviceParams) -> Result<Box<dyn Device>, ConfigError>>;

/// Maps device type names to constructors.
///
/// The concrete implementation is chosen by name at construction time; the
/// rest of the engine only sees `dyn Device`.
#[derive(Default)]
pub struct DeviceRegistry {
    constructors: BTreeMap<String, DeviceConstructor>,
}

impl DeviceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in device types.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(acc8::TYPE_NAME, acc8::Acc8::construct);
        registry
    }

    /// Registers (or replaces) a constructor.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(&DeviceParams) -> Result<Box<dyn Device>, ConfigError> + 'static,
    {
        self.constructors
            .insert(type_name.into(), Box::new(constructor));
    }

    /// Returns `true` when `type_name` is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiates a device of type `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownDeviceType`] for unregistered names, or
    /// whatever the constructor reports.
    pub fn create(
        &self,
        type_name: &str,
        params: &DeviceParams,
    ) -> Result<Box<dyn Device>, ConfigError> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| ConfigError::UnknownDeviceType(type_name.to_owned()))?;
        constructor(params)
    }
}

impl core::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceRegistry;
    use crate::{ClockRate, ConfigError, DeviceParams};

    fn params() -> DeviceParams {
        DeviceParams {
            tag: "maincpu".into(),
            clock: ClockRate::from_mhz(1),
            parent: None,
        }
    }

    #[test]
    fn builtin_registry_constructs_acc8() {
        let registry = DeviceRegistry::with_builtin();
        assert!(registry.contains("acc8"));
        let device = registry.create("acc8", &params()).expect("acc8 constructs");
        assert!(device.execution_unit_ref().is_some());
    }

    #[test]
    fn unknown_types_are_configuration_errors() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            registry.create("z80", &params()).map(|_| ()),
            Err(ConfigError::UnknownDeviceType("z80".into()))
        );
    }
}
