//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named, documented builder for a [`Config`];
//! a [`StaticPreFabMap`] groups prefabs for name lookup.

use crate::errors::{IrNextError, Result as IrResult};
use burn::config::Config;
use std::fmt::Debug;

/// Static builder for a well-known [`Config`].
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Build a new config.
    pub fn to_config(&self) -> C {
        (self.builder)()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("StaticPreFabConfig<{type_name}>"));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle.field("config", &self.to_config());
        }

        handle.finish()
    }
}

/// A named collection of [`StaticPreFabConfig`]s.
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug,
{
    /// Name of the collection.
    pub name: &'static str,

    /// Description of the collection.
    pub description: &'static str,

    /// The prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug,
{
    /// Names of every prefab, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Look up a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<&'static StaticPreFabConfig<C>> {
        self.items.iter().copied().find(|item| item.name == name)
    }

    /// Look up a prefab by name.
    ///
    /// # Errors
    ///
    /// [`IrNextError::UnrecognizedConfiguration`] for unknown names.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> IrResult<&'static StaticPreFabConfig<C>> {
        self.lookup_prefab(name)
            .ok_or_else(|| IrNextError::unrecognized("prefab", format!("{}/{name}", self.name)))
    }
}

impl<C> Debug for StaticPreFabMap<C>
where
    C: 'static + Config + Debug,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StaticPreFabMap")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("items", &self.items)
            .finish()
    }
}
