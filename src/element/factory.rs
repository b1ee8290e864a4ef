//! Element registry for creating elements by factory name.
//!
//! The registry is an explicit value handed to whoever builds pipelines
//! (see [`parse_launch`](crate::launch::parse_launch)); there is no global
//! plugin table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::elements::{FakeSink, FakeSrc, Identity, Queue, Tee};
use crate::error::{Error, Result};

use super::{Element, ElementImpl, Properties};

/// Constructor stored in the registry: element name and construction
/// properties in, element out.
pub type ElementConstructor = fn(&str, &Properties) -> Result<Arc<Element>>;

/// Registry of element constructors.
pub struct ElementRegistry {
    constructors: HashMap<String, ElementConstructor>,
    counters: Mutex<HashMap<String, u32>>,
}

impl ElementRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with `fakesrc`, `fakesink`, `identity`, `queue` and `tee`.
    pub fn with_core_elements() -> Self {
        let mut registry = Self::new();
        registry.register("fakesrc", construct::<FakeSrc>);
        registry.register("fakesink", construct::<FakeSink>);
        registry.register("identity", construct::<Identity>);
        registry.register("queue", construct::<Queue>);
        registry.register("tee", construct::<Tee>);
        registry
    }

    /// Register a constructor, replacing any previous one of that name.
    pub fn register(&mut self, factory: &str, constructor: ElementConstructor) {
        self.constructors.insert(factory.to_string(), constructor);
    }

    /// Create an element.
    ///
    /// The name is taken from the `name` property, else from `name`, else
    /// generated as the factory name followed by a per-factory counter.
    pub fn make(&self, factory: &str, name: Option<&str>, properties: &Properties) -> Result<Arc<Element>> {
        let constructor = self
            .constructors
            .get(factory)
            .ok_or_else(|| Error::NoSuchFactory(factory.to_string()))?;

        let mut properties = properties.clone();
        let name = match (properties.remove("name"), name) {
            (Some(value), _) => value.as_string(),
            (None, Some(name)) => name.to_string(),
            (None, None) => self.next_name(factory),
        };
        debug!(factory, element = %name, "make element");
        constructor(&name, &properties)
    }

    fn next_name(&self, factory: &str) -> String {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(factory.to_string()).or_insert(0);
        let name = format!("{factory}{counter}");
        *counter += 1;
        name
    }

    /// Check if a factory is registered.
    pub fn is_registered(&self, factory: &str) -> bool {
        self.constructors.contains_key(factory)
    }

    /// Registered factory names, sorted.
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::with_core_elements()
    }
}

/// Generic constructor: default implementation plus properties.
pub fn construct<T: ElementImpl + Default>(name: &str, properties: &Properties) -> Result<Arc<Element>> {
    let element = Element::new(name, T::default())?;
    for (key, value) in properties {
        element.set_property(key, value.clone())?;
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PropertyValue;

    #[test]
    fn test_core_factories() {
        let registry = ElementRegistry::with_core_elements();
        assert_eq!(
            registry.factory_names(),
            ["fakesink", "fakesrc", "identity", "queue", "tee"]
        );
        assert!(registry.is_registered("queue"));
        assert!(!registry.is_registered("filesrc"));
    }

    #[test]
    fn test_generated_names() {
        let registry = ElementRegistry::with_core_elements();
        let a = registry.make("identity", None, &Properties::new()).unwrap();
        let b = registry.make("identity", None, &Properties::new()).unwrap();
        let c = registry.make("identity", Some("mine"), &Properties::new()).unwrap();
        assert_eq!(a.name(), "identity0");
        assert_eq!(b.name(), "identity1");
        assert_eq!(c.name(), "mine");

        let mut props = Properties::new();
        props.insert("name".into(), PropertyValue::from("named"));
        let d = registry.make("identity", Some("ignored"), &props).unwrap();
        assert_eq!(d.name(), "named");
    }

    #[test]
    fn test_unknown_factory_and_property() {
        let registry = ElementRegistry::with_core_elements();
        assert!(matches!(
            registry.make("nope", None, &Properties::new()),
            Err(Error::NoSuchFactory(_))
        ));

        let mut props = Properties::new();
        props.insert("bogus".into(), PropertyValue::from(1));
        assert!(matches!(
            registry.make("fakesink", None, &props),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_custom_constructor() {
        fn make_bin(name: &str, _props: &Properties) -> Result<Arc<Element>> {
            crate::element::Bin::create(name)
        }
        let mut registry = ElementRegistry::new();
        registry.register("bin", make_bin);
        let bin = registry.make("bin", None, &Properties::new()).unwrap();
        assert!(bin.as_bin().is_some());
        assert_eq!(bin.name(), "bin0");
    }
}
