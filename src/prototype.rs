//! Prototype instances and kind registrations
//!
//! Every kind is registered with a schema descriptor and a factory closure
//! that turns a composed mapping into a typed instance. Typed kinds get a
//! serde-backed factory from [`KindRegistration::typed`]; manifest-declared
//! kinds use [`DynamicPrototype`], which keeps the composed mapping as-is.

use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{PrototypeError, Result};
use crate::node::{DataNode, Mapping};
use crate::registry::KindRegistry;
use crate::schema::KindSchema;

/// Access to `Any` through a trait object
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An instantiated, read-only prototype
pub trait Prototype: AsAny + Send + Sync + fmt::Debug {
    /// Identifier of this prototype within its kind
    fn id(&self) -> &str;

    /// Runs once after instantiation, before the instance becomes visible.
    ///
    /// Kinds with a lower load priority are fully resolved at this point.
    fn after_instantiate(&mut self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Builds an instance from a composed mapping (schema defaults applied)
pub type PrototypeFactory = Arc<dyn Fn(&Mapping) -> Result<Box<dyn Prototype>> + Send + Sync>;

/// Downcast a shared instance to its concrete type
pub fn downcast<T: Prototype + 'static>(instance: &Arc<dyn Prototype>) -> Option<&T> {
    // Deref first so the vtable's `as_any` is used, not the Arc's own
    instance.as_ref().as_any().downcast_ref::<T>()
}

/// Schema plus factory for one kind
#[derive(Clone)]
pub struct KindRegistration {
    pub schema: KindSchema,
    pub factory: PrototypeFactory,
}

impl fmt::Debug for KindRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistration")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl KindRegistration {
    pub fn new(schema: KindSchema, factory: PrototypeFactory) -> Self {
        Self { schema, factory }
    }

    /// Registration whose factory deserializes the composed mapping into `T`
    pub fn typed<T>(schema: KindSchema) -> Self
    where
        T: Prototype + DeserializeOwned + 'static,
    {
        let factory: PrototypeFactory = Arc::new(|data: &Mapping| {
            let instance: T = serde_json::from_value(DataNode::Object(data.clone()))?;
            Ok(Box::new(instance) as Box<dyn Prototype>)
        });
        Self { schema, factory }
    }

    /// Registration that stores the composed mapping untyped
    pub fn dynamic(schema: KindSchema) -> Self {
        let kind = schema.name.clone();
        let id_field = schema.id_field.clone();
        let factory: PrototypeFactory = Arc::new(move |data: &Mapping| {
            let id = data
                .get(&id_field)
                .and_then(DataNode::as_str)
                .ok_or_else(|| PrototypeError::MissingField {
                    kind: kind.clone(),
                    field: id_field.clone(),
                    location: crate::node::SourceLocation::in_string(0, 0),
                })?;
            Ok(Box::new(DynamicPrototype {
                id: id.to_string(),
                data: data.clone(),
            }) as Box<dyn Prototype>)
        });
        Self { schema, factory }
    }
}

/// Supplies kind registrations to the manager
pub trait SchemaProvider {
    fn registrations(&self) -> Result<Vec<KindRegistration>>;

    /// Kinds whose records are skipped silently
    fn ignored_kinds(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Untyped instance: the composed mapping of a record
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicPrototype {
    pub id: String,
    pub data: Mapping,
}

impl DynamicPrototype {
    pub fn get(&self, field: &str) -> Option<&DataNode> {
        self.data.get(field)
    }
}

impl Prototype for DynamicPrototype {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Read access handed to post-instantiation hooks
pub struct HookContext<'a> {
    kind: &'a str,
    registry: &'a KindRegistry,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(kind: &'a str, registry: &'a KindRegistry) -> Self {
        Self { kind, registry }
    }

    /// Kind of the instance being built
    pub fn kind(&self) -> &str {
        self.kind
    }

    pub fn has_index(&self, kind: &str, id: &str) -> bool {
        self.try_index(kind, id).is_some()
    }

    pub fn try_index(&self, kind: &str, id: &str) -> Option<&Arc<dyn Prototype>> {
        self.registry.kind(kind)?.instances.get(id)
    }

    /// Composed mapping of any record composed so far, abstract ones included
    pub fn composed(&self, kind: &str, id: &str) -> Option<&Mapping> {
        self.registry.kind(kind)?.composed.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Widget {
        id: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Prototype for Widget {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn mapping(value: DataNode) -> Mapping {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_typed_factory_and_downcast() {
        let registration = KindRegistration::typed::<Widget>(KindSchema::new("widget"));
        let data = mapping(json!({"type": "widget", "id": "A", "tags": ["x"]}));

        let instance: Arc<dyn Prototype> = Arc::from((registration.factory)(&data).unwrap());
        assert_eq!(instance.id(), "A");

        let widget = downcast::<Widget>(&instance).unwrap();
        assert_eq!(widget.tags, vec!["x".to_string()]);
        assert!(downcast::<DynamicPrototype>(&instance).is_none());
    }

    #[test]
    fn test_typed_factory_reports_bad_shape() {
        let registration = KindRegistration::typed::<Widget>(KindSchema::new("widget"));
        let data = mapping(json!({"id": "A", "tags": "not-a-list"}));
        assert!((registration.factory)(&data).is_err());
    }

    #[test]
    fn test_dynamic_factory_keeps_mapping() {
        let registration = KindRegistration::dynamic(KindSchema::new("sound"));
        let data = mapping(json!({"id": "boom", "volume": 3}));

        let instance: Arc<dyn Prototype> = Arc::from((registration.factory)(&data).unwrap());
        let dynamic = downcast::<DynamicPrototype>(&instance).unwrap();
        assert_eq!(dynamic.get("volume"), Some(&json!(3)));
    }

    #[test]
    fn test_dynamic_factory_requires_id() {
        let registration = KindRegistration::dynamic(KindSchema::new("sound"));
        let data = mapping(json!({"volume": 3}));
        assert!(matches!(
            (registration.factory)(&data),
            Err(PrototypeError::MissingField { .. })
        ));
    }
}
