//! Generic entity instances and their change state

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use super::value::Value;

/// Change state of a tracked instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChangeState {
    #[default]
    Unchanged,
    Created,
    /// Names of the properties assigned since the last accepted state
    Updated(BTreeSet<String>),
    Deleted,
}

impl ChangeState {
    pub fn is_dirty(&self) -> bool {
        !matches!(self, ChangeState::Unchanged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChangeState::Unchanged => "unchanged",
            ChangeState::Created => "created",
            ChangeState::Updated(_) => "updated",
            ChangeState::Deleted => "deleted",
        }
    }
}

/// Target of a navigation link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityReference {
    /// Entity id or canonical path, relative to the service root or absolute
    Uri(String),
    /// Entity created earlier in the same change set
    ContentId(String),
}

impl EntityReference {
    /// Reference text as written into payloads
    pub fn as_link(&self) -> String {
        match self {
            EntityReference::Uri(uri) => uri.clone(),
            EntityReference::ContentId(id) => format!("${}", id),
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_link())
    }
}

/// Value of a navigation property on an instance
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationValue {
    /// Expanded single-valued navigation; `None` when the server sent null
    Entity(Option<Box<EntityInstance>>),
    /// Expanded collection-valued navigation
    Entities(Vec<EntityInstance>),
    /// Links to existing entities written as bind annotations
    Bind(Vec<EntityReference>),
}

/// An entity of any type, described by its qualified type name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityInstance {
    pub type_name: String,
    /// Absent keys mean "not present in the representation"; `Value::Null` is an explicit null
    pub properties: IndexMap<String, Value>,
    pub navigation: IndexMap<String, NavigationValue>,
    /// Properties the model does not declare, retained on request
    pub extras: IndexMap<String, Value>,
    pub etag: Option<String>,
    pub entity_id: Option<String>,
    pub state: ChangeState,
}

impl EntityInstance {
    /// A new instance intended for creation
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            state: ChangeState::Created,
            ..Default::default()
        }
    }

    /// An instance as read from the server
    pub fn unchanged(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Builder-style population, no change tracking
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_navigation(mut self, name: impl Into<String>, value: NavigationValue) -> Self {
        self.navigation.insert(name.into(), value);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Assign a property and record it in the changed set
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.mark_changed(&name);
        self.properties.insert(name, value.into());
    }

    /// Record a change made through direct field access
    pub fn mark_changed(&mut self, name: &str) {
        match &mut self.state {
            ChangeState::Unchanged => {
                self.state = ChangeState::Updated(BTreeSet::from([name.to_string()]));
            }
            ChangeState::Updated(changed) => {
                changed.insert(name.to_string());
            }
            ChangeState::Created | ChangeState::Deleted => {}
        }
    }

    /// Add a bind reference for a navigation property
    pub fn bind(&mut self, navigation: impl Into<String>, target: EntityReference) {
        let navigation = navigation.into();
        match self.navigation.get_mut(&navigation) {
            Some(NavigationValue::Bind(targets)) => {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            _ => {
                self.navigation
                    .insert(navigation, NavigationValue::Bind(vec![target]));
            }
        }
    }

    /// Bind references pending on this instance
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &EntityReference)> {
        self.navigation.iter().flat_map(|(name, nav)| match nav {
            NavigationValue::Bind(targets) => targets.iter().map(|t| (name.as_str(), t)).collect(),
            _ => Vec::new(),
        })
    }

    pub fn changed_properties(&self) -> Option<&BTreeSet<String>> {
        match &self.state {
            ChangeState::Updated(changed) => Some(changed),
            _ => None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Mark the current representation as persisted
    pub fn accept_changes(&mut self) {
        self.state = ChangeState::Unchanged;
        self.navigation
            .retain(|_, nav| !matches!(nav, NavigationValue::Bind(_)));
    }

    /// Take server-computed values from a response representation
    pub fn merge_from(&mut self, server: EntityInstance) {
        for (name, value) in server.properties {
            self.properties.insert(name, value);
        }
        for (name, value) in server.extras {
            self.extras.insert(name, value);
        }
        if server.etag.is_some() {
            self.etag = server.etag;
        }
        if server.entity_id.is_some() {
            self.entity_id = server.entity_id;
        }
        if !server.type_name.is_empty() {
            self.type_name = server.type_name;
        }
    }
}

/// Key values of an instance in declared key order
#[derive(Debug, Clone, PartialEq)]
pub struct EntityKey(pub Vec<(String, Value)>);

impl EntityKey {
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(vec![(name.into(), value.into())])
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for EntityKey {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_property_tracks_changes() {
        let mut customer = EntityInstance::unchanged("Demo.Services.Customer").with("Name", "Ann");
        assert!(!customer.is_dirty());

        customer.set_property("Name", "Bea");
        customer.set_property("Tier", Value::Null);
        let changed: Vec<_> = customer.changed_properties().unwrap().iter().cloned().collect();
        assert_eq!(changed, vec!["Name", "Tier"]);
    }

    #[test]
    fn test_created_state_is_not_downgraded() {
        let mut order = EntityInstance::new("Demo.Services.Order");
        order.set_property("OrderID", 1);
        assert_eq!(order.state, ChangeState::Created);
    }

    #[test]
    fn test_accept_changes_drops_binds() {
        let mut order = EntityInstance::new("Demo.Services.Order");
        order.bind("Customer", EntityReference::ContentId("1".into()));
        order.bind("Customer", EntityReference::ContentId("1".into()));
        assert_eq!(order.bindings().count(), 1);

        order.accept_changes();
        assert_eq!(order.state, ChangeState::Unchanged);
        assert_eq!(order.bindings().count(), 0);
    }

    #[test]
    fn test_merge_keeps_local_when_server_omits() {
        let mut local = EntityInstance::new("Demo.Services.Order").with("Total", 5);
        let server = EntityInstance::unchanged("Demo.Services.Order")
            .with("OrderID", 10)
            .with_etag("W/\"1\"");
        local.merge_from(server);
        assert_eq!(local.get("OrderID"), Some(&Value::Int32(10)));
        assert_eq!(local.get("Total"), Some(&Value::Int32(5)));
        assert_eq!(local.etag.as_deref(), Some("W/\"1\""));
    }
}
