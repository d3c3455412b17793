//! Property access capability shared by generic and typed entities

use crate::api::codec::{EntityInstance, NavigationValue, Value};

/// Property-level access to an entity
///
/// `set` records the property as changed; the owning context decides when
/// the change reaches the server.
pub trait EntityProxy {
    fn type_name(&self) -> &str;

    fn get(&self, name: &str) -> Option<&Value>;

    fn set(&mut self, name: &str, value: Value);

    fn navigate(&self, name: &str) -> Option<&NavigationValue>;

    /// Single expanded entity behind a navigation property
    fn navigate_one(&self, name: &str) -> Option<&EntityInstance> {
        match self.navigate(name)? {
            NavigationValue::Entity(Some(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Expanded entities behind a collection-valued navigation property
    fn navigate_many(&self, name: &str) -> &[EntityInstance] {
        match self.navigate(name) {
            Some(NavigationValue::Entities(entities)) => entities,
            _ => &[],
        }
    }
}

impl EntityProxy for EntityInstance {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.set_property(name, value);
    }

    fn navigate(&self, name: &str) -> Option<&NavigationValue> {
        self.navigation.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::codec::ChangeState;

    #[test]
    fn test_proxy_over_instance() {
        let order = EntityInstance::unchanged("Demo.Services.Order").with("OrderID", 1);
        let mut customer = EntityInstance::unchanged("Demo.Services.Customer")
            .with("CustomerID", 7)
            .with_navigation("Orders", NavigationValue::Entities(vec![order]));

        let proxy: &mut dyn EntityProxy = &mut customer;
        assert_eq!(proxy.type_name(), "Demo.Services.Customer");
        assert_eq!(proxy.navigate_many("Orders").len(), 1);
        assert!(proxy.navigate_one("Orders").is_none());
        assert!(proxy.navigate_many("Missing").is_empty());

        proxy.set("Name", Value::from("Ann"));
        assert_eq!(proxy.get("Name"), Some(&Value::from("Ann")));
        assert_eq!(
            customer.state,
            ChangeState::Updated(["Name".to_string()].into_iter().collect())
        );
    }
}
