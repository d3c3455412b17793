//! Entity data model built from a service's `$metadata` document
//!
//! [`MetadataModel::parse`] reads the CSDL document and resolves it into an
//! immutable model. The model is shared behind an `Arc` by every codec,
//! request builder and context of one service, and all lookups take `&self`.

pub mod models;
mod parser;
mod resolver;

use std::collections::HashMap;

use indexmap::IndexMap;

pub use models::{
    Cardinality, ComplexType, EntityContainer, EntitySet, EntityType, EnumMember, EnumType,
    NavigationProperty, Operation, OperationImport, OperationKind, Parameter, PrimitiveType,
    Property, SchemaInfo, Singleton, TypeRef,
};

use crate::api::constants::ODataVersion;
use crate::api::error::{MetadataError, UnknownTypeError};

/// Resolved model of one service
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataModel {
    pub(crate) version: ODataVersion,
    pub(crate) schemas: Vec<SchemaInfo>,
    pub(crate) aliases: HashMap<String, String>,
    pub(crate) entity_types: IndexMap<String, EntityType>,
    pub(crate) complex_types: IndexMap<String, ComplexType>,
    pub(crate) enum_types: IndexMap<String, EnumType>,
    pub(crate) operations: IndexMap<String, Vec<Operation>>,
    pub(crate) containers: Vec<EntityContainer>,
}

impl MetadataModel {
    /// Parse and resolve a metadata document
    pub fn parse(document: &str) -> Result<Self, MetadataError> {
        let raw = parser::parse_document(document)?;
        let model = resolver::resolve(raw)?;
        log::debug!(
            "Metadata model ready ({}): {} entity types, {} containers",
            model.version,
            model.entity_types.len(),
            model.containers.len()
        );
        Ok(model)
    }

    /// Protocol version the document was written for
    pub fn version(&self) -> ODataVersion {
        self.version
    }

    pub fn schemas(&self) -> &[SchemaInfo] {
        &self.schemas
    }

    /// Expand a schema alias prefix into the full namespace
    pub fn normalize_name(&self, name: &str) -> String {
        let name = name.trim().trim_start_matches('#');
        if let Some((prefix, rest)) = name.rsplit_once('.')
            && let Some(namespace) = self.aliases.get(prefix)
        {
            return format!("{}.{}", namespace, rest);
        }
        name.to_string()
    }

    /// Resolve a type name as written in documents or payload annotations
    ///
    /// Accepts qualified or alias-qualified names, `Edm.*` primitives and
    /// `Collection(...)` wrappers. V4 payloads may omit the `Edm.` prefix for
    /// primitives; those are accepted as well.
    pub fn resolve_type(&self, name: &str) -> Result<TypeRef, UnknownTypeError> {
        let name = name.trim().trim_start_matches('#');
        if let Some(inner) = name
            .strip_prefix("Collection(")
            .and_then(|n| n.strip_suffix(')'))
        {
            return Ok(TypeRef::Collection(Box::new(self.resolve_type(inner)?)));
        }

        if let Some(primitive) = PrimitiveType::from_edm_name(name) {
            return Ok(TypeRef::Primitive(primitive));
        }

        let qualified = self.normalize_name(name);
        if self.entity_types.contains_key(&qualified) {
            Ok(TypeRef::Entity(qualified))
        } else if self.complex_types.contains_key(&qualified) {
            Ok(TypeRef::Complex(qualified))
        } else if self.enum_types.contains_key(&qualified) {
            Ok(TypeRef::Enum(qualified))
        } else if !qualified.contains('.') {
            PrimitiveType::from_edm_name(&format!("Edm.{}", qualified))
                .map(TypeRef::Primitive)
                .ok_or_else(|| UnknownTypeError::new(name))
        } else {
            Err(UnknownTypeError::new(name))
        }
    }

    pub fn resolve_entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(&self.normalize_name(name))
    }

    pub fn resolve_complex_type(&self, name: &str) -> Option<&ComplexType> {
        self.complex_types.get(&self.normalize_name(name))
    }

    pub fn resolve_enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enum_types.get(&self.normalize_name(name))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }

    pub fn complex_types(&self) -> impl Iterator<Item = &ComplexType> {
        self.complex_types.values()
    }

    pub fn enum_types(&self) -> impl Iterator<Item = &EnumType> {
        self.enum_types.values()
    }

    pub fn containers(&self) -> &[EntityContainer] {
        &self.containers
    }

    /// The container whose members are addressed without qualification
    pub fn default_container(&self) -> Option<&EntityContainer> {
        self.containers
            .iter()
            .find(|c| c.is_default)
            .or_else(|| self.containers.first())
    }

    /// Look up `Set` in the default container, or `Container.Set` in any
    pub fn resolve_entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.container_member(name, |c, n| c.entity_sets.get(n))
    }

    pub fn resolve_singleton(&self, name: &str) -> Option<&Singleton> {
        self.container_member(name, |c, n| c.singletons.get(n))
    }

    pub fn resolve_operation_import(&self, name: &str) -> Option<&OperationImport> {
        self.container_member(name, |c, n| c.operation_imports.get(n))
    }

    fn container_member<'a, T>(
        &'a self,
        name: &str,
        lookup: impl Fn(&'a EntityContainer, &str) -> Option<&'a T>,
    ) -> Option<&'a T> {
        if let Some(found) = self.default_container().and_then(|c| lookup(c, name)) {
            return Some(found);
        }
        let (container, member) = name.rsplit_once('.')?;
        let container = container.rsplit('.').next().unwrap_or(container);
        self.containers
            .iter()
            .filter(|c| c.name == container)
            .find_map(|c| lookup(c, member))
    }

    /// Overloads of a schema-level function or action
    pub fn operations(&self, name: &str) -> &[Operation] {
        self.operations
            .get(&self.normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Operations bound to `entity_type` or one of its base types
    pub fn bound_operations(&self, entity_type: &str) -> Vec<&Operation> {
        self.operations
            .values()
            .flatten()
            .filter(|op| match op.binding_type().map(TypeRef::element) {
                Some(TypeRef::Entity(bound)) => self.is_derived_from(entity_type, bound),
                _ => false,
            })
            .collect()
    }

    /// Property of an entity type, inherited members included
    pub fn entity_property(&self, entity_type: &str, name: &str) -> Option<&Property> {
        self.resolve_entity_type(entity_type)?.property(name)
    }

    /// Key properties in declared key order
    pub fn key_properties(&self, entity_type: &str) -> Vec<&Property> {
        self.resolve_entity_type(entity_type)
            .map(EntityType::key_properties)
            .unwrap_or_default()
    }

    /// Whether `type_name` equals `base` or derives from it, for entity or complex types
    pub fn is_derived_from(&self, type_name: &str, base: &str) -> bool {
        let base = self.normalize_name(base);
        let mut current = Some(self.normalize_name(type_name));
        let mut hops = 0;
        while let Some(name) = current {
            if name == base {
                return true;
            }
            hops += 1;
            if hops > self.entity_types.len() + self.complex_types.len() {
                return false;
            }
            current = match self.entity_types.get(&name) {
                Some(t) => t.base_type.clone(),
                None => self
                    .complex_types
                    .get(&name)
                    .and_then(|t| t.base_type.clone()),
            };
        }
        false
    }

    /// Entity types deriving from `base`, the base itself included
    pub fn derived_entity_types(&self, base: &str) -> Vec<&EntityType> {
        self.entity_types
            .iter()
            .filter(|(name, _)| self.is_derived_from(name, base))
            .map(|(_, t)| t)
            .collect()
    }

    /// Entity set reached by following `navigation` from a member of `entity_set`
    pub fn navigation_target_set(&self, entity_set: &str, navigation: &str) -> Option<&EntitySet> {
        let set = self.resolve_entity_set(entity_set)?;
        let target = set.navigation_bindings.iter().find_map(|(path, target)| {
            let last = path.rsplit('/').next().unwrap_or(path);
            (last == navigation).then_some(target)
        })?;
        let target = target.rsplit('/').next().unwrap_or(target);
        self.resolve_entity_set(target)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const V4_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Demo.Services" Alias="Demo" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Customer">
        <Key><PropertyRef Name="CustomerID"/></Key>
        <Property Name="CustomerID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String" MaxLength="100"/>
        <Property Name="Balance" Type="Edm.Decimal" Precision="18" Scale="4"/>
        <Property Name="Since" Type="Edm.DateTimeOffset" Precision="7"/>
        <Property Name="Address" Type="Demo.Address"/>
        <Property Name="Emails" Type="Collection(Edm.String)"/>
        <Property Name="Tier" Type="Demo.Tier"/>
        <Property Name="Version" Type="Edm.Int64" ConcurrencyMode="Fixed"/>
        <NavigationProperty Name="Orders" Type="Collection(Demo.Order)" Partner="Customer"/>
      </EntityType>
      <EntityType Name="Order">
        <Key><PropertyRef Name="OrderID"/></Key>
        <Property Name="OrderID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Total" Type="Edm.Decimal" Scale="2"/>
        <Property Name="Placed" Type="Edm.Date"/>
        <Property Name="Token" Type="Edm.Guid"/>
        <NavigationProperty Name="Customer" Type="Demo.Customer" Partner="Orders"/>
      </EntityType>
      <EntityType Name="Store">
        <Key><PropertyRef Name="Region"/><PropertyRef Name="City"/></Key>
        <Property Name="Region" Type="Edm.String" Nullable="false"/>
        <Property Name="City" Type="Edm.String" Nullable="false"/>
        <Property Name="Opened" Type="Edm.TimeOfDay"/>
        <Property Name="Revenue" Type="Edm.Double"/>
      </EntityType>
      <EntityType Name="Person" Abstract="true">
        <Key><PropertyRef Name="PersonID"/></Key>
        <Property Name="PersonID" Type="Edm.Int64" Nullable="false"/>
        <Property Name="FirstName" Type="Edm.String"/>
      </EntityType>
      <EntityType Name="Employee" BaseType="Demo.Person">
        <Property Name="Photo" Type="Edm.Binary"/>
        <Property Name="Tenure" Type="Edm.Duration"/>
        <Property Name="Active" Type="Edm.Boolean"/>
        <Property Name="Rating" Type="Edm.Single"/>
        <Property Name="Level" Type="Edm.Byte"/>
        <Property Name="Delta" Type="Edm.Int16"/>
        <Property Name="Shift" Type="Edm.SByte"/>
      </EntityType>
      <ComplexType Name="Address">
        <Property Name="Street" Type="Edm.String"/>
        <Property Name="City" Type="Edm.String"/>
      </ComplexType>
      <ComplexType Name="GeoAddress" BaseType="Demo.Address">
        <Property Name="Latitude" Type="Edm.Double"/>
      </ComplexType>
      <EnumType Name="Tier">
        <Member Name="Bronze" Value="0"/>
        <Member Name="Silver" Value="1"/>
        <Member Name="Gold" Value="2"/>
      </EnumType>
      <Action Name="ResetBalances"/>
      <Action Name="Discount" IsBound="true">
        <Parameter Name="order" Type="Demo.Order"/>
        <Parameter Name="percent" Type="Edm.Int32" Nullable="false"/>
        <ReturnType Type="Demo.Order"/>
      </Action>
      <Function Name="TopCustomers">
        <Parameter Name="count" Type="Edm.Int32" Nullable="false"/>
        <ReturnType Type="Collection(Demo.Customer)"/>
      </Function>
      <EntityContainer Name="InMemoryEntities">
        <EntitySet Name="Customers" EntityType="Demo.Customer">
          <NavigationPropertyBinding Path="Orders" Target="Orders"/>
        </EntitySet>
        <EntitySet Name="Orders" EntityType="Demo.Order">
          <NavigationPropertyBinding Path="Customer" Target="Customers"/>
        </EntitySet>
        <EntitySet Name="Stores" EntityType="Demo.Store"/>
        <EntitySet Name="People" EntityType="Demo.Person"/>
        <Singleton Name="Boss" Type="Demo.Employee"/>
        <ActionImport Name="ResetBalances" Action="Demo.ResetBalances"/>
        <FunctionImport Name="TopCustomers" Function="Demo.TopCustomers" EntitySet="Customers"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    pub const V3_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx">
  <edmx:DataServices m:DataServiceVersion="3.0" xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
    <Schema Namespace="NorthwindModel" xmlns="http://schemas.microsoft.com/ado/2009/11/edm">
      <EntityType Name="Category">
        <Key><PropertyRef Name="CategoryID"/></Key>
        <Property Name="CategoryID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="CategoryName" Type="Edm.String" Nullable="false" MaxLength="15"/>
        <NavigationProperty Name="Products" Relationship="NorthwindModel.FK_Products_Categories" FromRole="Categories" ToRole="Products"/>
      </EntityType>
      <EntityType Name="Product">
        <Key><PropertyRef Name="ProductID"/></Key>
        <Property Name="ProductID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="ProductName" Type="Edm.String" Nullable="false" MaxLength="40"/>
        <Property Name="UnitPrice" Type="Edm.Decimal" Precision="19" Scale="4"/>
        <Property Name="Discontinued" Type="Edm.Boolean" Nullable="false"/>
        <Property Name="Modified" Type="Edm.DateTime" Precision="3"/>
        <Property Name="RowVersion" Type="Edm.Binary" ConcurrencyMode="Fixed"/>
        <NavigationProperty Name="Category" Relationship="NorthwindModel.FK_Products_Categories" FromRole="Products" ToRole="Categories"/>
      </EntityType>
      <Association Name="FK_Products_Categories">
        <End Role="Categories" Type="NorthwindModel.Category" Multiplicity="0..1"/>
        <End Role="Products" Type="NorthwindModel.Product" Multiplicity="*"/>
      </Association>
    </Schema>
    <Schema Namespace="ODataWebV3.Northwind.Model" xmlns="http://schemas.microsoft.com/ado/2009/11/edm">
      <EntityContainer Name="NorthwindEntities" m:IsDefaultEntityContainer="true">
        <EntitySet Name="Categories" EntityType="NorthwindModel.Category"/>
        <EntitySet Name="Products" EntityType="NorthwindModel.Product"/>
        <AssociationSet Name="FK_Products_Categories" Association="NorthwindModel.FK_Products_Categories">
          <End Role="Categories" EntitySet="Categories"/>
          <End Role="Products" EntitySet="Products"/>
        </AssociationSet>
        <FunctionImport Name="DiscontinueProducts" m:HttpMethod="POST">
          <Parameter Name="categoryId" Type="Edm.Int32" Nullable="false"/>
        </FunctionImport>
        <FunctionImport Name="ProductsByName" EntitySet="Products" ReturnType="Collection(NorthwindModel.Product)" m:HttpMethod="GET">
          <Parameter Name="name" Type="Edm.String"/>
        </FunctionImport>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::{V3_METADATA, V4_METADATA};
    use super::*;

    fn v4() -> MetadataModel {
        MetadataModel::parse(V4_METADATA).unwrap()
    }

    #[test]
    fn test_resolve_twice_is_deterministic() {
        let model = v4();
        let first = model.resolve_entity_type("Demo.Customer").cloned();
        let second = model.resolve_entity_type("Demo.Services.Customer").cloned();
        assert!(first.is_some());
        assert_eq!(first, second);

        let again = v4();
        assert_eq!(model, again);
        assert_eq!(
            model.resolve_type("Collection(Demo.Order)"),
            again.resolve_type("Collection(Demo.Services.Order)")
        );
    }

    #[test]
    fn test_forward_reference_and_partner() {
        let model = v4();
        let customer = model.resolve_entity_type("Demo.Customer").unwrap();
        let orders = customer.navigation("Orders").unwrap();
        assert_eq!(orders.target, "Demo.Services.Order");
        assert_eq!(orders.cardinality, Cardinality::Many);
        assert_eq!(orders.partner.as_deref(), Some("Customer"));
    }

    #[test]
    fn test_inherited_key_and_properties() {
        let model = v4();
        let employee = model.resolve_entity_type("Demo.Employee").unwrap();
        assert_eq!(employee.key, vec!["PersonID"]);
        assert_eq!(employee.properties[0].name, "PersonID");
        assert!(!employee.properties[0].nullable);
        assert!(model.is_derived_from("Demo.Employee", "Demo.Person"));
        assert!(!model.is_derived_from("Demo.Person", "Demo.Employee"));
        assert!(model.is_derived_from("Demo.GeoAddress", "Demo.Address"));
        assert_eq!(model.derived_entity_types("Demo.Person").len(), 2);
    }

    #[test]
    fn test_composite_key_order_preserved() {
        let model = v4();
        let keys: Vec<_> = model
            .key_properties("Demo.Store")
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(keys, vec!["Region", "City"]);
    }

    #[test]
    fn test_container_lookups() {
        let model = v4();
        let set = model.resolve_entity_set("Customers").unwrap();
        assert_eq!(set.entity_type, "Demo.Services.Customer");
        assert!(model.resolve_entity_set("InMemoryEntities.Orders").is_some());
        assert!(model.resolve_entity_set("Nope").is_none());

        assert_eq!(
            model.resolve_singleton("Boss").unwrap().entity_type,
            "Demo.Services.Employee"
        );

        let reset = model.resolve_operation_import("ResetBalances").unwrap();
        assert_eq!(reset.kind, OperationKind::Action);
        let top = model.resolve_operation_import("TopCustomers").unwrap();
        assert_eq!(top.kind, OperationKind::Function);
        assert_eq!(top.parameters[0].name, "count");

        assert_eq!(
            model.navigation_target_set("Customers", "Orders").unwrap().name,
            "Orders"
        );
        assert_eq!(model.bound_operations("Demo.Order").len(), 1);
    }

    #[test]
    fn test_resolve_type_variants() {
        let model = v4();
        assert_eq!(
            model.resolve_type("Edm.Int64").unwrap(),
            TypeRef::Primitive(PrimitiveType::Int64)
        );
        assert_eq!(
            model.resolve_type("#Demo.Tier").unwrap(),
            TypeRef::Enum("Demo.Services.Tier".into())
        );
        assert_eq!(
            model.resolve_type("Int32").unwrap(),
            TypeRef::Primitive(PrimitiveType::Int32)
        );
        assert!(model.resolve_type("Demo.Unknown").is_err());
    }

    #[test]
    fn test_v3_associations() {
        let model = MetadataModel::parse(V3_METADATA).unwrap();
        assert_eq!(model.version(), ODataVersion::V3);

        let category = model.resolve_entity_type("NorthwindModel.Category").unwrap();
        let products = category.navigation("Products").unwrap();
        assert_eq!(products.cardinality, Cardinality::Many);
        assert_eq!(products.partner.as_deref(), Some("Category"));

        let product = model.resolve_entity_type("NorthwindModel.Product").unwrap();
        let nav = product.navigation("Category").unwrap();
        assert_eq!(nav.cardinality, Cardinality::One);
        assert!(nav.nullable);
        assert!(product.property("RowVersion").unwrap().concurrency_token);

        assert_eq!(
            model.navigation_target_set("Products", "Category").unwrap().name,
            "Categories"
        );

        let discontinue = model.resolve_operation_import("DiscontinueProducts").unwrap();
        assert_eq!(discontinue.kind, OperationKind::Action);
        let by_name = model.resolve_operation_import("ProductsByName").unwrap();
        assert_eq!(by_name.kind, OperationKind::Function);
        assert!(by_name.return_type.as_ref().unwrap().is_collection());
    }

    #[test]
    fn test_model_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MetadataModel>();
    }
}
