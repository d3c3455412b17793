//! Two-pass EDM resolution
//!
//! Pass one registers every declaration by qualified name so that later
//! declarations can be referenced freely. Pass two resolves type references,
//! flattens inheritance, validates keys and partners, and binds container
//! members to their types.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use super::models::*;
use super::parser::{
    RawAssociation, RawComplexType, RawContainer, RawDocument, RawEntityType, RawNavigation,
    RawParameter, RawProperty,
};
use super::MetadataModel;
use crate::api::constants::ODataVersion;
use crate::api::error::MetadataConsistencyError;

type Result<T> = std::result::Result<T, MetadataConsistencyError>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeclKind {
    Entity,
    Complex,
    Enum,
    Definition,
}

struct Registry<'a> {
    version: ODataVersion,
    aliases: HashMap<String, String>,
    kinds: HashMap<String, DeclKind>,
    entity_decls: HashMap<String, (&'a str, &'a RawEntityType)>,
    complex_decls: HashMap<String, (&'a str, &'a RawComplexType)>,
    definitions: HashMap<String, &'a str>,
    associations: HashMap<String, &'a RawAssociation>,
    /// Container name -> names of its sets and singletons
    container_members: HashMap<String, HashSet<String>>,
}

impl<'a> Registry<'a> {
    /// Expand a schema alias into its namespace
    fn qualify(&self, name: &str) -> String {
        if let Some((prefix, rest)) = name.rsplit_once('.')
            && let Some(namespace) = self.aliases.get(prefix)
        {
            return format!("{}.{}", namespace, rest);
        }
        name.to_string()
    }

    fn type_ref(&self, raw: &str, referenced_by: &str) -> Result<TypeRef> {
        let raw = raw.trim();
        if let Some(inner) = raw
            .strip_prefix("Collection(")
            .and_then(|r| r.strip_suffix(')'))
        {
            return Ok(TypeRef::Collection(Box::new(
                self.type_ref(inner, referenced_by)?,
            )));
        }

        if raw.starts_with("Edm.") {
            return PrimitiveType::from_edm_name(raw)
                .map(TypeRef::Primitive)
                .ok_or_else(|| dangling("primitive type", raw, referenced_by));
        }

        let qualified = self.qualify(raw);
        match self.kinds.get(&qualified) {
            Some(DeclKind::Entity) => Ok(TypeRef::Entity(qualified)),
            Some(DeclKind::Complex) => Ok(TypeRef::Complex(qualified)),
            Some(DeclKind::Enum) => Ok(TypeRef::Enum(qualified)),
            Some(DeclKind::Definition) => {
                let underlying = self.definitions.get(&qualified).copied().unwrap_or_default();
                if !underlying.starts_with("Edm.") {
                    return Err(dangling("primitive type", underlying, &qualified));
                }
                self.type_ref(underlying, referenced_by)
            }
            None => Err(dangling("type", &qualified, referenced_by)),
        }
    }

    fn entity_ref(&self, raw: &str, referenced_by: &str) -> Result<String> {
        let qualified = self.qualify(raw.trim());
        match self.kinds.get(&qualified) {
            Some(DeclKind::Entity) => Ok(qualified),
            _ => Err(dangling("entity type", &qualified, referenced_by)),
        }
    }

    fn property(&self, owner: &str, raw: &RawProperty) -> Result<Property> {
        let referenced_by = format!("property '{}.{}'", owner, raw.name);
        Ok(Property {
            name: raw.name.clone(),
            type_ref: self.type_ref(&raw.type_name, &referenced_by)?,
            nullable: raw.nullable.unwrap_or(true),
            max_length: raw.max_length,
            precision: raw.precision,
            scale: raw.scale,
            concurrency_token: raw.concurrency_token,
            default_value: raw.default_value.clone(),
        })
    }

    fn parameters(&self, owner: &str, raw: &[RawParameter]) -> Result<Vec<Parameter>> {
        raw.iter()
            .map(|p| {
                Ok(Parameter {
                    name: p.name.clone(),
                    type_ref: self
                        .type_ref(&p.type_name, &format!("parameter '{}' of '{}'", p.name, owner))?,
                    nullable: p.nullable.unwrap_or(true),
                })
            })
            .collect()
    }

    /// Raw declarations of an entity type and its bases, most derived first
    fn raw_chain(&self, qualified: &str) -> Vec<&'a RawEntityType> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(qualified.to_string());
        while let Some(name) = current.take() {
            if !seen.insert(name.clone()) {
                break;
            }
            if let Some((_, decl)) = self.entity_decls.get(&name) {
                chain.push(*decl);
                current = decl.base_type.as_deref().map(|b| self.qualify(b));
            }
        }
        chain
    }

    fn navigation(&self, owner: &str, raw: &RawNavigation) -> Result<NavigationProperty> {
        let referenced_by = format!("navigation property '{}.{}'", owner, raw.name);

        if let Some(type_name) = &raw.type_name {
            let (target, cardinality) = match self.type_ref(type_name, &referenced_by)? {
                TypeRef::Entity(target) => (target, Cardinality::One),
                TypeRef::Collection(inner) => match *inner {
                    TypeRef::Entity(target) => (target, Cardinality::Many),
                    other => {
                        return Err(dangling("entity type", &other.type_name(), &referenced_by));
                    }
                },
                other => return Err(dangling("entity type", &other.type_name(), &referenced_by)),
            };
            return Ok(NavigationProperty {
                name: raw.name.clone(),
                target,
                cardinality,
                nullable: raw.nullable.unwrap_or(true),
                partner: raw.partner.clone(),
                contains_target: raw.contains_target,
            });
        }

        // V3: the target end of the association defines type and multiplicity
        let relationship = self.qualify(raw.relationship.as_deref().unwrap_or_default());
        let association = self
            .associations
            .get(&relationship)
            .ok_or_else(|| dangling("association", &relationship, &referenced_by))?;
        let to_role = raw.to_role.as_deref().unwrap_or_default();
        let end = association
            .ends
            .iter()
            .find(|e| e.role == to_role)
            .ok_or_else(|| dangling("association role", to_role, &referenced_by))?;
        let target = self.entity_ref(&end.type_name, &referenced_by)?;
        let (cardinality, nullable) = match end.multiplicity.trim() {
            "*" => (Cardinality::Many, true),
            "1" => (Cardinality::One, false),
            _ => (Cardinality::One, true),
        };

        let partner = self.raw_chain(&target).into_iter().find_map(|decl| {
            decl.navigations
                .iter()
                .find(|n| {
                    n.relationship.as_deref().map(|r| self.qualify(r)) == Some(relationship.clone())
                        && n.from_role.as_deref() == Some(to_role)
                        && n.to_role.as_deref() == raw.from_role.as_deref()
                })
                .map(|n| n.name.clone())
        });

        Ok(NavigationProperty {
            name: raw.name.clone(),
            target,
            cardinality,
            nullable,
            partner,
            contains_target: false,
        })
    }
}

fn dangling(kind: &'static str, name: &str, referenced_by: &str) -> MetadataConsistencyError {
    MetadataConsistencyError::DanglingReference {
        kind,
        name: name.to_string(),
        referenced_by: referenced_by.to_string(),
    }
}

fn invalid_key(entity_type: &str, reason: String) -> MetadataConsistencyError {
    MetadataConsistencyError::InvalidKey {
        entity_type: entity_type.to_string(),
        reason,
    }
}

/// Build the resolved model from raw declarations
pub(super) fn resolve(raw: RawDocument) -> Result<MetadataModel> {
    let registry = register(&raw)?;

    let mut resolver = Resolver {
        registry: &registry,
        entities: HashMap::new(),
        complexes: HashMap::new(),
    };

    let mut entity_types = IndexMap::new();
    let mut complex_types = IndexMap::new();
    let mut enum_types = IndexMap::new();
    let mut operations: IndexMap<String, Vec<Operation>> = IndexMap::new();

    for schema in &raw.schemas {
        for decl in &schema.complex_types {
            let qualified = format!("{}.{}", schema.namespace, decl.name);
            let resolved = resolver.complex_type(&qualified, &mut Vec::new())?;
            complex_types.insert(qualified, resolved);
        }
        for decl in &schema.entity_types {
            let qualified = format!("{}.{}", schema.namespace, decl.name);
            let resolved = resolver.entity_type(&qualified, &mut Vec::new())?;
            entity_types.insert(qualified, resolved);
        }
        for decl in &schema.enum_types {
            let qualified = format!("{}.{}", schema.namespace, decl.name);
            enum_types.insert(qualified.clone(), resolve_enum(&schema.namespace, decl, &qualified)?);
        }
        for decl in &schema.operations {
            let qualified = format!("{}.{}", schema.namespace, decl.name);
            let return_type = match &decl.return_type {
                Some(rt) => Some(registry.type_ref(rt, &format!("return type of '{}'", qualified))?),
                None => None,
            };
            let operation = Operation {
                name: decl.name.clone(),
                namespace: schema.namespace.clone(),
                kind: if decl.is_action {
                    OperationKind::Action
                } else {
                    OperationKind::Function
                },
                is_bound: decl.is_bound,
                parameters: registry.parameters(&qualified, &decl.parameters)?,
                return_type,
            };
            if operation.is_bound && operation.parameters.is_empty() {
                return Err(dangling("binding parameter", &qualified, "bound operation"));
            }
            operations.entry(qualified).or_default().push(operation);
        }

        log::debug!(
            "Resolved schema {}: {} entity types, {} complex types, {} enum types, {} operations",
            schema.namespace,
            schema.entity_types.len(),
            schema.complex_types.len(),
            schema.enum_types.len(),
            schema.operations.len()
        );
    }

    check_partners(&entity_types)?;

    let mut containers = Vec::new();
    for schema in &raw.schemas {
        for container in &schema.containers {
            containers.push(resolve_container(
                &registry,
                &schema.namespace,
                container,
                &entity_types,
                &operations,
            )?);
        }
    }

    let schemas = raw
        .schemas
        .iter()
        .map(|s| SchemaInfo {
            namespace: s.namespace.clone(),
            alias: s.alias.clone(),
        })
        .collect();

    Ok(MetadataModel {
        version: raw.version,
        schemas,
        aliases: registry.aliases.clone(),
        entity_types,
        complex_types,
        enum_types,
        operations,
        containers,
    })
}

fn register(raw: &RawDocument) -> Result<Registry<'_>> {
    let mut registry = Registry {
        version: raw.version,
        aliases: HashMap::new(),
        kinds: HashMap::new(),
        entity_decls: HashMap::new(),
        complex_decls: HashMap::new(),
        definitions: HashMap::new(),
        associations: HashMap::new(),
        container_members: HashMap::new(),
    };

    for schema in &raw.schemas {
        if let Some(alias) = &schema.alias {
            registry
                .aliases
                .insert(alias.clone(), schema.namespace.clone());
        }
    }

    for schema in &raw.schemas {
        let ns = schema.namespace.as_str();
        let mut declare = |name: &str, kind: DeclKind| -> Result<String> {
            let qualified = format!("{}.{}", ns, name);
            if registry.kinds.insert(qualified.clone(), kind).is_some() {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "type",
                    name: qualified,
                });
            }
            Ok(qualified)
        };

        let mut entity_names = Vec::new();
        let mut complex_names = Vec::new();
        let mut definition_names = Vec::new();
        for decl in &schema.entity_types {
            entity_names.push((declare(&decl.name, DeclKind::Entity)?, decl));
        }
        for decl in &schema.complex_types {
            complex_names.push((declare(&decl.name, DeclKind::Complex)?, decl));
        }
        for decl in &schema.enum_types {
            declare(&decl.name, DeclKind::Enum)?;
        }
        for decl in &schema.type_definitions {
            definition_names.push((declare(&decl.name, DeclKind::Definition)?, decl));
        }

        for (qualified, decl) in entity_names {
            registry.entity_decls.insert(qualified, (ns, decl));
        }
        for (qualified, decl) in complex_names {
            registry.complex_decls.insert(qualified, (ns, decl));
        }
        for (qualified, decl) in definition_names {
            registry.definitions.insert(qualified, decl.underlying.as_str());
        }

        for association in &schema.associations {
            let qualified = format!("{}.{}", ns, association.name);
            if registry
                .associations
                .insert(qualified.clone(), association)
                .is_some()
            {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "association",
                    name: qualified,
                });
            }
        }

        for container in &schema.containers {
            let mut members = HashSet::new();
            for name in container
                .entity_sets
                .iter()
                .map(|s| &s.name)
                .chain(container.singletons.iter().map(|s| &s.name))
            {
                if !members.insert(name.clone()) {
                    return Err(MetadataConsistencyError::DuplicateName {
                        kind: "entity set or singleton",
                        name: format!("{}.{}", container.name, name),
                    });
                }
            }
            let mut imports = HashSet::new();
            for import in &container.imports {
                if !imports.insert(import.name.clone()) {
                    return Err(MetadataConsistencyError::DuplicateName {
                        kind: "operation import",
                        name: format!("{}.{}", container.name, import.name),
                    });
                }
            }
            if registry
                .container_members
                .insert(container.name.clone(), members)
                .is_some()
            {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "entity container",
                    name: container.name.clone(),
                });
            }
        }
    }

    Ok(registry)
}

struct Resolver<'r, 'a> {
    registry: &'r Registry<'a>,
    entities: HashMap<String, EntityType>,
    complexes: HashMap<String, ComplexType>,
}

impl Resolver<'_, '_> {
    fn complex_type(&mut self, qualified: &str, chain: &mut Vec<String>) -> Result<ComplexType> {
        if let Some(done) = self.complexes.get(qualified) {
            return Ok(done.clone());
        }
        if chain.iter().any(|c| c == qualified) {
            return Err(MetadataConsistencyError::CyclicInheritance {
                type_name: qualified.to_string(),
            });
        }
        chain.push(qualified.to_string());

        let (namespace, decl) = *self
            .registry
            .complex_decls
            .get(qualified)
            .ok_or_else(|| dangling("complex type", qualified, "type resolution"))?;

        let (base_type, mut properties) = match &decl.base_type {
            Some(base) => {
                let base_name = self.registry.qualify(base);
                if self.registry.kinds.get(&base_name) != Some(&DeclKind::Complex) {
                    return Err(dangling(
                        "base type",
                        &base_name,
                        &format!("complex type '{}'", qualified),
                    ));
                }
                let base = self.complex_type(&base_name, chain)?;
                (Some(base_name), base.properties)
            }
            None => (None, Vec::new()),
        };

        for raw in &decl.properties {
            if properties.iter().any(|p| p.name == raw.name) {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "property",
                    name: format!("{}.{}", qualified, raw.name),
                });
            }
            properties.push(self.registry.property(qualified, raw)?);
        }

        chain.pop();
        let resolved = ComplexType {
            name: decl.name.clone(),
            namespace: namespace.to_string(),
            base_type,
            is_abstract: decl.is_abstract,
            is_open: decl.is_open,
            properties,
        };
        self.complexes.insert(qualified.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn entity_type(&mut self, qualified: &str, chain: &mut Vec<String>) -> Result<EntityType> {
        if let Some(done) = self.entities.get(qualified) {
            return Ok(done.clone());
        }
        if chain.iter().any(|c| c == qualified) {
            return Err(MetadataConsistencyError::CyclicInheritance {
                type_name: qualified.to_string(),
            });
        }
        chain.push(qualified.to_string());

        let registry = self.registry;
        let (namespace, decl) = *registry
            .entity_decls
            .get(qualified)
            .ok_or_else(|| dangling("entity type", qualified, "type resolution"))?;

        let (base_type, mut properties, mut navigation_properties, inherited_key, base_open) =
            match &decl.base_type {
                Some(base) => {
                    let base_name = registry
                        .entity_ref(base, &format!("base type of '{}'", qualified))?;
                    let base = self.entity_type(&base_name, chain)?;
                    (
                        Some(base_name),
                        base.properties,
                        base.navigation_properties,
                        base.key,
                        base.is_open,
                    )
                }
                None => (None, Vec::new(), Vec::new(), Vec::new(), false),
            };

        let is_taken = |properties: &[Property], navs: &[NavigationProperty], name: &str| {
            properties.iter().any(|p| p.name == name) || navs.iter().any(|n| n.name == name)
        };

        for raw in &decl.properties {
            if is_taken(&properties, &navigation_properties, &raw.name) {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "property",
                    name: format!("{}.{}", qualified, raw.name),
                });
            }
            properties.push(registry.property(qualified, raw)?);
        }
        for raw in &decl.navigations {
            if is_taken(&properties, &navigation_properties, &raw.name) {
                return Err(MetadataConsistencyError::DuplicateName {
                    kind: "property",
                    name: format!("{}.{}", qualified, raw.name),
                });
            }
            navigation_properties.push(registry.navigation(qualified, raw)?);
        }

        let key = match &decl.key {
            Some(_) if !inherited_key.is_empty() => {
                return Err(invalid_key(
                    qualified,
                    "a derived type cannot redeclare the key of its base type".to_string(),
                ));
            }
            Some(declared) => {
                validate_key(qualified, declared, decl, &mut properties, registry)?;
                declared.clone()
            }
            None => inherited_key,
        };

        if key.is_empty() && !decl.is_abstract {
            return Err(invalid_key(qualified, "no key declared".to_string()));
        }

        chain.pop();
        let resolved = EntityType {
            name: decl.name.clone(),
            namespace: namespace.to_string(),
            base_type,
            is_abstract: decl.is_abstract,
            is_open: decl.is_open || base_open,
            has_stream: decl.has_stream,
            properties,
            key,
            navigation_properties,
        };
        self.entities.insert(qualified.to_string(), resolved.clone());
        Ok(resolved)
    }
}

fn validate_key(
    qualified: &str,
    declared: &[String],
    decl: &RawEntityType,
    properties: &mut [Property],
    registry: &Registry<'_>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for name in declared {
        if !seen.insert(name.as_str()) {
            return Err(invalid_key(qualified, format!("'{}' listed twice", name)));
        }
        let explicitly_nullable = decl
            .properties
            .iter()
            .find(|p| &p.name == name)
            .and_then(|p| p.nullable)
            .unwrap_or(false);
        let property = properties
            .iter_mut()
            .find(|p| &p.name == name)
            .ok_or_else(|| invalid_key(qualified, format!("'{}' is not a declared property", name)))?;

        if explicitly_nullable {
            return Err(invalid_key(qualified, format!("'{}' is nullable", name)));
        }
        let eligible = match &property.type_ref {
            TypeRef::Primitive(p) => p.is_key_eligible(),
            TypeRef::Enum(_) => registry.version == ODataVersion::V4,
            _ => false,
        };
        if !eligible {
            return Err(invalid_key(
                qualified,
                format!(
                    "'{}' has type {} which cannot be part of a key",
                    name,
                    property.type_ref.type_name()
                ),
            ));
        }
        property.nullable = false;
    }
    Ok(())
}

fn resolve_enum(
    namespace: &str,
    decl: &super::parser::RawEnumType,
    qualified: &str,
) -> Result<EnumType> {
    let underlying = match &decl.underlying {
        Some(name) => match PrimitiveType::from_edm_name(name) {
            Some(
                p @ (PrimitiveType::Byte
                | PrimitiveType::SByte
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64),
            ) => p,
            _ => {
                return Err(dangling(
                    "integer type",
                    name,
                    &format!("enum type '{}'", qualified),
                ));
            }
        },
        None => PrimitiveType::Int32,
    };

    let mut members: Vec<EnumMember> = Vec::with_capacity(decl.members.len());
    for (index, (name, value)) in decl.members.iter().enumerate() {
        if members.iter().any(|m| &m.name == name) {
            return Err(MetadataConsistencyError::DuplicateName {
                kind: "enum member",
                name: format!("{}.{}", qualified, name),
            });
        }
        let value = match value {
            Some(v) => *v,
            None if decl.is_flags => 1i64 << index.min(62),
            None => index as i64,
        };
        members.push(EnumMember {
            name: name.clone(),
            value,
        });
    }

    Ok(EnumType {
        name: decl.name.clone(),
        namespace: namespace.to_string(),
        underlying,
        is_flags: decl.is_flags,
        members,
    })
}

fn is_related(types: &IndexMap<String, EntityType>, a: &str, b: &str) -> bool {
    let derives = |from: &str, to: &str| {
        let mut current = Some(from.to_string());
        while let Some(name) = current {
            if name == to {
                return true;
            }
            current = types.get(&name).and_then(|t| t.base_type.clone());
        }
        false
    };
    derives(a, b) || derives(b, a)
}

fn check_partners(types: &IndexMap<String, EntityType>) -> Result<()> {
    for (qualified, entity) in types {
        for nav in &entity.navigation_properties {
            let Some(partner) = &nav.partner else {
                continue;
            };
            let mismatch = || MetadataConsistencyError::PartnerMismatch {
                entity_type: qualified.clone(),
                navigation: nav.name.clone(),
                partner: partner.clone(),
            };
            let target = types.get(&nav.target).ok_or_else(mismatch)?;
            let back = target.navigation(partner).ok_or_else(mismatch)?;
            if !is_related(types, &back.target, qualified) {
                return Err(mismatch());
            }
            if let Some(back_partner) = &back.partner
                && back_partner != &nav.name
            {
                return Err(mismatch());
            }
        }
    }
    Ok(())
}

fn resolve_container(
    registry: &Registry<'_>,
    namespace: &str,
    raw: &RawContainer,
    entity_types: &IndexMap<String, EntityType>,
    operations: &IndexMap<String, Vec<Operation>>,
) -> Result<EntityContainer> {
    let referenced = |kind: &str, name: &str| format!("{} '{}.{}'", kind, raw.name, name);

    // Navigation binding targets may name a set in this or another container
    let target_exists = |target: &str| -> Option<String> {
        let (container, member) = match target.rsplit_once('/') {
            Some((container, member)) => {
                let container = container.rsplit('.').next().unwrap_or(container);
                (container, member)
            }
            None => (raw.name.as_str(), target),
        };
        registry
            .container_members
            .get(container)
            .filter(|members| members.contains(member))
            .map(|_| target.to_string())
    };

    let bindings = |entity_type: &str,
                    raw_bindings: &[(String, String)],
                    owner: &str|
     -> Result<IndexMap<String, String>> {
        let mut resolved = IndexMap::new();
        for (path, target) in raw_bindings {
            let nav_name = path
                .split('/')
                .filter(|s| !s.contains('.'))
                .next_back()
                .unwrap_or(path.as_str());
            let declared = entity_types.values().any(|t| {
                is_related(entity_types, &t.qualified_name(), entity_type)
                    && t.navigation(nav_name).is_some()
            });
            if !declared {
                return Err(dangling("navigation property", path, owner));
            }
            let target = target_exists(target)
                .ok_or_else(|| dangling("entity set", target, owner))?;
            resolved.insert(path.clone(), target);
        }
        Ok(resolved)
    };

    let mut entity_sets = IndexMap::new();
    for set in &raw.entity_sets {
        let owner = referenced("entity set", &set.name);
        let entity_type = registry.entity_ref(&set.entity_type, &owner)?;
        let navigation_bindings = bindings(&entity_type, &set.bindings, &owner)?;
        entity_sets.insert(
            set.name.clone(),
            EntitySet {
                name: set.name.clone(),
                entity_type,
                container: raw.name.clone(),
                navigation_bindings,
            },
        );
    }

    // V3 association sets translate into navigation bindings
    for association_set in &raw.association_sets {
        let owner = referenced("association set", &association_set.name);
        let association_name = registry.qualify(&association_set.association);
        if !registry.associations.contains_key(&association_name) {
            return Err(dangling("association", &association_name, &owner));
        }
        for (role, set_name) in &association_set.ends {
            if !entity_sets.contains_key(set_name) {
                return Err(dangling("entity set", set_name, &owner));
            }
            let Some((other_role, other_set)) =
                association_set.ends.iter().find(|(r, _)| r != role)
            else {
                continue;
            };
            let set_type = entity_sets[set_name].entity_type.clone();
            let navs: Vec<String> = registry
                .raw_chain(&set_type)
                .into_iter()
                .flat_map(|decl| decl.navigations.iter())
                .filter(|n| {
                    n.relationship.as_deref().map(|r| registry.qualify(r))
                        == Some(association_name.clone())
                        && n.from_role.as_deref() == Some(role.as_str())
                        && n.to_role.as_deref() == Some(other_role.as_str())
                })
                .map(|n| n.name.clone())
                .collect();
            if let Some(set) = entity_sets.get_mut(set_name) {
                for nav in navs {
                    set.navigation_bindings.insert(nav, other_set.clone());
                }
            }
        }
    }

    let mut singletons = IndexMap::new();
    for singleton in &raw.singletons {
        let owner = referenced("singleton", &singleton.name);
        let entity_type = registry.entity_ref(&singleton.entity_type, &owner)?;
        let navigation_bindings = bindings(&entity_type, &singleton.bindings, &owner)?;
        singletons.insert(
            singleton.name.clone(),
            Singleton {
                name: singleton.name.clone(),
                entity_type,
                container: raw.name.clone(),
                navigation_bindings,
            },
        );
    }

    let mut operation_imports = IndexMap::new();
    for import in &raw.imports {
        let owner = referenced("operation import", &import.name);
        if let Some(set) = &import.entity_set
            && !entity_sets.contains_key(set)
        {
            return Err(dangling("entity set", set, &owner));
        }

        let resolved = match &import.operation {
            Some(operation) => {
                let qualified = registry.qualify(operation);
                let kind = if import.is_action {
                    OperationKind::Action
                } else {
                    OperationKind::Function
                };
                let target = operations
                    .get(&qualified)
                    .and_then(|overloads| {
                        overloads.iter().find(|o| o.kind == kind && !o.is_bound)
                    })
                    .ok_or_else(|| {
                        dangling(
                            if import.is_action { "action" } else { "function" },
                            &qualified,
                            &owner,
                        )
                    })?;
                OperationImport {
                    name: import.name.clone(),
                    container: raw.name.clone(),
                    kind,
                    operation: Some(qualified),
                    parameters: target.parameters.clone(),
                    return_type: target.return_type.clone(),
                    entity_set: import.entity_set.clone(),
                }
            }
            None => OperationImport {
                name: import.name.clone(),
                container: raw.name.clone(),
                kind: if import.is_action {
                    OperationKind::Action
                } else {
                    OperationKind::Function
                },
                operation: None,
                parameters: registry.parameters(&owner, &import.parameters)?,
                return_type: match &import.return_type {
                    Some(rt) => Some(registry.type_ref(rt, &owner)?),
                    None => None,
                },
                entity_set: import.entity_set.clone(),
            },
        };
        operation_imports.insert(import.name.clone(), resolved);
    }

    log::debug!(
        "Resolved container {}: {} entity sets, {} singletons, {} operation imports",
        raw.name,
        entity_sets.len(),
        singletons.len(),
        operation_imports.len()
    );

    Ok(EntityContainer {
        name: raw.name.clone(),
        namespace: namespace.to_string(),
        is_default: raw.is_default,
        entity_sets,
        singletons,
        operation_imports,
    })
}

#[cfg(test)]
mod tests {
    use crate::api::error::{MetadataConsistencyError, MetadataError};
    use crate::api::metadata::MetadataModel;

    fn v4(body: &str) -> String {
        format!(
            r#"<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="T" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      {}
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#,
            body
        )
    }

    fn consistency(body: &str) -> MetadataConsistencyError {
        match MetadataModel::parse(&v4(body)) {
            Err(MetadataError::Consistency(e)) => e,
            other => panic!("expected consistency error, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_property_type() {
        let err = consistency(
            r#"<EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
                 <Property Name="Where" Type="T.Missing"/>
               </EntityType>"#,
        );
        assert!(matches!(
            err,
            MetadataConsistencyError::DanglingReference { ref name, .. } if name == "T.Missing"
        ));
    }

    #[test]
    fn test_duplicate_type_name() {
        let err = consistency(
            r#"<ComplexType Name="A"/><ComplexType Name="A"/>"#,
        );
        assert_eq!(
            err,
            MetadataConsistencyError::DuplicateName {
                kind: "type",
                name: "T.A".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_inherited_property() {
        let err = consistency(
            r#"<EntityType Name="Base"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
               </EntityType>
               <EntityType Name="Derived" BaseType="T.Base">
                 <Property Name="Id" Type="Edm.String"/>
               </EntityType>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::DuplicateName { kind: "property", .. }));
    }

    #[test]
    fn test_nullable_key_rejected() {
        let err = consistency(
            r#"<EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="true"/>
               </EntityType>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::InvalidKey { .. }));
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = consistency(
            r#"<EntityType Name="A"><Property Name="Id" Type="Edm.Int32"/></EntityType>"#,
        );
        assert!(matches!(
            err,
            MetadataConsistencyError::InvalidKey { ref reason, .. } if reason == "no key declared"
        ));
    }

    #[test]
    fn test_complex_key_rejected() {
        let err = consistency(
            r#"<ComplexType Name="C"><Property Name="X" Type="Edm.Int32"/></ComplexType>
               <EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="T.C" Nullable="false"/>
               </EntityType>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::InvalidKey { .. }));
    }

    #[test]
    fn test_cyclic_inheritance() {
        let err = consistency(
            r#"<ComplexType Name="A" BaseType="T.B"/><ComplexType Name="B" BaseType="T.A"/>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::CyclicInheritance { .. }));
    }

    #[test]
    fn test_partner_mismatch() {
        let err = consistency(
            r#"<EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
                 <NavigationProperty Name="Bs" Type="Collection(T.B)" Partner="Owner"/>
               </EntityType>
               <EntityType Name="B"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
                 <NavigationProperty Name="Owner" Type="T.B"/>
               </EntityType>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::PartnerMismatch { .. }));
    }

    #[test]
    fn test_set_with_unknown_type() {
        let err = consistency(
            r#"<EntityContainer Name="C"><EntitySet Name="S" EntityType="T.Nope"/></EntityContainer>"#,
        );
        assert!(matches!(
            err,
            MetadataConsistencyError::DanglingReference { kind: "entity type", .. }
        ));
    }

    #[test]
    fn test_duplicate_set_name() {
        let err = consistency(
            r#"<EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
               </EntityType>
               <EntityContainer Name="C">
                 <EntitySet Name="S" EntityType="T.A"/>
                 <Singleton Name="S" Type="T.A"/>
               </EntityContainer>"#,
        );
        assert!(matches!(err, MetadataConsistencyError::DuplicateName { .. }));
    }

    #[test]
    fn test_unknown_binding_target() {
        let err = consistency(
            r#"<EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
                 <NavigationProperty Name="Next" Type="T.A"/>
               </EntityType>
               <EntityContainer Name="C">
                 <EntitySet Name="S" EntityType="T.A">
                   <NavigationPropertyBinding Path="Next" Target="Elsewhere"/>
                 </EntitySet>
               </EntityContainer>"#,
        );
        assert!(matches!(
            err,
            MetadataConsistencyError::DanglingReference { kind: "entity set", .. }
        ));
    }

    #[test]
    fn test_type_definition_resolves_to_underlying() {
        let model = MetadataModel::parse(&v4(
            r#"<TypeDefinition Name="Code" UnderlyingType="Edm.String"/>
               <EntityType Name="A"><Key><PropertyRef Name="Id"/></Key>
                 <Property Name="Id" Type="T.Code" Nullable="false"/>
               </EntityType>"#,
        ))
        .unwrap();
        let property = model.entity_property("T.A", "Id").unwrap();
        assert_eq!(property.type_ref.type_name(), "Edm.String");
    }
}
