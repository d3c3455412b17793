//! Entity context
//!
//! Tracks entity instances and their change state, and turns mutations
//! into requests. In [`FlushMode::NonTransactional`] every mutation is sent
//! on its own as soon as it is made; in [`FlushMode::Transactional`]
//! mutations are deferred until [`EntityContext::flush`] sends them as one
//! change set that the server applies atomically.

pub mod proxy;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};

pub use proxy::EntityProxy;

use crate::api::codec::{ChangeState, EntityInstance, EntityReference, Payload, PayloadCodec, Value};
use crate::api::error::{ContextError, RequestError, UnknownTypeError};
use crate::api::metadata::MetadataModel;
use crate::api::operations::response::decode_part;
use crate::api::operations::{Batch, BatchConfig, OperationId, OperationSuccess};
use crate::api::request::{RequestBuilder, RequestSpec, ResourcePath, key_of, key_predicate, parse_entity_id};
use crate::api::transport::Transport;

/// Handle of an instance tracked by an [`EntityContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(usize);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    #[default]
    NonTransactional,
    Transactional,
}

/// Outcome of [`EntityContext::flush`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlushSummary {
    /// Instances now `Unchanged`
    pub applied: Vec<EntityHandle>,
    /// Deleted instances no longer tracked
    pub detached: Vec<EntityHandle>,
    /// Per-instance failures; only filled in non-transactional mode
    pub failures: Vec<ContextError>,
}

impl FlushSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingLink {
    navigation: String,
    target: EntityHandle,
}

#[derive(Debug, Clone)]
struct Tracked {
    entity_set: String,
    entity: EntityInstance,
    /// Links not yet on the server; created instances send them as bind annotations
    links: Vec<PendingLink>,
}

impl Tracked {
    fn is_pending(&self) -> bool {
        self.entity.is_dirty() || !self.links.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Create,
    Update,
    Link,
    Delete,
}

/// Single-writer tracker of entity instances for one service
pub struct EntityContext {
    builder: RequestBuilder,
    codec: PayloadCodec,
    transport: Arc<dyn Transport>,
    batch_config: BatchConfig,
    mode: FlushMode,
    tracked: IndexMap<EntityHandle, Tracked>,
    next_handle: usize,
}

impl EntityContext {
    pub fn new(
        builder: RequestBuilder,
        codec: PayloadCodec,
        transport: Arc<dyn Transport>,
        batch_config: BatchConfig,
        mode: FlushMode,
    ) -> Self {
        Self {
            builder,
            codec,
            transport,
            batch_config,
            mode,
            tracked: IndexMap::new(),
            next_handle: 0,
        }
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        self.tracked.keys().copied()
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&EntityInstance> {
        self.tracked.get(&handle).map(|t| &t.entity)
    }

    /// Direct access; follow field writes with [`track_change`](Self::track_change)
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut EntityInstance> {
        self.tracked.get_mut(&handle).map(|t| &mut t.entity)
    }

    pub fn state(&self, handle: EntityHandle) -> Option<&ChangeState> {
        self.get(handle).map(|e| &e.state)
    }

    pub fn entity_set(&self, handle: EntityHandle) -> Option<&str> {
        self.tracked.get(&handle).map(|t| t.entity_set.as_str())
    }

    pub fn has_changes(&self) -> bool {
        self.tracked.values().any(Tracked::is_pending)
    }

    fn model(&self) -> &MetadataModel {
        self.builder.model()
    }

    fn lookup(&self, handle: EntityHandle) -> Result<&Tracked, ContextError> {
        self.tracked.get(&handle).ok_or(ContextError::UnknownHandle(handle))
    }

    fn lookup_mut(&mut self, handle: EntityHandle) -> Result<&mut Tracked, ContextError> {
        self.tracked
            .get_mut(&handle)
            .ok_or(ContextError::UnknownHandle(handle))
    }

    /// Normalize the instance's type name and check the set accepts it
    fn check_membership(&self, entity_set: &str, entity: &mut EntityInstance) -> Result<(), ContextError> {
        let model = self.model();
        let set = model
            .resolve_entity_set(entity_set)
            .ok_or_else(|| RequestError::UnknownResource(entity_set.to_string()))?;
        if model.resolve_entity_type(&entity.type_name).is_none() {
            return Err(RequestError::from(UnknownTypeError::new(entity.type_name.clone())).into());
        }
        entity.type_name = model.normalize_name(&entity.type_name);
        if !model.is_derived_from(&entity.type_name, &set.entity_type) {
            return Err(ContextError::TypeMismatch {
                entity_set: entity_set.to_string(),
                entity_type: entity.type_name.clone(),
            });
        }
        Ok(())
    }

    /// `Set(key)` when the key is populated
    fn identity(&self, entity_set: &str, entity: &EntityInstance) -> Option<String> {
        let key = key_of(self.model(), entity).ok()?;
        let predicate =
            key_predicate(self.model(), &entity.type_name, &key, self.builder.options().version).ok()?;
        Some(format!("{}{}", entity_set, predicate))
    }

    fn ensure_unique(&self, entity_set: &str, entity: &EntityInstance) -> Result<(), ContextError> {
        let Some(identity) = self.identity(entity_set, entity) else {
            return Ok(());
        };
        let taken = self
            .tracked
            .values()
            .filter(|t| t.entity_set == entity_set)
            .any(|t| self.identity(&t.entity_set, &t.entity).as_deref() == Some(identity.as_str()));
        if taken {
            return Err(ContextError::AlreadyAttached {
                entity_set: entity_set.to_string(),
                identity,
            });
        }
        Ok(())
    }

    fn insert(&mut self, entity_set: &str, entity: EntityInstance) -> EntityHandle {
        let handle = EntityHandle(self.next_handle);
        self.next_handle += 1;
        self.tracked.insert(
            handle,
            Tracked {
                entity_set: entity_set.to_string(),
                entity,
                links: Vec::new(),
            },
        );
        handle
    }

    /// Track an instance that already exists on the server
    pub fn attach(&mut self, entity_set: &str, mut entity: EntityInstance) -> Result<EntityHandle, ContextError> {
        self.check_membership(entity_set, &mut entity)?;
        key_of(self.model(), &entity).map_err(RequestError::from)?;
        self.ensure_unique(entity_set, &entity)?;
        entity.accept_changes();
        Ok(self.insert(entity_set, entity))
    }

    /// Stop tracking an instance; pending changes are dropped
    pub fn detach(&mut self, handle: EntityHandle) -> Result<EntityInstance, ContextError> {
        let tracked = self
            .tracked
            .shift_remove(&handle)
            .ok_or(ContextError::UnknownHandle(handle))?;
        for other in self.tracked.values_mut() {
            other.links.retain(|link| link.target != handle);
        }
        Ok(tracked.entity)
    }

    /// Track a new instance for creation in `entity_set`
    ///
    /// Non-transactional contexts send the create immediately. When that
    /// fails the instance stays tracked as `Created` and the error carries
    /// its handle.
    pub async fn add(&mut self, entity_set: &str, mut entity: EntityInstance) -> Result<EntityHandle, ContextError> {
        self.check_membership(entity_set, &mut entity)?;
        self.ensure_unique(entity_set, &entity)?;
        entity.state = ChangeState::Created;
        let handle = self.insert(entity_set, entity);
        if self.mode == FlushMode::NonTransactional {
            self.persist(handle).await?;
        }
        Ok(handle)
    }

    fn validate(&self, handle: EntityHandle, name: &str, value: &Value) -> Result<(), ContextError> {
        let entity = &self.lookup(handle)?.entity;
        if entity.state == ChangeState::Deleted {
            return Err(ContextError::Deleted(handle));
        }
        let model = self.model();
        let entity_type = model
            .resolve_entity_type(&entity.type_name)
            .ok_or_else(|| RequestError::from(UnknownTypeError::new(entity.type_name.clone())))?;

        let Some(property) = entity_type.property(name) else {
            if entity_type.is_open {
                return Ok(());
            }
            return Err(ContextError::UnknownMember {
                entity_type: entity.type_name.clone(),
                property: name.to_string(),
            });
        };
        if entity_type.is_key(name) && entity.state != ChangeState::Created && entity.get(name) != Some(value) {
            return Err(ContextError::KeyImmutable {
                property: name.to_string(),
            });
        }
        let invalid = (value.is_null() && !property.nullable) || !value.conforms_to(&property.type_ref, model);
        if invalid {
            return Err(ContextError::InvalidValue {
                property: name.to_string(),
            });
        }
        value.check_facets(property)?;
        Ok(())
    }

    /// Validated assignment that records the property as changed
    pub async fn set(&mut self, handle: EntityHandle, name: &str, value: impl Into<Value>) -> Result<(), ContextError> {
        let value = value.into();
        self.validate(handle, name, &value)?;
        self.lookup_mut(handle)?.entity.set_property(name, value);
        self.send_if_immediate(handle).await
    }

    /// Record a change made through [`entity_mut`](Self::entity_mut)
    pub async fn track_change(&mut self, handle: EntityHandle, property: &str) -> Result<(), ContextError> {
        let entity = &self.lookup(handle)?.entity;
        let value = entity.get(property).cloned().unwrap_or(Value::Null);
        self.validate(handle, property, &value)?;
        self.lookup_mut(handle)?.entity.mark_changed(property);
        self.send_if_immediate(handle).await
    }

    /// Mark an instance for deletion; never-created instances are simply detached
    pub async fn remove(&mut self, handle: EntityHandle) -> Result<(), ContextError> {
        if self.lookup(handle)?.entity.state == ChangeState::Created {
            self.detach(handle)?;
            return Ok(());
        }
        let tracked = self.lookup_mut(handle)?;
        tracked.entity.state = ChangeState::Deleted;
        tracked.links.clear();
        self.send_if_immediate(handle).await
    }

    /// Link `source` to `target` through `navigation`
    pub async fn bind(
        &mut self,
        source: EntityHandle,
        navigation: &str,
        target: EntityHandle,
    ) -> Result<(), ContextError> {
        let source_entity = &self.lookup(source)?.entity;
        let target_entity = &self.lookup(target)?.entity;
        for (handle, entity) in [(source, source_entity), (target, target_entity)] {
            if entity.state == ChangeState::Deleted {
                return Err(ContextError::Deleted(handle));
            }
        }

        let model = self.model();
        let nav = model
            .resolve_entity_type(&source_entity.type_name)
            .and_then(|t| t.navigation(navigation))
            .ok_or_else(|| ContextError::UnknownMember {
                entity_type: source_entity.type_name.clone(),
                property: navigation.to_string(),
            })?;
        if !model.is_derived_from(&target_entity.type_name, &nav.target) {
            return Err(ContextError::InvalidValue {
                property: navigation.to_string(),
            });
        }
        if self.mode == FlushMode::NonTransactional {
            // no change set to carry a content id
            key_of(model, target_entity).map_err(RequestError::from)?;
        }

        let link = PendingLink {
            navigation: navigation.to_string(),
            target,
        };
        let tracked = self.lookup_mut(source)?;
        if !tracked.links.contains(&link) {
            tracked.links.push(link);
        }
        self.send_if_immediate(source).await
    }

    async fn send_if_immediate(&mut self, handle: EntityHandle) -> Result<(), ContextError> {
        let created = self.lookup(handle)?.entity.state == ChangeState::Created;
        // a created instance still here failed to create; flush retries it
        if self.mode == FlushMode::NonTransactional && !created {
            self.persist(handle).await?;
        }
        Ok(())
    }

    /// Send everything pending
    ///
    /// Non-transactional: each pending instance independently, failures
    /// reported per instance. Transactional: one change set, all or nothing.
    ///
    /// A change set is ordered by kind, not by when the mutations were made:
    /// creates, then updates, then links, then deletes, each group in
    /// tracking order. Deleting an entity and creating a replacement with the
    /// same key therefore needs two flushes.
    pub async fn flush(&mut self) -> Result<FlushSummary, ContextError> {
        match self.mode {
            FlushMode::NonTransactional => Ok(self.flush_each().await),
            FlushMode::Transactional => self.flush_change_set().await,
        }
    }

    fn pending(&self) -> Vec<EntityHandle> {
        self.tracked
            .iter()
            .filter(|(_, t)| t.is_pending())
            .map(|(h, _)| *h)
            .collect()
    }

    async fn flush_each(&mut self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        for handle in self.pending() {
            let deleted = self.state(handle) == Some(&ChangeState::Deleted);
            match self.persist(handle).await {
                Ok(()) if deleted => summary.detached.push(handle),
                Ok(()) => summary.applied.push(handle),
                Err(error) => summary.failures.push(error),
            }
        }
        summary
    }

    async fn flush_change_set(&mut self) -> Result<FlushSummary, ContextError> {
        let handles = self.pending();
        if handles.is_empty() {
            return Ok(FlushSummary::default());
        }
        let batch_error = |source| ContextError::Batch {
            handles: handles.clone(),
            source,
        };

        let mut batch = Batch::new(self.builder.clone(), self.batch_config.clone());
        batch.begin_change_set().map_err(batch_error)?;
        let mut content_ids: HashMap<EntityHandle, String> = HashMap::new();
        let mut steps: Vec<(OperationId, EntityHandle, Step, Option<PendingLink>)> = Vec::new();

        // creates first, in tracking order, so later members can use their content ids
        for &handle in &handles {
            if self.state(handle) == Some(&ChangeState::Created) {
                let spec = self.create_spec(handle, &content_ids)?;
                let operation = batch.add_change(&spec).map_err(batch_error)?;
                if let Some(id) = operation.content_id {
                    content_ids.insert(handle, id);
                }
                steps.push((operation.id, handle, Step::Create, None));
            }
        }
        for &handle in &handles {
            if let Some(ChangeState::Updated(_)) = self.state(handle) {
                let spec = self.update_spec(handle)?;
                let operation = batch.add_change(&spec).map_err(batch_error)?;
                steps.push((operation.id, handle, Step::Update, None));
            }
        }
        for &handle in &handles {
            let tracked = self.lookup(handle)?;
            if matches!(tracked.entity.state, ChangeState::Created | ChangeState::Deleted) {
                continue;
            }
            for link in tracked.links.clone() {
                let spec = self.link_spec(handle, &link, &content_ids)?;
                let operation = batch.add_change(&spec).map_err(batch_error)?;
                steps.push((operation.id, handle, Step::Link, Some(link)));
            }
        }
        for &handle in &handles {
            if self.state(handle) == Some(&ChangeState::Deleted) {
                let spec = self.delete_spec(handle)?;
                let operation = batch.add_change(&spec).map_err(batch_error)?;
                steps.push((operation.id, handle, Step::Delete, None));
            }
        }
        batch.commit_change_set().map_err(batch_error)?;

        debug!("Flushing {} change(s) for {} entities as one change set", steps.len(), handles.len());
        let response = batch
            .send(self.transport.as_ref(), &self.codec)
            .await
            .map_err(batch_error)?;

        if let Some(failure) = response.change_set_failures().into_iter().next() {
            warn!("Transactional flush failed, {} entities left pending", handles.len());
            return Err(ContextError::ChangeSet { handles, failure });
        }

        let mut summary = FlushSummary::default();
        for (id, handle, step, link) in steps {
            let success = response.get(id).and_then(|r| r.success()).cloned();
            self.apply(handle, step, link.as_ref(), success);
            match step {
                Step::Delete => summary.detached.push(handle),
                _ if !summary.applied.contains(&handle) => summary.applied.push(handle),
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Send all pending work of one instance as independent requests
    async fn persist(&mut self, handle: EntityHandle) -> Result<(), ContextError> {
        let no_content_ids = HashMap::new();
        let state = self.lookup(handle)?.entity.state.clone();
        match state {
            ChangeState::Created => {
                let spec = self.create_spec(handle, &no_content_ids)?;
                let success = self.send_one(handle, &spec).await?;
                self.apply(handle, Step::Create, None, Some(success));
                return Ok(());
            }
            ChangeState::Updated(_) => {
                let spec = self.update_spec(handle)?;
                let success = self.send_one(handle, &spec).await?;
                self.apply(handle, Step::Update, None, Some(success));
            }
            ChangeState::Deleted => {
                let spec = self.delete_spec(handle)?;
                let success = self.send_one(handle, &spec).await?;
                self.apply(handle, Step::Delete, None, Some(success));
                return Ok(());
            }
            ChangeState::Unchanged => {}
        }

        for link in self.lookup(handle)?.links.clone() {
            let spec = self.link_spec(handle, &link, &no_content_ids)?;
            let success = self.send_one(handle, &spec).await?;
            self.apply(handle, Step::Link, Some(&link), Some(success));
        }
        Ok(())
    }

    async fn send_one(&self, handle: EntityHandle, spec: &RequestSpec) -> Result<OperationSuccess, ContextError> {
        let request = self.builder.build(spec)?;
        let http = request.to_http(&self.batch_config.service_root);
        debug!("{} {} for {}", http.method, http.url, handle);
        let response = self
            .transport
            .send(http)
            .await
            .map_err(|source| ContextError::Transport { handle, source })?;
        decode_part(request.expected.as_ref(), response.into(), &self.codec)
            .map_err(|error| ContextError::Operation { handle, error })
    }

    fn entity_path(&self, handle: EntityHandle) -> Result<ResourcePath, ContextError> {
        let tracked = self.lookup(handle)?;
        let key = key_of(self.model(), &tracked.entity).map_err(RequestError::from)?;
        Ok(ResourcePath::entity(tracked.entity_set.clone(), key))
    }

    /// Content id inside the current change set, canonical path otherwise
    fn reference_to(
        &self,
        target: EntityHandle,
        content_ids: &HashMap<EntityHandle, String>,
    ) -> Result<EntityReference, ContextError> {
        if let Some(id) = content_ids.get(&target) {
            return Ok(EntityReference::ContentId(id.clone()));
        }
        let tracked = self.lookup(target)?;
        let key = key_of(self.model(), &tracked.entity).map_err(RequestError::from)?;
        let predicate = key_predicate(
            self.model(),
            &tracked.entity.type_name,
            &key,
            self.builder.options().version,
        )?;
        Ok(EntityReference::Uri(format!("{}{}", tracked.entity_set, predicate)))
    }

    fn create_spec(
        &self,
        handle: EntityHandle,
        content_ids: &HashMap<EntityHandle, String>,
    ) -> Result<RequestSpec, ContextError> {
        let tracked = self.lookup(handle)?;
        let mut entity = tracked.entity.clone();
        for link in &tracked.links {
            entity.bind(link.navigation.clone(), self.reference_to(link.target, content_ids)?);
        }
        Ok(RequestSpec::create(
            ResourcePath::entity_set(tracked.entity_set.clone()),
            entity,
        ))
    }

    fn update_spec(&self, handle: EntityHandle) -> Result<RequestSpec, ContextError> {
        let entity = self.lookup(handle)?.entity.clone();
        Ok(RequestSpec::update_partial(self.entity_path(handle)?, entity))
    }

    fn delete_spec(&self, handle: EntityHandle) -> Result<RequestSpec, ContextError> {
        let spec = RequestSpec::delete(self.entity_path(handle)?);
        Ok(match &self.lookup(handle)?.entity.etag {
            Some(etag) => spec.if_match(etag.clone()),
            None => spec,
        })
    }

    fn link_spec(
        &self,
        handle: EntityHandle,
        link: &PendingLink,
        content_ids: &HashMap<EntityHandle, String>,
    ) -> Result<RequestSpec, ContextError> {
        let path = self.entity_path(handle)?.navigate(link.navigation.clone());
        Ok(RequestSpec::add_reference(path, self.reference_to(link.target, content_ids)?))
    }

    fn apply(
        &mut self,
        handle: EntityHandle,
        step: Step,
        link: Option<&PendingLink>,
        success: Option<OperationSuccess>,
    ) {
        if step == Step::Delete {
            let _ = self.detach(handle);
            return;
        }
        let model = self.builder.model().clone();
        let Some(tracked) = self.tracked.get_mut(&handle) else {
            return;
        };
        match step {
            Step::Link => {
                if let Some(link) = link {
                    tracked.links.retain(|l| l != link);
                }
                return;
            }
            Step::Create => tracked.links.clear(),
            _ => {}
        }

        let entity = &mut tracked.entity;
        if let Some(success) = success {
            if let Some(error) = &success.decode_error {
                warn!("{} was saved but the response body was unreadable: {}", handle, error);
            }
            match success.payload {
                Some(Payload::Entity(server)) => entity.merge_from(server),
                _ => {
                    if let Some(id) = &success.entity_id {
                        merge_key_from_id(&model, entity, id);
                    }
                }
            }
            if success.entity_id.is_some() {
                entity.entity_id = success.entity_id;
            }
            if success.etag.is_some() {
                entity.etag = success.etag;
            }
        }
        entity.accept_changes();
    }
}

/// Take server-assigned key values from an `OData-EntityID` or `Location` URI
fn merge_key_from_id(model: &MetadataModel, entity: &mut EntityInstance, id: &str) {
    match parse_entity_id(model, id) {
        Ok((_, key)) => {
            for (name, value) in key.0 {
                entity.properties.insert(name, value);
            }
        }
        Err(e) => warn!("Cannot read key from entity id '{}': {}", id, e),
    }
}
