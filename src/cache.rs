//! Request-scoped memoization.
//!
//! One [`RequestCache`] is created per request and dropped with it. It is
//! never shared between workers, so interior mutability is plain
//! `RefCell` and values are handed out as `Rc`.
//!
//! # What is cached
//!
//! | Map | Key | Value |
//! |---|---|---|
//! | snapshots | type id | schema snapshot (+ whether it came from the tables) |
//! | types / chains | type id | type row, self-then-ancestors id list |
//! | choices | (type, payload type, accept, host) | chosen template or the failure |
//! | by_path | (template path, mime) | template row |
//! | compiled | template id | parsed template |
//! | middleware / processors | type id | function titles in run order |
//! | image_types | image type id | image type with its variant rows |
//!
//! Process-scoped caching (class content type ids) lives in
//! [`ClassRegistry`](crate::content_type::ClassRegistry) instead.
//!
//! Loaders run with no borrow held, so a loader may itself consult the
//! cache (e.g. choosing a template walks the memoized type chain).

use crate::media::ImageType;
use crate::resource_type::{ResourceType, ResourceTypeId, Snapshot};
use crate::templates::syntax::Compiled;
use crate::templates::{ChooseError, Template};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// A type's schema snapshot as seen by this request.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Rc<Snapshot>,
    /// Rebuilt from the member tables during this request, so a miss is final.
    pub fresh: bool,
}

/// Memo key for template choice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChoiceKey {
    pub type_id: ResourceTypeId,
    pub payload_type: String,
    pub accept: String,
    pub host: Option<String>,
}

#[derive(Debug, Default)]
pub struct RequestCache {
    snapshots: RefCell<HashMap<ResourceTypeId, CachedSnapshot>>,
    types: RefCell<HashMap<ResourceTypeId, Rc<ResourceType>>>,
    chains: RefCell<HashMap<ResourceTypeId, Rc<Vec<ResourceTypeId>>>>,
    choices: RefCell<HashMap<ChoiceKey, Result<Rc<Template>, ChooseError>>>,
    by_path: RefCell<HashMap<(String, String), Option<Rc<Template>>>>,
    compiled: RefCell<HashMap<i64, Rc<Compiled>>>,
    middleware: RefCell<HashMap<ResourceTypeId, Rc<Vec<String>>>>,
    processors: RefCell<HashMap<ResourceTypeId, Rc<Vec<String>>>>,
    image_types: RefCell<HashMap<i64, Rc<ImageType>>>,
}

/// Return the cached value for `key`, or run `load` and remember its result.
///
/// Failed loads are not remembered.
fn memo<K, V, E>(
    map: &RefCell<HashMap<K, V>>,
    key: K,
    load: impl FnOnce() -> Result<V, E>,
) -> Result<V, E>
where
    K: Eq + Hash,
    V: Clone,
{
    let hit = map.borrow().get(&key).cloned();
    if let Some(value) = hit {
        return Ok(value);
    }
    let value = load()?;
    map.borrow_mut().insert(key, value.clone());
    Ok(value)
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, type_id: ResourceTypeId) -> Option<CachedSnapshot> {
        self.snapshots.borrow().get(&type_id).cloned()
    }

    pub fn put_snapshot(&self, type_id: ResourceTypeId, snapshot: CachedSnapshot) {
        self.snapshots.borrow_mut().insert(type_id, snapshot);
    }

    pub fn resource_type<E>(
        &self,
        type_id: ResourceTypeId,
        load: impl FnOnce() -> Result<Rc<ResourceType>, E>,
    ) -> Result<Rc<ResourceType>, E> {
        memo(&self.types, type_id, load)
    }

    pub fn chain<E>(
        &self,
        type_id: ResourceTypeId,
        load: impl FnOnce() -> Result<Rc<Vec<ResourceTypeId>>, E>,
    ) -> Result<Rc<Vec<ResourceTypeId>>, E> {
        memo(&self.chains, type_id, load)
    }

    /// Memoized template choice. Both outcomes are remembered: a 406 for a
    /// given key stays a 406 for the rest of the request.
    pub fn choice<E>(
        &self,
        key: ChoiceKey,
        load: impl FnOnce() -> Result<Result<Rc<Template>, ChooseError>, E>,
    ) -> Result<Result<Rc<Template>, ChooseError>, E> {
        memo(&self.choices, key, load)
    }

    pub fn template_by_path<E>(
        &self,
        path: &str,
        mime: &str,
        load: impl FnOnce() -> Result<Option<Rc<Template>>, E>,
    ) -> Result<Option<Rc<Template>>, E> {
        memo(&self.by_path, (path.to_string(), mime.to_string()), load)
    }

    pub fn compiled<E>(
        &self,
        template_id: i64,
        load: impl FnOnce() -> Result<Rc<Compiled>, E>,
    ) -> Result<Rc<Compiled>, E> {
        memo(&self.compiled, template_id, load)
    }

    pub fn middleware<E>(
        &self,
        type_id: ResourceTypeId,
        load: impl FnOnce() -> Result<Rc<Vec<String>>, E>,
    ) -> Result<Rc<Vec<String>>, E> {
        memo(&self.middleware, type_id, load)
    }

    pub fn processors<E>(
        &self,
        type_id: ResourceTypeId,
        load: impl FnOnce() -> Result<Rc<Vec<String>>, E>,
    ) -> Result<Rc<Vec<String>>, E> {
        memo(&self.processors, type_id, load)
    }

    pub fn image_type<E>(
        &self,
        image_type_id: i64,
        load: impl FnOnce() -> Result<Rc<ImageType>, E>,
    ) -> Result<Rc<ImageType>, E> {
        memo(&self.image_types, image_type_id, load)
    }
}
