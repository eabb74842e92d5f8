//! The long-lived site context.
//!
//! A [`Site`] owns everything that outlives a request: configuration, the
//! database handle, the function registry, the atom and model-variant
//! registries, the image backend and the seed plan. Workers share one
//! `Site` behind an `Arc`; each request pairs it with a fresh
//! [`RequestCache`] in an [`Env`].

use crate::atoms::AtomKind;
use crate::cache::RequestCache;
use crate::config::{BackendKind, SiteConfig};
use crate::content_type::ClassRegistry;
use crate::functions::FunctionRegistry;
use crate::imaging::{ImageBackend, RustBackend, VariantDecl};
use crate::media::{ImageType, all_image_types};
use crate::seed::SeedPlan;
use crate::slots::SlotKind;
use crate::store::{Store, StoreError};
use crate::types::Request;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

pub struct Site {
    pub config: SiteConfig,
    pub store: Store,
    pub classes: ClassRegistry,
    pub functions: FunctionRegistry,
    atoms: RwLock<HashMap<String, AtomKind>>,
    model_variants: RwLock<HashMap<String, Vec<VariantDecl>>>,
    pub(crate) backend: Arc<dyn ImageBackend>,
    seeds: Mutex<SeedPlan>,
    pub(crate) initialized: AtomicBool,
}

/// What one request sees: the site, its private cache and the request itself.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub site: &'a Site,
    pub cache: &'a RequestCache,
    pub request: &'a Request,
}

impl Site {
    pub fn new(config: SiteConfig, store: Store, backend: Arc<dyn ImageBackend>) -> Result<Self, StoreError> {
        let atoms = SlotKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), AtomKind::Slot(*kind)))
            .collect();
        let site = Self {
            config,
            store,
            classes: ClassRegistry::new(),
            functions: FunctionRegistry::with_builtins(),
            atoms: RwLock::new(atoms),
            model_variants: RwLock::new(HashMap::new()),
            backend,
            seeds: Mutex::new(SeedPlan::core()),
            initialized: AtomicBool::new(false),
        };
        let image_types = site.store.read(all_image_types)?;
        for image_type in &image_types {
            site.register_image_type_atom(image_type);
        }
        debug!(image_types = image_types.len(), "site ready");
        Ok(site)
    }

    /// Open the configured database with the configured image backend.
    pub fn open(config: SiteConfig) -> Result<Self, StoreError> {
        info!(database = %config.server.database.display(), "opening site");
        let store = Store::open(&config.server.database)?;
        let backend = backend_for(config.images.backend);
        Self::new(config, store, backend)
    }

    /// A site over a private in-memory database.
    pub fn in_memory(config: SiteConfig) -> Result<Self, StoreError> {
        let backend = backend_for(config.images.backend);
        Self::new(config, Store::open_in_memory()?, backend)
    }

    /// Run `f` with a request environment and a fresh cache.
    pub fn with_env<T>(&self, request: &Request, f: impl FnOnce(&Env<'_>) -> T) -> T {
        let cache = RequestCache::new();
        let env = Env {
            site: self,
            cache: &cache,
            request,
        };
        f(&env)
    }

    // =========================================================================
    // Atoms
    // =========================================================================

    /// Make `name` usable as `entity.<name>` in templates. Re-registering a
    /// name replaces it.
    pub fn register_atom_type(&self, name: &str, kind: AtomKind) {
        debug!(name, ?kind, "registering atom type");
        self.atoms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), kind);
    }

    /// Image type keys never shadow slot kind names.
    pub(crate) fn register_image_type_atom(&self, image_type: &ImageType) {
        self.atoms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(image_type.key.clone())
            .or_insert(AtomKind::ImageType(image_type.id));
    }

    pub fn atom_kind(&self, name: &str) -> Option<AtomKind> {
        self.atoms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    // =========================================================================
    // Model variants
    // =========================================================================

    pub fn model_variants(&self, class: &str) -> Vec<VariantDecl> {
        self.model_variants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn set_model_variants(&self, class: &str, variants: Vec<VariantDecl>) {
        self.model_variants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class.to_string(), variants);
    }

    pub(crate) fn seed_plan(&self) -> MutexGuard<'_, SeedPlan> {
        self.seeds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backend_for(kind: BackendKind) -> Arc<dyn ImageBackend> {
    match kind {
        BackendKind::Rust => Arc::new(RustBackend::new()),
    }
}
