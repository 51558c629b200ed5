//! The ontology facade
//!
//! Owns the store handle, the service registry, the change observers and
//! the optional search index, and hands out writers and queries scoped to
//! a transaction.
//!
//! Author: hephaex@gmail.com

use futures::StreamExt;
use ontograph_core::{
    ConfigError, Disconnect, OntologyError, OntologySettings, Observer, RelationshipChange,
    RelationshipChanges, Resource, ResourceChanges, Result, ID,
};
use ontograph_kv::{KvChange, Store, Transaction, Tx};
use ontograph_search::{SearchIndex, SearchRequest, TantivyIndex};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builtin::{BuiltinService, ROOT_NAME};
use crate::cdc::{encode_relationship_changes, encode_resource_changes, CdcFrame};
use crate::retrieve::Retrieve;
use crate::service::{Registry, Service};
use crate::storage::{decode_relationship_key, RELATIONSHIP_PREFIX};
use crate::writer::Writer;

/// Resources handed to the search index per call during backfill
const INDEX_BATCH_SIZE: usize = 256;

// ============================================================================
// Configuration
// ============================================================================

/// Runtime configuration for [`Ontology::open`]
#[derive(Clone, Default)]
pub struct OntologyConfig {
    /// Backing store (required)
    pub store: Option<Arc<dyn Store>>,

    /// Whether to maintain a search index (required)
    pub enable_search: Option<bool>,

    /// Index to use when search is enabled. Defaults to an in-RAM
    /// [`TantivyIndex`].
    pub search: Option<Arc<dyn SearchIndex>>,
}

impl OntologyConfig {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            enable_search: Some(true),
            search: None,
        }
    }

    /// Build from file/env settings
    pub fn from_settings(store: Arc<dyn Store>, settings: &OntologySettings) -> Self {
        Self::new(store).with_search_enabled(settings.enable_search)
    }

    pub fn with_search_enabled(mut self, enabled: bool) -> Self {
        self.enable_search = Some(enabled);
        self
    }

    pub fn with_search_index(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.store.is_none() {
            return Err(ConfigError::MissingRequired("store".into()));
        }
        if self.enable_search.is_none() {
            return Err(ConfigError::MissingRequired("enable_search".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Ontology
// ============================================================================

pub struct Ontology {
    store: Arc<dyn Store>,
    registry: Registry,
    search: Option<Arc<dyn SearchIndex>>,
    resource_observer: Observer<ResourceChanges>,
    relationship_observer: Observer<RelationshipChanges>,
    subscriptions: Mutex<Vec<Disconnect>>,
    shutdown: CancellationToken,
}

impl Ontology {
    /// Open the ontology, creating the root resource if it is missing
    pub async fn open(config: OntologyConfig) -> Result<Self> {
        config.validate()?;
        let (Some(store), Some(enable_search)) = (config.store, config.enable_search) else {
            return Err(ConfigError::MissingRequired("store".into()).into());
        };
        let search = match (enable_search, config.search) {
            (false, _) => None,
            (true, Some(search)) => Some(search),
            (true, None) => Some(Arc::new(TantivyIndex::new()?) as Arc<dyn SearchIndex>),
        };

        let relationship_observer = Observer::new();
        let publish = relationship_observer.clone();
        let store_subscription = store.observe(
            RELATIONSHIP_PREFIX.as_bytes(),
            Arc::new(move |changes: &Vec<KvChange>| {
                let changes = relationship_changes(changes);
                if !changes.is_empty() {
                    publish.notify(&changes);
                }
            }),
        );

        let mut ontology = Self {
            store,
            registry: Registry::new(),
            search,
            resource_observer: Observer::new(),
            relationship_observer,
            subscriptions: Mutex::new(vec![store_subscription]),
            shutdown: CancellationToken::new(),
        };
        ontology.register_service(Arc::new(BuiltinService))?;

        let root = ID::root();
        let writer = ontology.new_writer(None);
        if !writer.has_resource(&root).await? {
            writer.define_named_resource(&root, ROOT_NAME).await?;
            info!(id = %root, "created root resource");
        }
        info!(
            search = ontology.search.as_ref().map(|s| s.name()).unwrap_or("disabled"),
            "ontology opened"
        );
        Ok(ontology)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Disconnect>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the provider of a resource type. Must happen before
    /// [`Ontology::initialize_search_index`]; a second provider for the
    /// same type fails with `DuplicateService`.
    pub fn register_service(&mut self, service: Arc<dyn Service>) -> Result<()> {
        let resource_type = service.resource_type();
        self.registry.register(Arc::clone(&service))?;

        let observer = self.resource_observer.clone();
        let subscription = service.on_change(Arc::new(move |changes: &ResourceChanges| {
            observer.notify(changes)
        }));
        self.subscriptions().push(subscription);
        info!(resource_type = %resource_type, "registered ontology service");
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Begin a transaction on the backing store
    pub fn begin(&self) -> Box<dyn Transaction> {
        self.store.begin()
    }

    /// A writer on `tx`, or directly on the store when `tx` is `None`
    pub fn new_writer<'a>(&'a self, tx: Option<&'a dyn Tx>) -> Writer<'a> {
        Writer::new(tx.unwrap_or_else(|| self.store.tx()), &self.registry)
    }

    /// A query against the store
    pub fn new_retrieve(&self) -> Retrieve<'_> {
        Retrieve::new(self.store.tx(), &self.registry)
    }

    pub async fn retrieve_resource(&self, id: &ID, tx: Option<&dyn Tx>) -> Result<Resource> {
        let tx = tx.unwrap_or_else(|| self.store.tx());
        self.registry.retrieve_resource(id, tx).await
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    fn search_index(&self) -> Result<&Arc<dyn SearchIndex>> {
        self.search.as_ref().ok_or(OntologyError::SearchDisabled)
    }

    pub async fn search_ids(&self, request: &SearchRequest) -> Result<Vec<ID>> {
        self.search_index()?.search(request).await
    }

    /// Matching resources, best match first
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<Resource>> {
        let ids = self.search_ids(request).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.new_retrieve().where_ids(ids).exec_entries().await
    }

    /// Feed every registered service into the search index.
    ///
    /// Each service's full resource set is backfilled by one task per
    /// service. Live changes are buffered from the start and forwarded to
    /// the index once that service's backfill is done, until the ontology
    /// closes. The first failing task cancels the rest and its error is
    /// returned. Does nothing when search is disabled.
    pub async fn initialize_search_index(&self) -> Result<()> {
        let Some(search) = self.search.clone() else {
            debug!("search disabled, skipping index initialization");
            return Ok(());
        };

        let group = self.shutdown.child_token();
        let mut tasks = JoinSet::new();
        for service in self.registry.services() {
            let resource_type = service.resource_type();
            search
                .register(resource_type.clone(), service.schema().searchable_fields())
                .await;

            let (sender, receiver) = mpsc::unbounded_channel::<ResourceChanges>();
            let subscription = service.on_change(Arc::new(move |changes: &ResourceChanges| {
                let _ = sender.send(changes.clone());
            }));
            self.subscriptions().push(subscription);
            let (backfilled, ready) = oneshot::channel();
            tokio::spawn(forward_changes(
                Arc::clone(&search),
                receiver,
                ready,
                self.shutdown.clone(),
            ));

            tasks.spawn(backfill(
                Arc::clone(service),
                Arc::clone(&search),
                backfilled,
                group.clone(),
            ));
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(OntologyError::Other(anyhow::anyhow!(
                    "search index task failed: {e}"
                ))),
            };
            if let Err(e) = result {
                if failure.is_none() {
                    warn!(error = %e, "search index initialization failed, cancelling");
                    group.cancel();
                    tasks.abort_all();
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => {
                info!(index = search.name(), "search index initialized");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Change observation
    // ------------------------------------------------------------------

    /// Subscribe to resource changes from every registered service
    pub fn on_resource_change(
        &self,
        handler: impl Fn(&ResourceChanges) + Send + Sync + 'static,
    ) -> Disconnect {
        self.resource_observer.on_change(handler)
    }

    /// Subscribe to committed relationship changes, in commit order
    pub fn on_relationship_change(
        &self,
        handler: impl Fn(&RelationshipChanges) + Send + Sync + 'static,
    ) -> Disconnect {
        self.relationship_observer.on_change(handler)
    }

    /// Publish every change as encoded frames on `sender` until the returned
    /// handle is disconnected
    pub fn open_cdc(&self, sender: mpsc::UnboundedSender<CdcFrame>) -> Disconnect {
        let resource_sender = sender.clone();
        let resources = self.on_resource_change(move |changes| {
            match encode_resource_changes(changes) {
                Ok(frames) => {
                    for frame in frames {
                        let _ = resource_sender.send(frame);
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode resource changes"),
            }
        });
        let relationships = self.on_relationship_change(move |changes| {
            for frame in encode_relationship_changes(changes) {
                let _ = sender.send(frame);
            }
        });
        Disconnect::all(vec![resources, relationships])
    }

    /// Stop background work and drop every subscription made by the
    /// ontology. Safe to call more than once.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let subscriptions = std::mem::take(&mut *self.subscriptions());
        for subscription in &subscriptions {
            subscription.disconnect();
        }
        debug!(subscriptions = subscriptions.len(), "ontology closed");
    }
}

impl Drop for Ontology {
    fn drop(&mut self) {
        self.close();
    }
}

fn relationship_changes(changes: &[KvChange]) -> RelationshipChanges {
    changes
        .iter()
        .filter_map(|change| match decode_relationship_key(&change.key) {
            Ok(relationship) => Some(RelationshipChange {
                variant: change.variant,
                relationship,
            }),
            Err(e) => {
                warn!(error = %e, "skipping undecodable relationship row");
                None
            }
        })
        .collect()
}

/// Apply live changes to the index in arrival order, starting once the
/// backfill signals `ready`. Changes that arrive earlier stay queued so an
/// older snapshot never overwrites them. Failures only affect the index, so
/// they are logged and skipped.
async fn forward_changes(
    search: Arc<dyn SearchIndex>,
    mut receiver: mpsc::UnboundedReceiver<ResourceChanges>,
    ready: oneshot::Receiver<()>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        backfilled = ready => {
            if backfilled.is_err() {
                debug!(index = search.name(), "backfill did not finish, dropping live changes");
                return;
            }
        }
    }
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changes = receiver.recv() => match changes {
                Some(changes) => {
                    if let Err(e) = search.apply(changes).await {
                        warn!(index = search.name(), error = %e, "failed to apply changes to search index");
                    }
                }
                None => break,
            },
        }
    }
}

async fn backfill(
    service: Arc<dyn Service>,
    search: Arc<dyn SearchIndex>,
    backfilled: oneshot::Sender<()>,
    cancel: CancellationToken,
) -> Result<()> {
    let resource_type = service.resource_type();
    let mut nexter = service.open_nexter().await?;
    let mut batch = Vec::with_capacity(INDEX_BATCH_SIZE);
    let mut total = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OntologyError::Cancelled),
            next = nexter.next() => next,
        };
        match next {
            Some(resource) => {
                batch.push(resource?);
                if batch.len() >= INDEX_BATCH_SIZE {
                    total += batch.len();
                    search.index(std::mem::take(&mut batch)).await?;
                }
            }
            None => break,
        }
    }
    if !batch.is_empty() {
        total += batch.len();
        search.index(batch).await?;
    }
    info!(resource_type = %resource_type, resources = total, "backfilled search index");
    let _ = backfilled.send(());
    Ok(())
}
