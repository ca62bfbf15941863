//! Application service wiring the stores, the cache and the image loader.
//!
//! One `WardrobeSync` is built at startup and handed to every consumer.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Config;
use crate::db::LocalStore;
use crate::errors::{FetchError, RemoteError, SyncError};
use crate::images::{HttpImageFetcher, ImageFetcher, ImageLoader, PrefetchReport};
use crate::models::{Collection, Outfit, SyncRecord};
use crate::remote::{HttpGateway, RemoteGateway};
use crate::sync::{LoadOutcome, RecordStore};

/// Errors raised while assembling the service.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Outcome of loading both stores.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub outfits: LoadOutcome,
    pub collections: LoadOutcome,
}

pub struct WardrobeSync {
    cache: LocalStore,
    outfits: RecordStore<Outfit>,
    collections: RecordStore<Collection>,
    images: Arc<ImageLoader>,
    current_user: Mutex<Option<String>>,
    /// Held while the signed-in user changes.
    switching: tokio::sync::Mutex<()>,
}

impl WardrobeSync {
    pub fn new(
        cache: LocalStore,
        outfits: Arc<dyn RemoteGateway<Outfit>>,
        collections: Arc<dyn RemoteGateway<Collection>>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            outfits: RecordStore::new(cache.clone(), outfits),
            collections: RecordStore::new(cache.clone(), collections),
            images: Arc::new(ImageLoader::new(cache.clone(), fetcher)),
            cache,
            current_user: Mutex::new(None),
            switching: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the HTTP-backed service described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let cache = LocalStore::new(&config.db_path);
        let outfits = HttpGateway::<Outfit>::from_config(config)?;
        let collections = HttpGateway::<Collection>::from_config(config)?;
        let fetcher = HttpImageFetcher::from_config(config)?;

        Ok(Self {
            outfits: RecordStore::<Outfit>::new(cache.clone(), Arc::new(outfits))
                .with_remote_timeout(config.remote_timeout),
            collections: RecordStore::<Collection>::new(cache.clone(), Arc::new(collections))
                .with_remote_timeout(config.remote_timeout),
            images: Arc::new(
                ImageLoader::new(cache.clone(), Arc::new(fetcher))
                    .with_margin(config.image_margin_px)
                    .with_fetch_timeout(config.image_timeout),
            ),
            cache,
            current_user: Mutex::new(None),
            switching: tokio::sync::Mutex::new(()),
        })
    }

    pub fn outfits(&self) -> &RecordStore<Outfit> {
        &self.outfits
    }

    pub fn collections(&self) -> &RecordStore<Collection> {
        &self.collections
    }

    pub fn images(&self) -> &Arc<ImageLoader> {
        &self.images
    }

    pub fn cache(&self) -> &LocalStore {
        &self.cache
    }

    pub fn current_user(&self) -> Option<String> {
        self.current_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch to `user_id` and load both stores. Cached records of any other
    /// user are dropped first.
    ///
    /// Both stores are fenced before anything is awaited, so a load still
    /// running for the previous user can neither publish nor cache its rows.
    pub async fn sign_in(&self, user_id: &str) -> SyncReport {
        let (outfits, collections) = {
            let _switch = self.switching.lock().await;
            let epochs = (
                self.outfits.fence(Some(user_id)),
                self.collections.fence(Some(user_id)),
            );
            let previous = self
                .current_user
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(user_id.to_string());
            tokio::join!(self.outfits.settle_writes(), self.collections.settle_writes());

            if previous.as_deref() != Some(user_id) {
                tracing::info!("Signing in as {}", user_id);
                match self.cache.retain_user(user_id).await {
                    Ok(0) => {}
                    Ok(dropped) => {
                        tracing::info!("Dropped {} cached records of other users", dropped)
                    }
                    Err(e) => tracing::warn!("Could not prune cache for other users: {}", e),
                }
            }
            epochs
        };

        self.resume(user_id, outfits, collections).await
    }

    pub async fn sign_out(&self) {
        let _switch = self.switching.lock().await;
        self.outfits.fence(None);
        self.collections.fence(None);
        let previous = self
            .current_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user_id) = previous {
            tracing::info!("Signing out {}", user_id);
        }
        tokio::join!(self.outfits.settle_writes(), self.collections.settle_writes());
    }

    /// Reload both stores for the signed-in user.
    pub async fn refresh(&self) -> Result<SyncReport, SyncError> {
        let (user_id, outfits, collections) = {
            let _switch = self.switching.lock().await;
            let user_id = self.current_user().ok_or(SyncError::AuthenticationRequired)?;
            let outfits = self.outfits.fence(Some(&user_id));
            let collections = self.collections.fence(Some(&user_id));
            (user_id, outfits, collections)
        };
        Ok(self.resume(&user_id, outfits, collections).await)
    }

    /// Sign out and wipe every local namespace.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.sign_out().await;
        let _switch = self.switching.lock().await;
        self.cache.clear_all().await?;
        Ok(())
    }

    /// Delete a collection. Outfits keep their membership entries; they are
    /// reported, not rewritten.
    pub async fn delete_collection(&self, id: &str) -> Result<(), SyncError> {
        self.collections.delete(id).await?;

        let dangling = self.dangling_memberships();
        if !dangling.is_empty() {
            tracing::warn!(
                "{} outfits still reference deleted collections",
                dangling.len()
            );
        }
        Ok(())
    }

    /// Outfit id to unknown collection ids.
    pub fn dangling_memberships(&self) -> std::collections::BTreeMap<String, Vec<String>> {
        let snapshot = self.collections.snapshot();
        self.outfits.dangling_memberships(&snapshot.ids())
    }

    /// Fetch every image referenced by the current outfits into the cache.
    pub async fn warm_images(&self) -> PrefetchReport {
        let outfits = self.outfits.records();
        let urls: Vec<String> = outfits
            .iter()
            .flat_map(|outfit| outfit.image_urls())
            .map(str::to_string)
            .collect();
        self.images.prefetch(urls).await
    }

    async fn resume(&self, user_id: &str, outfits: u64, collections: u64) -> SyncReport {
        let (outfits, collections) = tokio::join!(
            self.outfits.resume(outfits, user_id),
            self.collections.resume(collections, user_id)
        );
        SyncReport {
            outfits,
            collections,
        }
    }
}
