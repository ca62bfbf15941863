//! Synchronizing record store.
//!
//! One store per record type keeps three copies in step: the authoritative
//! remote, the local cache and the in-memory snapshot that UI containers
//! subscribe to. Reads are stale-while-revalidate; deletes and edits are
//! optimistic with rollback; creates wait for the remote's confirmed record.
//!
//! Every load runs under a session epoch. Signing out or starting another
//! load bumps the epoch, and a load whose epoch is no longer current drops its
//! result instead of committing it. Cache writes are serialized and re-check
//! the epoch, so once a fence returns and in-flight writes have settled no
//! stale rows reach the cache. Mutations are queued one at a time per
//! store and only commit while the user that issued them is still signed in.

mod outfits;
mod snapshot;

pub use snapshot::*;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::Config;
use crate::db::LocalStore;
use crate::errors::{RemoteError, SyncError};
use crate::models::SyncRecord;
use crate::remote::{RemoteGateway, RemoveOutcome};

#[derive(Debug, Default)]
struct Session {
    user_id: Option<String>,
    epoch: u64,
}

/// Identity of the operation that is about to touch shared state.
#[derive(Debug, Clone)]
struct Ticket {
    user_id: String,
    epoch: u64,
}

/// Change applied to visible state before the remote answers.
enum Tentative<T> {
    Nothing,
    Remove(String),
    Replace(T),
}

struct Rollback<T> {
    snapshot: BTreeMap<String, T>,
    revision: u64,
    id: String,
    previous: Option<T>,
}

pub struct RecordStore<T: SyncRecord> {
    cache: LocalStore,
    remote: Arc<dyn RemoteGateway<T>>,
    state: watch::Sender<StoreSnapshot<T>>,
    session: Mutex<Session>,
    mutations: tokio::sync::Mutex<()>,
    cache_writes: tokio::sync::Mutex<()>,
    remote_timeout: Duration,
}

impl<T: SyncRecord> RecordStore<T> {
    pub fn new(cache: LocalStore, remote: Arc<dyn RemoteGateway<T>>) -> Self {
        let (state, _) = watch::channel(StoreSnapshot::default());
        Self {
            cache,
            remote,
            state,
            session: Mutex::new(Session::default()),
            mutations: tokio::sync::Mutex::new(()),
            cache_writes: tokio::sync::Mutex::new(()),
            remote_timeout: Config::default().remote_timeout,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    // ==================== READS ====================

    pub fn snapshot(&self) -> StoreSnapshot<T> {
        self.state.borrow().clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot<T>> {
        self.state.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.state.borrow().records.get(id).cloned()
    }

    /// Current records ordered by id.
    pub fn records(&self) -> Vec<T> {
        self.state.borrow().records.values().cloned().collect()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session().user_id.clone()
    }

    // ==================== LOAD ====================

    /// Show the cached set for `user_id` at once, then replace it with the
    /// remote set. `None` signs the store out.
    pub async fn load(&self, user_id: Option<&str>) -> LoadOutcome {
        let epoch = self.fence(user_id);
        match user_id {
            Some(user_id) => self.resume(epoch, user_id).await,
            None => LoadOutcome::SignedOut,
        }
    }

    /// Start a new session epoch for `user_id` without awaiting anything.
    ///
    /// Every load, publish and cache write issued under an older epoch is
    /// dropped from here on. Switching user clears the visible records; `None`
    /// leaves the store signed out.
    pub fn fence(&self, user_id: Option<&str>) -> u64 {
        let mut session = self.session();
        session.epoch += 1;
        session.user_id = user_id.map(str::to_string);

        self.state.send_if_modified(|state| {
            if user_id.is_some() && state.user_id.as_deref() == user_id {
                return false;
            }
            *state = StoreSnapshot {
                phase: if user_id.is_some() {
                    Phase::Uninitialized
                } else {
                    Phase::Cleared
                },
                user_id: user_id.map(str::to_string),
                cache_available: state.cache_available,
                revision: state.revision + 1,
                ..StoreSnapshot::default()
            };
            true
        });

        session.epoch
    }

    /// Wait for a cache write that is already under way to finish. Writes
    /// that start later see the current epoch and skip stale data.
    pub async fn settle_writes(&self) {
        let _write = self.cache_writes.lock().await;
    }

    /// Load `user_id` under an epoch obtained from [`RecordStore::fence`].
    /// Returns `Superseded` without touching anything when the epoch has
    /// already moved on.
    pub async fn resume(&self, epoch: u64, user_id: &str) -> LoadOutcome {
        let Some(ticket) = self.begin_load(epoch, user_id) else {
            return LoadOutcome::Superseded;
        };

        match self.cache.get_cached_records::<T>(user_id).await {
            Ok(cached) if !cached.is_empty() => {
                let count = cached.len();
                let published = self.publish_if(
                    |session| session.epoch == ticket.epoch,
                    |state| {
                        state.records = index(cached);
                        state.revision += 1;
                    },
                );
                if published {
                    tracing::debug!("Showing {} cached {} for {}", count, T::KIND, user_id);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Reading cached {} failed, continuing remote-only: {}", T::KIND, e);
                self.mark_cache_unavailable();
            }
        }

        let fetched = self.call_remote(self.remote.fetch_all(user_id)).await;

        match fetched {
            Ok(records) => {
                let count = records.len();
                let fresh = index(records.clone());
                let committed = self.publish_if(
                    |session| session.epoch == ticket.epoch,
                    |state| {
                        state.records = fresh;
                        state.revision += 1;
                        state.phase = Phase::Ready;
                        state.loading = false;
                        state.error = None;
                    },
                );
                if !committed {
                    tracing::debug!("Discarding superseded {} load for {}", T::KIND, user_id);
                    return LoadOutcome::Superseded;
                }

                let _write = self.cache_writes.lock().await;
                if self.session().epoch != ticket.epoch {
                    tracing::debug!("Skipping cache write of superseded {} load", T::KIND);
                    return LoadOutcome::Superseded;
                }
                if let Err(e) = self.cache.cache_records(user_id, &records).await {
                    tracing::warn!("Caching {} failed: {}", T::KIND, e);
                    self.mark_cache_unavailable();
                }

                tracing::info!("Loaded {} {} for {}", count, T::KIND, user_id);
                LoadOutcome::Refreshed { records: count }
            }
            Err(e) => {
                let committed = self.publish_if(
                    |session| session.epoch == ticket.epoch,
                    |state| {
                        state.phase = Phase::Ready;
                        state.loading = false;
                        state.error = Some(e.clone());
                    },
                );
                if !committed {
                    return LoadOutcome::Superseded;
                }

                tracing::warn!("Refreshing {} for {} failed: {}", T::KIND, user_id, e);
                LoadOutcome::Degraded(e)
            }
        }
    }

    fn begin_load(&self, epoch: u64, user_id: &str) -> Option<Ticket> {
        let session = self.session();
        if session.epoch != epoch || session.user_id.as_deref() != Some(user_id) {
            return None;
        }

        self.state.send_modify(|state| {
            state.phase = Phase::Loading;
            state.loading = true;
        });

        Some(Ticket {
            user_id: user_id.to_string(),
            epoch,
        })
    }

    // ==================== MUTATIONS ====================

    /// Create a record remotely and show the confirmed version.
    pub async fn add(&self, draft: T::Draft) -> Result<T, SyncError> {
        let ticket = self.ticket()?;
        T::validate_draft(&draft).map_err(SyncError::Validation)?;

        self.transact(
            &ticket,
            Tentative::Nothing,
            self.remote.create(&ticket.user_id, &draft),
            |records, created: &T| {
                records.insert(created.id().to_string(), created.clone());
            },
        )
        .await
    }

    /// Replace a record, showing the edit before the remote confirms it.
    pub async fn update(&self, record: T) -> Result<T, SyncError> {
        let ticket = self.ticket()?;
        let previous = self.get(record.id());

        let saved = self
            .transact(
                &ticket,
                Tentative::Replace(record.clone()),
                self.remote.update(&ticket.user_id, &record),
                |records, saved: &T| {
                    records.insert(saved.id().to_string(), saved.clone());
                },
            )
            .await?;

        if let Some(previous) = previous {
            let kept = saved.image_urls();
            let dropped: Vec<&str> = previous
                .image_urls()
                .into_iter()
                .filter(|url| !kept.contains(url))
                .collect();
            self.forget_images(&dropped).await;
        }
        Ok(saved)
    }

    /// Remove a record, hiding it before the remote confirms.
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let ticket = self.ticket()?;
        let existing = self.get(id);

        let outcome = self
            .transact(
                &ticket,
                Tentative::Remove(id.to_string()),
                self.remote.remove(&ticket.user_id, id),
                |records, _: &RemoveOutcome| {
                    records.remove(id);
                },
            )
            .await?;

        if outcome == RemoveOutcome::NotFound {
            tracing::debug!("{} {} was already gone remotely", T::KIND, id);
        }
        if let Some(existing) = existing {
            self.forget_images(&existing.image_urls()).await;
        }
        Ok(())
    }

    /// Run one mutation: snapshot, apply the tentative change, call the
    /// remote, then either confirm or restore.
    ///
    /// Restoring puts back the whole snapshot when nothing else changed the
    /// records meanwhile; otherwise only this mutation's own change is undone.
    async fn transact<R, Fut, C>(
        &self,
        ticket: &Ticket,
        tentative: Tentative<T>,
        remote: Fut,
        confirm: C,
    ) -> Result<R, SyncError>
    where
        Fut: Future<Output = Result<R, RemoteError>>,
        C: FnOnce(&mut BTreeMap<String, T>, &R),
    {
        let _queue = self.mutations.lock().await;

        let same_user =
            |session: &Session| session.user_id.as_deref() == Some(ticket.user_id.as_str());

        let signed_in = same_user(&*self.session());
        if !signed_in {
            return Err(SyncError::AuthenticationRequired);
        }

        let mut rollback = None;
        self.publish_if(same_user, |state| {
            let snapshot = match &tentative {
                Tentative::Nothing => return,
                _ => state.records.clone(),
            };
            let (id, previous) = match tentative {
                Tentative::Nothing => return,
                Tentative::Remove(id) => {
                    let previous = state.records.remove(&id);
                    (id, previous)
                }
                Tentative::Replace(record) => {
                    let id = record.id().to_string();
                    let previous = state.records.insert(id.clone(), record);
                    (id, previous)
                }
            };
            state.revision += 1;
            rollback = Some(Rollback {
                snapshot,
                revision: state.revision,
                id,
                previous,
            });
        });

        match self.call_remote(remote).await {
            Ok(value) => {
                let committed = self.publish_if(same_user, |state| {
                    confirm(&mut state.records, &value);
                    state.revision += 1;
                    state.error = None;
                });
                if committed {
                    self.write_through(ticket).await;
                }
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("{} mutation failed, rolling back: {}", T::KIND, e);
                self.publish_if(same_user, |state| {
                    if let Some(rollback) = rollback {
                        if state.revision == rollback.revision {
                            state.records = rollback.snapshot;
                        } else {
                            match rollback.previous {
                                Some(previous) => {
                                    state.records.insert(rollback.id, previous);
                                }
                                None => {
                                    state.records.remove(&rollback.id);
                                }
                            }
                        }
                        state.revision += 1;
                    }
                    state.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    // ==================== HELPERS ====================

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticket(&self) -> Result<Ticket, SyncError> {
        let session = self.session();
        session
            .user_id
            .clone()
            .map(|user_id| Ticket {
                user_id,
                epoch: session.epoch,
            })
            .ok_or(SyncError::AuthenticationRequired)
    }

    /// Apply `change` to the published state only while `valid` holds for the
    /// session. The session lock is held across the check and the publish.
    fn publish_if<V, F>(&self, valid: V, change: F) -> bool
    where
        V: FnOnce(&Session) -> bool,
        F: FnOnce(&mut StoreSnapshot<T>),
    {
        let session = self.session();
        if !valid(&session) {
            return false;
        }
        self.state.send_modify(change);
        true
    }

    async fn call_remote<R, Fut>(&self, call: Fut) -> Result<R, SyncError>
    where
        Fut: Future<Output = Result<R, RemoteError>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.remote_timeout)),
        }
    }

    /// Repopulate the cache with the current records after a confirmed
    /// mutation, unless the issuing user has signed out meanwhile.
    async fn write_through(&self, ticket: &Ticket) {
        let _write = self.cache_writes.lock().await;
        let records = {
            let session = self.session();
            if session.user_id.as_deref() != Some(ticket.user_id.as_str()) {
                return;
            }
            self.records()
        };
        if let Err(e) = self.cache.cache_records(&ticket.user_id, &records).await {
            tracing::warn!("Caching {} after mutation failed: {}", T::KIND, e);
            self.mark_cache_unavailable();
        }
    }

    async fn forget_images(&self, urls: &[&str]) {
        if urls.is_empty() {
            return;
        }
        match self.cache.remove_images(urls).await {
            Ok(removed) => tracing::debug!("Evicted {} cached images", removed),
            Err(e) => tracing::warn!("Evicting cached images failed: {}", e),
        }
    }

    fn mark_cache_unavailable(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.cache_available;
            state.cache_available = false;
            changed
        });
    }
}

fn index<T: SyncRecord>(records: Vec<T>) -> BTreeMap<String, T> {
    records
        .into_iter()
        .map(|record| (record.id().to_string(), record))
        .collect()
}
