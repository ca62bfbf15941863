//! Lazy image loading backed by the local image cache.
//!
//! A mounted image shows its placeholder until its bounds come within the
//! proximity margin of the viewport. It is then resolved exactly once: cached
//! bytes when present, otherwise a network fetch whose bytes are written back
//! to the cache. A failed fetch falls back to the source URL and flags the
//! image as errored; it never reaches record-store state.

mod fetcher;
mod geometry;

pub use fetcher::*;
pub use geometry::*;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::{Config, DEFAULT_IMAGE_MARGIN_PX};
use crate::db::LocalStore;
use crate::errors::FetchError;

/// Render state of one mounted image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageState {
    Placeholder,
    Loading,
    Loaded {
        bytes: Arc<Vec<u8>>,
        from_cache: bool,
    },
    /// Rendered straight from the source URL after a failed fetch.
    Fallback { url: String, error: FetchError },
}

impl ImageState {
    pub fn is_error(&self) -> bool {
        matches!(self, ImageState::Fallback { .. })
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, ImageState::Loaded { .. } | ImageState::Fallback { .. })
    }

    /// What the view should draw, if anything beyond the placeholder.
    pub fn display_source(&self) -> Option<DisplaySource<'_>> {
        match self {
            ImageState::Placeholder | ImageState::Loading => None,
            ImageState::Loaded { bytes, .. } => Some(DisplaySource::Bytes(bytes.as_slice())),
            ImageState::Fallback { url, .. } => Some(DisplaySource::Url(url)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySource<'a> {
    Bytes(&'a [u8]),
    Url(&'a str),
}

/// Outcome counts of a cache warm-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub cached: usize,
    pub fetched: usize,
    pub failed: usize,
}

struct Observation {
    url: String,
    bounds: Rect,
    state: watch::Sender<ImageState>,
}

enum Resolved {
    Cached(Vec<u8>),
    Fetched(Vec<u8>),
    Failed(FetchError),
}

/// Registry of mounted images waiting to become visible.
pub struct ImageLoader {
    cache: LocalStore,
    fetcher: Arc<dyn ImageFetcher>,
    margin: f64,
    fetch_timeout: Duration,
    observed: Mutex<HashMap<u64, Observation>>,
    next_id: AtomicU64,
}

impl ImageLoader {
    pub fn new(cache: LocalStore, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let defaults = Config::default();
        Self {
            cache,
            fetcher,
            margin: DEFAULT_IMAGE_MARGIN_PX,
            fetch_timeout: defaults.image_timeout,
            observed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin.max(0.0);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    fn observations(&self) -> MutexGuard<'_, HashMap<u64, Observation>> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mount an image at `bounds`. It renders its placeholder until a
    /// viewport change brings it within the margin.
    pub fn mount(self: &Arc<Self>, url: impl Into<String>, bounds: Rect) -> LazyImage {
        let url = url.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (state, receiver) = watch::channel(ImageState::Placeholder);

        self.observations().insert(
            id,
            Observation {
                url: url.clone(),
                bounds,
                state,
            },
        );

        LazyImage {
            id,
            url,
            state: receiver,
            loader: Arc::clone(self),
        }
    }

    /// Number of images still waiting for visibility.
    pub fn observed_count(&self) -> usize {
        self.observations().len()
    }

    fn is_observing(&self, id: u64) -> bool {
        self.observations().contains_key(&id)
    }

    fn relayout(&self, id: u64, bounds: Rect) {
        if let Some(observation) = self.observations().get_mut(&id) {
            observation.bounds = bounds;
        }
    }

    fn unobserve(&self, id: u64) {
        self.observations().remove(&id);
    }

    /// React to a scroll or resize. Every observed image within the margin of
    /// `viewport` stops being observed and is resolved. Images sharing a URL
    /// are resolved once and all receive the same state.
    ///
    /// Waits until the slowest triggered image has settled, bounded by the
    /// fetch timeout; returns how many images were triggered.
    pub async fn viewport_changed(&self, viewport: Rect) -> usize {
        let zone = viewport.expand(self.margin);

        let triggered: Vec<Observation> = {
            let mut observed = self.observations();
            let ids: Vec<u64> = observed
                .iter()
                .filter(|(_, o)| o.bounds.intersects(&zone))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| observed.remove(id)).collect()
        };

        let count = triggered.len();
        let mut by_url: HashMap<String, Vec<watch::Sender<ImageState>>> = HashMap::new();
        for observation in triggered {
            observation.state.send_replace(ImageState::Loading);
            by_url
                .entry(observation.url)
                .or_default()
                .push(observation.state);
        }

        let mut tasks = JoinSet::new();
        for (url, senders) in by_url {
            let cache = self.cache.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.fetch_timeout;

            tasks.spawn(async move {
                let resolved = resolve(&cache, fetcher.as_ref(), timeout, &url).await;
                let state = match resolved {
                    Resolved::Cached(bytes) => ImageState::Loaded {
                        bytes: Arc::new(bytes),
                        from_cache: true,
                    },
                    Resolved::Fetched(bytes) => ImageState::Loaded {
                        bytes: Arc::new(bytes),
                        from_cache: false,
                    },
                    Resolved::Failed(error) => ImageState::Fallback { url, error },
                };
                for sender in senders {
                    sender.send_replace(state.clone());
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Image load task failed: {}", e);
            }
        }

        count
    }

    /// Warm the cache for `urls` without mounting anything.
    pub async fn prefetch<I, S>(&self, urls: I) -> PrefetchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for url in urls.into_iter().map(Into::into) {
            if !seen.insert(url.clone()) {
                continue;
            }
            let cache = self.cache.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.fetch_timeout;
            tasks.spawn(async move { resolve(&cache, fetcher.as_ref(), timeout, &url).await });
        }

        let mut report = PrefetchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Resolved::Cached(_)) => report.cached += 1,
                Ok(Resolved::Fetched(_)) => report.fetched += 1,
                Ok(Resolved::Failed(_)) => report.failed += 1,
                Err(e) => {
                    tracing::error!("Image prefetch task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Image prefetch: {} cached, {} fetched, {} failed",
            report.cached,
            report.fetched,
            report.failed
        );
        report
    }
}

/// Cache first, then network. Cache failures only cost the acceleration.
async fn resolve(
    cache: &LocalStore,
    fetcher: &dyn ImageFetcher,
    timeout: Duration,
    url: &str,
) -> Resolved {
    match cache.get_cached_image(url).await {
        Ok(Some(hit)) => return Resolved::Cached(hit.bytes),
        Ok(None) => {}
        Err(e) => tracing::warn!("Image cache lookup failed for {}: {}", url, e),
    }

    let fetched = match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };

    match fetched {
        Ok(bytes) => {
            if let Err(e) = cache.cache_image(url, &bytes).await {
                tracing::warn!("Could not cache image {}: {}", url, e);
            }
            Resolved::Fetched(bytes)
        }
        Err(e) => {
            tracing::warn!("Image fetch failed for {}: {}", url, e);
            Resolved::Failed(e)
        }
    }
}

/// A mounted image. Dropping it (unmounting) stops its observation.
pub struct LazyImage {
    id: u64,
    url: String,
    state: watch::Receiver<ImageState>,
    loader: Arc<ImageLoader>,
}

impl LazyImage {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    /// Whether this image is still waiting to be triggered.
    pub fn is_observed(&self) -> bool {
        self.loader.is_observing(self.id)
    }

    /// Move the element after a layout change.
    pub fn set_bounds(&self, bounds: Rect) {
        self.loader.relayout(self.id, bounds);
    }

    /// Wait until the image has loaded or fallen back.
    pub async fn settled(&mut self) -> ImageState {
        if let Ok(state) = self.state.wait_for(ImageState::is_settled).await {
            return state.clone();
        }
        // Loader dropped the sender; report the last state it published.
        self.state()
    }
}

impl Drop for LazyImage {
    fn drop(&mut self) {
        self.loader.unobserve(self.id);
    }
}

impl std::fmt::Debug for LazyImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyImage")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const PHOTO: &str = "https://cdn.example/look.jpg";
    const MISSING: &str = "https://cdn.example/gone.jpg";

    /// Serves fixed bytes for `PHOTO` and 404 for anything else.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url == PHOTO {
                Ok(vec![0xFF, 0xD8, 0xFF])
            } else {
                Err(FetchError::Status(404))
            }
        }
    }

    struct Fixture {
        loader: Arc<ImageLoader>,
        fetcher: Arc<CountingFetcher>,
        cache: LocalStore,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cache = LocalStore::new(dir.path().join("cache.sqlite"));
            let fetcher = Arc::new(CountingFetcher::default());
            let loader = Arc::new(ImageLoader::new(cache.clone(), fetcher.clone()));
            Self {
                loader,
                fetcher,
                cache,
                _dir: dir,
            }
        }

        fn calls(&self) -> usize {
            self.fetcher.calls.load(Ordering::SeqCst)
        }
    }

    fn viewport() -> Rect {
        Rect::new(0.0, 0.0, 400.0, 800.0)
    }

    fn below_fold(offset: f64) -> Rect {
        Rect::new(0.0, 800.0 + offset, 200.0, 200.0)
    }

    #[tokio::test]
    async fn test_mount_renders_placeholder_until_near() {
        let fx = Fixture::new();
        let image = fx.loader.mount(PHOTO, below_fold(200.0));

        assert_eq!(image.state(), ImageState::Placeholder);
        assert!(image.is_observed());

        assert_eq!(fx.loader.viewport_changed(viewport()).await, 0);
        assert_eq!(image.state(), ImageState::Placeholder);
        assert_eq!(fx.calls(), 0);

        image.set_bounds(below_fold(30.0));
        assert_eq!(fx.loader.viewport_changed(viewport()).await, 1);

        assert_eq!(
            image.state(),
            ImageState::Loaded {
                bytes: Arc::new(vec![0xFF, 0xD8, 0xFF]),
                from_cache: false
            }
        );
        assert!(!image.is_observed());
        assert_eq!(fx.calls(), 1);
    }

    #[tokio::test]
    async fn test_custom_margin_changes_trigger_distance() {
        let fx = Fixture::new();
        let loader = Arc::new(
            ImageLoader::new(fx.cache.clone(), fx.fetcher.clone()).with_margin(300.0),
        );
        let image = loader.mount(PHOTO, below_fold(200.0));

        assert_eq!(loader.viewport_changed(viewport()).await, 1);
        assert!(image.state().is_settled());
    }

    #[tokio::test]
    async fn test_triggers_at_most_once_per_mount() {
        let fx = Fixture::new();
        let image = fx.loader.mount(PHOTO, Rect::new(0.0, 0.0, 100.0, 100.0));

        fx.loader.viewport_changed(viewport()).await;
        fx.loader.viewport_changed(viewport()).await;
        fx.loader.viewport_changed(viewport()).await;

        assert_eq!(fx.calls(), 1);
        assert!(image.state().is_settled());
    }

    #[tokio::test]
    async fn test_same_url_in_one_batch_fetches_once() {
        let fx = Fixture::new();
        let top = fx.loader.mount(PHOTO, Rect::new(0.0, 0.0, 100.0, 100.0));
        let bottom = fx.loader.mount(PHOTO, Rect::new(0.0, 300.0, 100.0, 100.0));
        let other = fx.loader.mount(MISSING, Rect::new(200.0, 0.0, 100.0, 100.0));

        assert_eq!(fx.loader.viewport_changed(viewport()).await, 3);

        assert_eq!(fx.calls(), 2);
        let expected = ImageState::Loaded {
            bytes: Arc::new(vec![0xFF, 0xD8, 0xFF]),
            from_cache: false,
        };
        assert_eq!(top.state(), expected);
        assert_eq!(bottom.state(), expected);
        assert!(other.state().is_error());
    }

    #[tokio::test]
    async fn test_remount_is_served_from_cache() {
        let fx = Fixture::new();
        let first = fx.loader.mount(PHOTO, Rect::new(0.0, 0.0, 100.0, 100.0));
        fx.loader.viewport_changed(viewport()).await;
        drop(first);

        let second = fx.loader.mount(PHOTO, Rect::new(0.0, 0.0, 100.0, 100.0));
        fx.loader.viewport_changed(viewport()).await;

        assert_eq!(fx.calls(), 1);
        assert!(matches!(
            second.state(),
            ImageState::Loaded {
                from_cache: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_url() {
        let fx = Fixture::new();
        let image = fx.loader.mount(MISSING, Rect::new(0.0, 0.0, 100.0, 100.0));

        fx.loader.viewport_changed(viewport()).await;

        let state = image.state();
        assert!(state.is_error());
        assert_eq!(state.display_source(), Some(DisplaySource::Url(MISSING)));
        assert!(fx.cache.get_cached_image(MISSING).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unmount_deregisters_observer() {
        let fx = Fixture::new();
        let images: Vec<LazyImage> = (0..10)
            .map(|i| fx.loader.mount(PHOTO, below_fold(500.0 + i as f64 * 250.0)))
            .collect();
        assert_eq!(fx.loader.observed_count(), 10);

        drop(images);

        assert_eq!(fx.loader.observed_count(), 0);
        assert_eq!(fx.loader.viewport_changed(Rect::new(0.0, 0.0, 400.0, 5000.0)).await, 0);
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_cache_still_loads_from_network() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let cache = LocalStore::new(blocker.join("cache.sqlite"));
        let fetcher = Arc::new(CountingFetcher::default());
        let loader = Arc::new(ImageLoader::new(cache, fetcher.clone()));

        let mut image = loader.mount(PHOTO, Rect::new(0.0, 0.0, 10.0, 10.0));
        loader.viewport_changed(viewport()).await;

        assert!(matches!(
            image.settled().await,
            ImageState::Loaded {
                from_cache: false,
                ..
            }
        ));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_reports_each_url_once() {
        let fx = Fixture::new();

        let report = fx.loader.prefetch([PHOTO, PHOTO, MISSING]).await;
        assert_eq!(
            report,
            PrefetchReport {
                cached: 0,
                fetched: 1,
                failed: 1
            }
        );

        let report = fx.loader.prefetch([PHOTO]).await;
        assert_eq!(report.cached, 1);
        assert_eq!(fx.calls(), 2);
    }
}
