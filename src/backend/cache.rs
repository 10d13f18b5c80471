use image::DynamicImage;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

#[derive(Debug, Clone)]
pub struct CachedImage {
    pub path: PathBuf,
    pub image: DynamicImage,
}

pub type PageImages = Arc<[CachedImage]>;

/// Subject slug and page number.
type PageKey = (String, u32);

/// Filled once; concurrent callers for the same page wait on the same load.
type PageSlot = Arc<OnceCell<PageImages>>;

/// Decoded images per page. Unbounded unless a capacity is given, in which
/// case the least recently used page is dropped and decoded again on demand.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<RwLock<ImageCacheInner>>,
}

struct ImageCacheInner {
    pages: HashMap<PageKey, PageSlot>,
    access_order: Vec<PageKey>,
    capacity: Option<usize>,
}

impl ImageCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ImageCacheInner {
                pages: HashMap::new(),
                access_order: Vec::new(),
                capacity,
            })),
        }
    }

    /// Returns the cached page or runs `load` and caches its result. A caller
    /// arriving while another is loading the same page waits for that load
    /// instead of starting its own.
    pub async fn get_or_load<F>(&self, slug: &str, page: u32, load: F) -> PageImages
    where
        F: Future<Output = Vec<CachedImage>>,
    {
        let slot = self.slot(slug, page).await;
        let images = slot.get_or_init(move || async move { load.await.into() }).await;
        Arc::clone(images)
    }

    async fn slot(&self, slug: &str, page: u32) -> PageSlot {
        let key = (slug.to_string(), page);
        let mut inner = self.inner.write().await;

        if let Some(slot) = inner.pages.get(&key).cloned() {
            inner.touch(key);
            return slot;
        }

        let slot = PageSlot::default();
        inner.insert(key, Arc::clone(&slot));
        slot
    }

    #[cfg(test)]
    pub async fn has_page(&self, slug: &str, page: u32) -> bool {
        let inner = self.inner.read().await;
        inner
            .pages
            .get(&(slug.to_string(), page))
            .is_some_and(|slot| slot.initialized())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.pages.len()
    }
}

impl ImageCacheInner {
    fn touch(&mut self, key: PageKey) {
        self.access_order.retain(|k| k != &key);
        self.access_order.push(key);
    }

    fn insert(&mut self, key: PageKey, slot: PageSlot) {
        if let Some(capacity) = self.capacity {
            while !self.pages.contains_key(&key) && self.pages.len() >= capacity {
                if self.access_order.is_empty() {
                    break;
                }
                let oldest = self.access_order.remove(0);
                self.pages.remove(&oldest);
                log::debug!("Evicted page {} of {} from image cache", oldest.1, oldest.0);
            }
        }

        self.touch(key.clone());
        self.pages.insert(key, slot);
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(None)
    }
}
