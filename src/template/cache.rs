//! The process-wide template cache.
//!
//! Parsing a template is cheap but not free, and servers log the same handful of templates
//! millions of times. The cache keys parsed templates by their text; the hot path is a read-lock
//! lookup plus one atomic store for the access stamp. Eviction is LRU up to `max_size`, with an
//! optional TTL checked on access.
//!
//! There is one global instance behind [`global`]; tests create private ones through
//! [`TemplateCache::new`] so they can poke at sizes and TTLs without fighting each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::RwLock;

use super::Template;

/// Default number of cached templates.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Counters exposed by [`TemplateCache::stats`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups satisfied from the cache.
    pub hits: u64,
    /// Lookups that had to parse.
    pub misses: u64,
    /// Entries evicted (LRU or TTL).
    pub evictions: u64,
    /// Current number of cached templates.
    pub size: usize,
}

struct Entry {
    template: Arc<Template>,
    // Milliseconds since the cache epoch; doubles as the LRU stamp and the TTL clock.
    last_access: AtomicU64,
}

struct Inner {
    map: HashMap<String, Entry>,
    max_size: usize,
    ttl: Option<Duration>,
}

/// A bounded cache of parsed templates.
pub struct TemplateCache {
    epoch: Instant,
    inner: RwLock<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    /// Creates a cache with the given bound and optional TTL.
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        TemplateCache {
            epoch: Instant::now(),
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                max_size,
                ttl,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Looks a template up without parsing on miss.
    pub fn get(&self, text: &str) -> Option<Arc<Template>> {
        let now = self.now_ms();
        let expired = {
            let inner = self.inner.read();
            match inner.map.get(text) {
                Some(entry) => {
                    let age = now.saturating_sub(entry.last_access.load(Ordering::Relaxed));
                    match inner.ttl {
                        Some(ttl) if age > ttl.as_millis() as u64 => true,
                        _ => {
                            entry.last_access.store(now, Ordering::Relaxed);
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Some(Arc::clone(&entry.template));
                        }
                    }
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };
        if expired {
            let mut inner = self.inner.write();
            // Somebody may have refreshed it between the locks; only drop a stale entry.
            let still_stale = inner.map.get(text).map_or(false, |e| {
                let age = now.saturating_sub(e.last_access.load(Ordering::Relaxed));
                inner.ttl.map_or(false, |ttl| age > ttl.as_millis() as u64)
            });
            if still_stale {
                inner.map.remove(text);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts a parsed template, evicting the least recently used entries past the bound.
    pub fn put(&self, text: &str, template: Arc<Template>) {
        let now = self.now_ms();
        let mut inner = self.inner.write();
        inner.map.insert(
            text.to_owned(),
            Entry {
                template,
                last_access: AtomicU64::new(now),
            },
        );
        let evicted = Self::shrink(&mut inner);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Parses through the cache: the hot path for every logging call.
    ///
    /// Text that fails to parse is cached as a single literal token, so a bad template does not
    /// pay the parse cost (or log a complaint) on every call.
    pub fn parse(&self, text: &str) -> Arc<Template> {
        if let Some(t) = self.get(text) {
            return t;
        }
        let template = Arc::new(Template::parse(text).unwrap_or_else(|e| {
            crate::selflog!("template parse failed, rendering literally: {}", e);
            Template::literal(text)
        }));
        self.put(text, Arc::clone(&template));
        template
    }

    /// Reconfigures the bound and TTL; shrinks immediately if needed.
    pub fn configure(&self, max_size: usize, ttl: Option<Duration>) {
        let mut inner = self.inner.write();
        inner.max_size = max_size;
        inner.ttl = ttl;
        let evicted = Self::shrink(&mut inner);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Drops every cached template. Counters keep their values.
    pub fn clear(&self) {
        self.inner.write().map.clear();
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.inner.read().map.len(),
        }
    }

    fn shrink(inner: &mut Inner) -> u64 {
        let mut evicted = 0;
        while inner.map.len() > inner.max_size {
            let oldest = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    inner.map.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

lazy_static! {
    static ref GLOBAL: TemplateCache = TemplateCache::new(DEFAULT_MAX_SIZE, None);
}

/// The process-wide cache used by loggers.
pub fn global() -> &'static TemplateCache {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn hit_and_miss_counting() {
        let cache = TemplateCache::new(10, None);
        assert!(cache.get("a {B}").is_none());
        let t = cache.parse("a {B}");
        assert_eq!(t.raw(), "a {B}");
        let again = cache.parse("a {B}");
        assert!(Arc::ptr_eq(&t, &again));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        // One from the explicit get, one from the miss inside the first parse.
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn lru_eviction() {
        let cache = TemplateCache::new(2, None);
        cache.parse("one {A}");
        sleep(Duration::from_millis(5));
        cache.parse("two {A}");
        sleep(Duration::from_millis(5));
        // Touch the oldest so "two" becomes the victim.
        cache.parse("one {A}");
        cache.parse("three {A}");
        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 1);
        assert!(cache.get("one {A}").is_some());
        assert!(cache.get("two {A}").is_none());
    }

    #[test]
    fn ttl_eviction_on_access() {
        let cache = TemplateCache::new(10, Some(Duration::from_millis(20)));
        cache.parse("stale {A}");
        sleep(Duration::from_millis(50));
        assert!(cache.get("stale {A}").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn parse_failure_falls_back_to_literal() {
        let cache = TemplateCache::new(10, None);
        let t = cache.parse("broken {Name");
        assert_eq!(t.tokens().len(), 1);
        assert_eq!(t.render(&Default::default()), "broken {Name");
    }

    #[test]
    fn clear_and_configure() {
        let cache = TemplateCache::new(10, None);
        for i in 0..5 {
            cache.parse(&format!("t {{N{}}}", i));
        }
        assert_eq!(cache.stats().size, 5);
        cache.configure(3, None);
        assert_eq!(cache.stats().size, 3);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
