// ═══════════════════════════════════════════════════════════════════
// Cache Tests — TTL expiry and bounded eviction
// ═══════════════════════════════════════════════════════════════════

use std::thread::sleep;
use std::time::Duration;

use saxofolio_core::services::cache::BoundedCache;

#[test]
fn insert_then_get() {
    let cache: BoundedCache<String, i32> = BoundedCache::new(8, Duration::from_secs(60));
    cache.insert("quote:211".to_string(), 42);
    assert_eq!(cache.get(&"quote:211".to_string()), Some(42));
    assert_eq!(cache.get(&"quote:999".to_string()), None);
}

#[test]
fn overwrite_replaces_the_value() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(8, Duration::from_secs(60));
    cache.insert("k", 1);
    cache.insert("k", 2);
    assert_eq!(cache.get(&"k"), Some(2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn entries_expire_after_ttl() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(8, Duration::from_millis(30));
    cache.insert("k", 1);
    assert_eq!(cache.get(&"k"), Some(1));

    sleep(Duration::from_millis(60));
    assert_eq!(cache.get(&"k"), None);
    // The expired entry is dropped, not just hidden.
    assert!(cache.is_empty());
}

#[test]
fn full_cache_evicts_the_oldest_entry() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(2, Duration::from_secs(60));
    cache.insert("oldest", 1);
    sleep(Duration::from_millis(5));
    cache.insert("middle", 2);
    sleep(Duration::from_millis(5));
    cache.insert("newest", 3);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"oldest"), None);
    assert_eq!(cache.get(&"middle"), Some(2));
    assert_eq!(cache.get(&"newest"), Some(3));
}

#[test]
fn expired_entries_are_evicted_before_live_ones() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(2, Duration::from_millis(40));
    cache.insert("short-lived", 1);
    sleep(Duration::from_millis(60));

    // Both inserts fit because the dead entry is swept first.
    cache.insert("a", 2);
    cache.insert("b", 3);
    assert_eq!(cache.get(&"a"), Some(2));
    assert_eq!(cache.get(&"b"), Some(3));
}

#[test]
fn overwriting_at_capacity_does_not_evict_neighbours() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(2, Duration::from_secs(60));
    cache.insert("a", 1);
    cache.insert("b", 2);
    cache.insert("a", 10);

    assert_eq!(cache.get(&"a"), Some(10));
    assert_eq!(cache.get(&"b"), Some(2));
}

#[test]
fn zero_capacity_is_clamped_to_one() {
    let cache: BoundedCache<&str, i32> = BoundedCache::new(0, Duration::from_secs(60));
    cache.insert("a", 1);
    assert_eq!(cache.get(&"a"), Some(1));
    cache.insert("b", 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&"b"), Some(2));
}
