use std::sync::atomic::{AtomicU32, Ordering};

use gatekey_keystore::{KeyStore, SeaOrmKeyStore};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn fresh_store() -> SeaOrmKeyStore {
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dsn = format!("sqlite://file:gatekey_store_test_{n}?mode=memory&cache=shared");
    let store = SeaOrmKeyStore::connect(&dsn).await.expect("connect");
    store.sync().await.expect("sync schema");
    store
}

#[tokio::test]
async fn pick_next_available_marks_in_use_and_is_fifo() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();
    store.add("key_b", "secret-b", "b***").await.unwrap();

    let picked = store
        .pick_next_available_and_lock()
        .await
        .unwrap()
        .expect("a key is available");
    assert_eq!(picked.identifier, "key_a");

    let state = store.get_state("key_a").await.unwrap().unwrap();
    assert!(state.is_in_use);
    assert!(!state.is_cooled_down);

    let picked2 = store
        .pick_next_available_and_lock()
        .await
        .unwrap()
        .expect("the other key is available");
    assert_eq!(picked2.identifier, "key_b");

    assert!(
        store
            .pick_next_available_and_lock()
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn mutual_exclusion_of_in_use_and_cooling() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();

    store.pick_next_available_and_lock().await.unwrap();
    store.move_to_cooldown("key_a", 9_999_999_999.0).await.unwrap();

    let state = store.get_state("key_a").await.unwrap().unwrap();
    assert!(state.is_cooled_down);
    assert!(!state.is_in_use);
}

#[tokio::test]
async fn release_without_cooldown_returns_key_to_available_pool() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();
    store.pick_next_available_and_lock().await.unwrap();

    store.release_from_use("key_a").await.unwrap();
    let state = store.get_state("key_a").await.unwrap().unwrap();
    assert!(state.is_available());

    assert!(
        store
            .pick_next_available_and_lock()
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn releasable_keys_are_listed_once_past_deadline() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();
    store.pick_next_available_and_lock().await.unwrap();
    store.move_to_cooldown("key_a", 100.0).await.unwrap();

    assert!(store.list_releasable(50.0).await.unwrap().is_empty());
    let releasable = store.list_releasable(150.0).await.unwrap();
    assert_eq!(releasable.len(), 1);
    assert_eq!(releasable[0].identifier, "key_a");
}

#[tokio::test]
async fn reset_clears_counters_and_flags() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();
    store.pick_next_available_and_lock().await.unwrap();
    store.move_to_cooldown("key_a", 9_999_999_999.0).await.unwrap();

    store.reset("key_a").await.unwrap();
    let state = store.get_state("key_a").await.unwrap().unwrap();
    assert!(state.is_available());
    assert_eq!(state.request_fail_count, 0);
    assert_eq!(state.cool_down_entry_count, 0);
}

#[tokio::test]
async fn counts_reflect_the_three_mutually_exclusive_buckets() {
    let store = fresh_store().await;
    store.add("key_a", "secret-a", "a***").await.unwrap();
    store.add("key_b", "secret-b", "b***").await.unwrap();
    store.add("key_c", "secret-c", "c***").await.unwrap();

    store.pick_next_available_and_lock().await.unwrap(); // key_a -> in_use
    store.move_to_cooldown("key_b", 9_999_999_999.0).await.unwrap(); // key_b -> cooling (from available)

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.in_use, 1);
    assert_eq!(counts.cooled, 1);
    assert_eq!(counts.available, 1);
}
