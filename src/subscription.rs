//! Live snapshot subscriptions
//!
//! A subscription is one spawned task per `(collection, owner)` pair. It reads
//! the full owner-scoped result set, delivers it, then waits on the store's
//! live query for the next relevant change and repeats. Because a single task
//! produces every delivery, deliveries for one subscription are strictly
//! ordered and `Snapshot::version` strictly increases. Nothing is ordered
//! across subscriptions.
//!
//! Errors end the subscription: `on_error` runs once and no retry happens.

use crate::error::{CrmError, Result};
use crate::mapper::{map_documents, MalformedPolicy, Record};
use crate::owner::{OwnerId, OWNER_FIELD};
use crate::store::{DocumentStore, FieldFilter, LiveQuery};
use futures::Stream;
use serde::Serialize;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Full result set of a live query at one point in time.
///
/// Each snapshot supersedes every earlier one of the same subscription.
/// Record order is whatever the store returns and is not stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub version: u64,
    pub records: Vec<T>,
    /// Documents dropped by [`MalformedPolicy::SkipAndLog`].
    pub skipped: usize,
}

/// Idempotent cancellation token returned by [`SubscriptionManager::subscribe`].
///
/// Dropping the handle does NOT cancel; call [`CancelHandle::cancel`] or hold
/// the guard from [`CancelHandle::cancel_on_drop`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    gate: Arc<DeliveryGate>,
    collection: &'static str,
    owner: OwnerId,
}

impl CancelHandle {
    /// Stop further deliveries and release the live query.
    ///
    /// Once this returns, neither callback is invoked again. A delivery
    /// running on another thread is waited for; calling `cancel` from inside a
    /// callback returns immediately. Repeated calls are no-ops.
    ///
    /// The wait is a blocking one: called from async code while a callback
    /// runs on another worker, it parks the calling worker thread until that
    /// callback returns. Callbacks are synchronous and expected to be short;
    /// when that cannot be guaranteed, call `cancel` from
    /// `tokio::task::spawn_blocking` or drop a [`cancel_on_drop`](Self::cancel_on_drop)
    /// guard, which signals without waiting.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(collection = self.collection, owner = %self.owner, "Subscription cancelled");
            self.token.cancel();
        }
        self.gate.wait_idle();
    }

    /// True once cancelled or terminated by an error.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tie the subscription's lifetime to the returned guard.
    ///
    /// Dropping the guard signals cancellation without waiting for an
    /// in-flight delivery.
    pub fn cancel_on_drop(self) -> DropGuard {
        self.token.drop_guard()
    }
}

/// Serialises callback invocations against [`CancelHandle::cancel`].
#[derive(Debug, Default)]
struct DeliveryGate {
    lock: Mutex<()>,
    delivering_on: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    /// Run `deliver` unless `token` is cancelled. Returns whether it ran.
    fn deliver(&self, token: &CancellationToken, deliver: impl FnOnce()) -> bool {
        let _held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            return false;
        }
        self.set_delivering(Some(thread::current().id()));
        deliver();
        self.set_delivering(None);
        true
    }

    /// Wait for an in-flight delivery to return, unless it is the caller.
    fn wait_idle(&self) {
        let current = *self
            .delivering_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current != Some(thread::current().id()) {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn set_delivering(&self, thread: Option<ThreadId>) {
        *self
            .delivering_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = thread;
    }
}

/// Typed stream form of a subscription.
///
/// Yields `Ok(snapshot)` per delivery; after an `Err` item the stream ends.
/// Dropping the stream cancels the subscription.
pub struct SnapshotStream<T> {
    inner: UnboundedReceiverStream<Result<Snapshot<T>>>,
    handle: CancelHandle,
    _guard: DropGuard,
}

impl<T> SnapshotStream<T> {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl<T> Stream for SnapshotStream<T> {
    type Item = Result<Snapshot<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Opens owner-scoped live queries over the collection of `T`.
pub struct SubscriptionManager<T> {
    store: Arc<dyn DocumentStore>,
    policy: MalformedPolicy,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for SubscriptionManager<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
            _record: PhantomData,
        }
    }
}

impl<T: Record> SubscriptionManager<T> {
    pub fn new(store: Arc<dyn DocumentStore>, policy: MalformedPolicy) -> Self {
        Self {
            store,
            policy,
            _record: PhantomData,
        }
    }

    pub fn policy(&self) -> MalformedPolicy {
        self.policy
    }

    /// Subscribe to every `T` owned by `owner`.
    ///
    /// The live query is registered before this returns, so no change made
    /// afterwards is missed. The first delivery (the initial load) and all
    /// later ones happen on the spawned task, never inside this call.
    /// Must be called from within a tokio runtime.
    pub fn subscribe<U, E>(&self, owner: &OwnerId, on_update: U, on_error: E) -> CancelHandle
    where
        U: FnMut(Snapshot<T>) + Send + 'static,
        E: FnOnce(CrmError) + Send + 'static,
    {
        let live = self
            .store
            .listen(T::COLLECTION, FieldFilter::eq(OWNER_FIELD, owner.as_str()));
        let token = CancellationToken::new();
        let gate = Arc::new(DeliveryGate::default());
        let handle = CancelHandle {
            token: token.clone(),
            gate: gate.clone(),
            collection: T::COLLECTION,
            owner: owner.clone(),
        };

        debug!(collection = T::COLLECTION, owner = %owner, "Subscription opened");
        tokio::spawn(drive::<T, U, E>(
            self.store.clone(),
            self.policy,
            live,
            token,
            gate,
            owner.clone(),
            on_update,
            on_error,
        ));
        handle
    }

    /// Like [`subscribe`](Self::subscribe) for a raw owner id, failing fast
    /// with `InvalidArgument` when it is blank.
    pub fn try_subscribe<U, E>(&self, owner: &str, on_update: U, on_error: E) -> Result<CancelHandle>
    where
        U: FnMut(Snapshot<T>) + Send + 'static,
        E: FnOnce(CrmError) + Send + 'static,
    {
        let owner = OwnerId::new(owner)?;
        Ok(self.subscribe(&owner, on_update, on_error))
    }

    /// Subscribe and receive deliveries as a stream.
    pub fn snapshots(&self, owner: &OwnerId) -> SnapshotStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let err_tx = tx.clone();
        let handle = self.subscribe(
            owner,
            move |snapshot| {
                let _ = tx.send(Ok(snapshot));
            },
            move |err| {
                let _ = err_tx.send(Err(err));
            },
        );
        SnapshotStream {
            inner: UnboundedReceiverStream::new(rx),
            _guard: handle.clone().cancel_on_drop(),
            handle,
        }
    }

    /// One-shot read of the current owner-scoped set.
    pub async fn fetch(&self, owner: &OwnerId) -> Result<Vec<T>> {
        let docs = self
            .store
            .query(T::COLLECTION, &FieldFilter::eq(OWNER_FIELD, owner.as_str()))
            .await?;
        let (records, _) = map_documents::<T>(&docs, self.policy)?;
        Ok(records)
    }
}

async fn drive<T, U, E>(
    store: Arc<dyn DocumentStore>,
    policy: MalformedPolicy,
    mut live: LiveQuery,
    token: CancellationToken,
    gate: Arc<DeliveryGate>,
    owner: OwnerId,
    mut on_update: U,
    on_error: E,
) where
    T: Record,
    U: FnMut(Snapshot<T>) + Send + 'static,
    E: FnOnce(CrmError) + Send + 'static,
{
    let outcome = pump::<T, U>(
        &*store,
        policy,
        &mut live,
        &token,
        &gate,
        &owner,
        &mut on_update,
    )
    .await;

    if let Err(err) = outcome {
        if !token.is_cancelled() {
            warn!(
                collection = T::COLLECTION,
                owner = %owner,
                error = %err,
                "Subscription terminated"
            );
            gate.deliver(&token, || {
                token.cancel();
                on_error(err);
            });
        }
    }
    token.cancel();
}

/// Read, deliver, wait; until cancelled (`Ok`) or failed (`Err`).
async fn pump<T, U>(
    store: &dyn DocumentStore,
    policy: MalformedPolicy,
    live: &mut LiveQuery,
    token: &CancellationToken,
    gate: &DeliveryGate,
    owner: &OwnerId,
    on_update: &mut U,
) -> Result<()>
where
    T: Record,
    U: FnMut(Snapshot<T>),
{
    let filter = live.filter().clone();
    let mut version = 0u64;

    loop {
        let docs = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            docs = store.query(T::COLLECTION, &filter) => docs?,
        };
        let (records, skipped) = map_documents::<T>(&docs, policy)?;

        version += 1;
        debug!(
            collection = T::COLLECTION,
            owner = %owner,
            version,
            records = records.len(),
            skipped,
            "Delivering snapshot"
        );
        let snapshot = Snapshot {
            version,
            records,
            skipped,
        };
        if !gate.deliver(token, || on_update(snapshot)) {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            changed = live.changed() => changed?,
        }
        live.drain()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{DocumentReader, FromDocument, MappingError};
    use crate::store::{Document, Fields, MemoryDocumentStore};
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        label: String,
    }

    impl FromDocument for Item {
        fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
            let r = DocumentReader::new(doc);
            Ok(Self {
                id: r.id().to_string(),
                label: r.str("label")?,
            })
        }
    }

    impl Record for Item {
        const COLLECTION: &'static str = "items";
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(owner: &str, label: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("ownerId".into(), json!(owner));
        f.insert("label".into(), json!(label));
        f
    }

    async fn next<T>(stream: &mut SnapshotStream<T>) -> Result<Snapshot<T>> {
        timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for a delivery")
            .expect("stream ended")
    }

    fn setup() -> (Arc<MemoryDocumentStore>, SubscriptionManager<Item>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = SubscriptionManager::new(store.clone(), MalformedPolicy::SkipAndLog);
        (store, manager)
    }

    #[tokio::test]
    async fn test_initial_load_then_changes() {
        let (store, manager) = setup();
        store.add("items", item("u1", "pre-existing")).await.unwrap();

        let owner = OwnerId::new("u1").unwrap();
        let mut stream = manager.snapshots(&owner);

        let first = next(&mut stream).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.records.len(), 1);

        store.add("items", item("u1", "second")).await.unwrap();
        let second = next(&mut stream).await.unwrap();
        assert!(second.version > first.version);
        assert_eq!(second.records.len(), 2);
    }

    #[tokio::test]
    async fn test_try_subscribe_rejects_blank_owner() {
        let (store, manager) = setup();
        let err = manager.try_subscribe("  ", |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, CrmError::InvalidArgument(_)));
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_fault_is_delivered_once_and_ends_stream() {
        let (store, manager) = setup();
        let owner = OwnerId::new("u1").unwrap();
        let mut stream = manager.snapshots(&owner);
        next(&mut stream).await.unwrap();

        store.disconnect("network down");
        let err = next(&mut stream).await.unwrap_err();
        assert!(matches!(err, CrmError::Unavailable(_)));
        assert!(stream.handle().is_closed());

        let end = timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_abort_policy_terminates_on_malformed_record() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager: SubscriptionManager<Item> =
            SubscriptionManager::new(store.clone(), MalformedPolicy::AbortSnapshot);
        let mut bad = Fields::new();
        bad.insert("ownerId".into(), json!("u1"));
        store.add("items", bad).await.unwrap();

        let mut stream = manager.snapshots(&OwnerId::new("u1").unwrap());
        let err = next(&mut stream).await.unwrap_err();
        assert!(matches!(err, CrmError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_skip_policy_counts_skipped() {
        let (store, manager) = setup();
        let mut bad = Fields::new();
        bad.insert("ownerId".into(), json!("u1"));
        store.add("items", bad).await.unwrap();
        store.add("items", item("u1", "good")).await.unwrap();

        let mut stream = manager.snapshots(&OwnerId::new("u1").unwrap());
        let snap = next(&mut stream).await.unwrap();
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.records[0].label, "good");
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_live_query() {
        let (store, manager) = setup();
        let mut stream = manager.snapshots(&OwnerId::new("u1").unwrap());
        next(&mut stream).await.unwrap();
        assert_eq!(store.listener_count(), 1);

        drop(stream);
        timeout(Duration::from_secs(2), async {
            while store.listener_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("live query was not released");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_inside_callback_stops_deliveries() {
        let (store, manager) = setup();
        let owner = OwnerId::new("u1").unwrap();
        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));

        let (counter, handle_slot) = (delivered.clone(), slot.clone());
        let handle = manager.subscribe(
            &owner,
            move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if let Some(handle) = handle_slot.lock().unwrap().as_ref() {
                    handle.cancel();
                }
            },
            |_| {},
        );
        *slot.lock().unwrap() = Some(handle.clone());

        timeout(Duration::from_secs(2), async {
            while delivered.load(std::sync::atomic::Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("no initial delivery");

        // The first delivery may have run before the handle was stored.
        handle.cancel();
        let seen = delivered.load(std::sync::atomic::Ordering::SeqCst);
        store.add("items", item("u1", "after")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(std::sync::atomic::Ordering::SeqCst), seen);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_fetch_is_owner_scoped() {
        let (store, manager) = setup();
        store.add("items", item("u1", "mine")).await.unwrap();
        store.add("items", item("u2", "theirs")).await.unwrap();

        let mine = manager.fetch(&OwnerId::new("u1").unwrap()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].label, "mine");
    }
}
