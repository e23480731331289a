// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! In-process object store for the core worker.
//!
//! Producers publish objects with [`CoreWorkerMemoryStore::put`].
//! Consumers either block on [`CoreWorkerMemoryStore::get`] (any N of M
//! objects, with an optional deadline) or register one-shot callbacks
//! with [`CoreWorkerMemoryStore::get_async`]. Objects a reader wants in
//! the external plasma store are promoted on the producer side via the
//! injected `store_in_plasma` callback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use cirrus_common::id::{ObjectID, TaskTransportType};
use cirrus_common::status::{CirrusError, CirrusResult};
use cirrus_proto::rpc::ErrorType;

/// An immutable object value: data and/or metadata byte buffers.
///
/// Once published to the store an object is shared read-only as
/// `Arc<CirrusObject>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CirrusObject {
    data: Option<Bytes>,
    metadata: Option<Bytes>,
}

impl CirrusObject {
    pub fn new(data: Option<Bytes>, metadata: Option<Bytes>) -> Self {
        Self { data, metadata }
    }

    /// Create a simple data-only object.
    pub fn from_data(data: Bytes) -> Self {
        Self::new(Some(data), None)
    }

    /// Create a failure sentinel whose metadata encodes `error_type`.
    pub fn from_error(error_type: ErrorType) -> Self {
        Self::new(None, Some(Bytes::from((error_type as i32).to_string())))
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    /// The error class carried in the metadata, if this is a sentinel.
    pub fn error_type(&self) -> Option<ErrorType> {
        let metadata = self.metadata.as_ref()?;
        let text = std::str::from_utf8(metadata).ok()?;
        ErrorType::try_from(text.parse::<i32>().ok()?).ok()
    }

    /// Whether this entry is the "real value lives in plasma" marker.
    pub fn is_in_plasma_error(&self) -> bool {
        self.error_type() == Some(ErrorType::ObjectInPlasma)
    }
}

/// One-shot callback fired when an object becomes available.
pub type ObjectReadyCallback = Box<dyn FnOnce(Arc<CirrusObject>) + Send>;

/// Callback that forwards an object into the external plasma store.
/// The ObjectID it receives carries the plasma transport tag.
pub type StoreInPlasma = Box<dyn Fn(&CirrusObject, &ObjectID) + Send + Sync>;

/// A blocking rendezvous for one `get` call: satisfied once any
/// `num_objects` of its `object_ids` have been set.
///
/// The store registers the same request under every ID it waits on, so
/// producers reach it through any of them; the request itself owns the
/// rendezvous state and the store only holds pointers to it.
struct GetRequest {
    object_ids: HashSet<ObjectID>,
    num_objects: usize,
    remove_after_get: bool,
    state: Mutex<GetState>,
    ready: Condvar,
}

struct GetState {
    objects: HashMap<ObjectID, Arc<CirrusObject>>,
    is_ready: bool,
}

impl GetRequest {
    fn new(object_ids: HashSet<ObjectID>, num_objects: usize, remove_after_get: bool) -> Self {
        assert!(num_objects <= object_ids.len());
        Self {
            object_ids,
            num_objects,
            remove_after_get,
            state: Mutex::new(GetState {
                objects: HashMap::new(),
                is_ready: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn object_ids(&self) -> &HashSet<ObjectID> {
        &self.object_ids
    }

    fn should_remove_objects(&self) -> bool {
        self.remove_after_get
    }

    /// Record one object. No-op once the request is ready; idempotent
    /// under duplicate IDs.
    fn set(&self, object_id: ObjectID, object: Arc<CirrusObject>) {
        let mut state = self.state.lock();
        if state.is_ready {
            return;
        }
        state.objects.entry(object_id).or_insert(object);
        if state.objects.len() == self.num_objects {
            state.is_ready = true;
            self.ready.notify_all();
        }
    }

    /// Non-blocking lookup of an object recorded by this request.
    fn get(&self, object_id: &ObjectID) -> Option<Arc<CirrusObject>> {
        self.state.lock().objects.get(object_id).cloned()
    }

    /// Block until the request is ready or the timeout expires.
    /// `None` waits forever. Returns whether the request became ready.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        match timeout {
            None => {
                while !state.is_ready {
                    self.ready.wait(&mut state);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !state.is_ready {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                state.is_ready
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    /// Currently resident values.
    objects: HashMap<ObjectID, Arc<CirrusObject>>,
    /// Blocking waiters, registered per ID. A single GetRequest appears
    /// under each ID it still waits on.
    object_get_requests: HashMap<ObjectID, Vec<Arc<GetRequest>>>,
    /// One-shot async waiters, fired on the first put of the ID.
    object_async_get_requests: HashMap<ObjectID, Vec<ObjectReadyCallback>>,
    /// IDs whose next put must also be forwarded into plasma.
    promoted_to_plasma: HashSet<ObjectID>,
}

/// Thread-safe in-process memory store for direct-call objects.
pub struct CoreWorkerMemoryStore {
    state: Mutex<StoreState>,
    store_in_plasma: Option<StoreInPlasma>,
}

impl CoreWorkerMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            store_in_plasma: None,
        }
    }

    /// Create a store with a plasma provider for large-value promotion.
    pub fn with_plasma_provider(store_in_plasma: StoreInPlasma) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            store_in_plasma: Some(store_in_plasma),
        }
    }

    /// Put an object into the store.
    ///
    /// Returns `ObjectExists` on a duplicate put. Satisfies blocking
    /// waiters, fires pending async callbacks (outside the lock, in
    /// registration order), and forwards the object to plasma if a
    /// promotion was requested. If every blocking waiter consumes on
    /// get, the value is not kept resident.
    pub fn put(&self, object_id: ObjectID, object: &CirrusObject) -> CirrusResult<()> {
        assert!(
            object_id.is_direct_call(),
            "only direct-call objects may enter the memory store"
        );
        let entry = Arc::new(object.clone());

        let mut async_callbacks = Vec::new();
        {
            let mut state = self.state.lock();
            if state.objects.contains_key(&object_id) {
                return Err(CirrusError::object_exists(format!(
                    "object {} already exists in the memory store",
                    object_id.hex()
                )));
            }

            if let Some(callbacks) = state.object_async_get_requests.remove(&object_id) {
                async_callbacks = callbacks;
            }

            if state.promoted_to_plasma.remove(&object_id) {
                let store_in_plasma = self
                    .store_in_plasma
                    .as_ref()
                    .expect("promotion recorded without a plasma provider");
                // Assumed to be a thin enqueue that does not re-enter
                // the store.
                store_in_plasma(
                    object,
                    &object_id.with_transport_type(TaskTransportType::Plasma),
                );
            }

            let mut should_add_entry = true;
            if let Some(get_requests) = state.object_get_requests.get(&object_id) {
                for get_request in get_requests {
                    get_request.set(object_id, Arc::clone(&entry));
                    if get_request.should_remove_objects() {
                        should_add_entry = false;
                    }
                }
            }

            if should_add_entry {
                state.objects.insert(object_id, Arc::clone(&entry));
            }
        }

        // Callbacks may be slow or re-enter the store; run them after
        // releasing the lock.
        for callback in async_callbacks {
            callback(Arc::clone(&entry));
        }

        Ok(())
    }

    /// Get up to `num_objects` of `object_ids`, blocking until enough are
    /// available or `timeout` expires (`None` waits forever).
    ///
    /// `results` is resized to `object_ids.len()`; each slot is filled
    /// with its object or left `None`. Duplicate input IDs are allowed
    /// and each slot is filled independently. With `remove_after_get`,
    /// returned objects are consumed from the store.
    pub fn get(
        &self,
        object_ids: &[ObjectID],
        num_objects: usize,
        timeout: Option<Duration>,
        remove_after_get: bool,
        results: &mut Vec<Option<Arc<CirrusObject>>>,
    ) -> CirrusResult<()> {
        results.clear();
        results.resize(object_ids.len(), None);

        let get_request;
        {
            let mut state = self.state.lock();

            let mut remaining_ids = HashSet::new();
            let mut ids_to_remove = HashSet::new();
            let mut count = 0;
            for (i, object_id) in object_ids.iter().enumerate() {
                if count >= num_objects {
                    break;
                }
                if let Some(entry) = state.objects.get(object_id) {
                    results[i] = Some(Arc::clone(entry));
                    if remove_after_get {
                        // Deferred: the same ID may fill several slots
                        // and all of them must see the value.
                        ids_to_remove.insert(*object_id);
                    }
                    count += 1;
                } else {
                    remaining_ids.insert(*object_id);
                }
            }
            for object_id in &ids_to_remove {
                state.objects.remove(object_id);
            }

            if remaining_ids.is_empty() || count >= num_objects {
                return Ok(());
            }

            // Residual threshold over the distinct remaining IDs.
            let required_objects = num_objects - (object_ids.len() - remaining_ids.len());

            get_request = Arc::new(GetRequest::new(
                remaining_ids,
                required_objects,
                remove_after_get,
            ));
            for object_id in get_request.object_ids() {
                state
                    .object_get_requests
                    .entry(*object_id)
                    .or_default()
                    .push(Arc::clone(&get_request));
            }
        }

        // Wait for the remaining objects with the store unlocked.
        let done = get_request.wait(timeout);

        {
            let mut state = self.state.lock();

            for (i, object_id) in object_ids.iter().enumerate() {
                if results[i].is_none() {
                    results[i] = get_request.get(object_id);
                }
            }

            // Unregister this request from every per-ID waiter list.
            for object_id in get_request.object_ids() {
                if let Some(get_requests) = state.object_get_requests.get_mut(object_id) {
                    get_requests.retain(|request| !Arc::ptr_eq(request, &get_request));
                    if get_requests.is_empty() {
                        state.object_get_requests.remove(object_id);
                    }
                }
            }
        }

        if done {
            Ok(())
        } else {
            Err(CirrusError::timed_out(
                "get timed out: some object(s) not ready",
            ))
        }
    }

    /// Register a one-shot callback for an object.
    ///
    /// Fires immediately (outside the lock) if the object is resident,
    /// otherwise on the next put of the ID.
    pub fn get_async(&self, object_id: ObjectID, callback: ObjectReadyCallback) {
        let entry = {
            let mut state = self.state.lock();
            match state.objects.get(&object_id) {
                Some(entry) => Arc::clone(entry),
                None => {
                    state
                        .object_async_get_requests
                        .entry(object_id)
                        .or_default()
                        .push(callback);
                    return;
                }
            }
        };
        callback(entry);
    }

    /// Get a resident object, or arrange for it to reach plasma.
    ///
    /// Returns the object if resident with a real value. Returns `None`
    /// if the value already lives in plasma (query it there), or if the
    /// object has not arrived yet; in the latter case the next put of
    /// the ID is also forwarded to plasma. Requires a plasma provider
    /// in the absent case.
    pub fn get_or_promote_to_plasma(&self, object_id: ObjectID) -> Option<Arc<CirrusObject>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.objects.get(&object_id) {
            if entry.is_in_plasma_error() {
                return None;
            }
            return Some(Arc::clone(entry));
        }
        assert!(
            self.store_in_plasma.is_some(),
            "cannot promote an object without a plasma provider"
        );
        state.promoted_to_plasma.insert(object_id);
        None
    }

    /// Remove objects from the store. Pending waiters are unaffected:
    /// they keep values already set and may still time out.
    pub fn delete(&self, object_ids: &[ObjectID]) {
        let mut state = self.state.lock();
        for object_id in object_ids {
            state.objects.remove(object_id);
        }
    }

    /// Whether a real value for the object is resident. In-plasma
    /// markers defer to the plasma store and do not count.
    pub fn contains(&self, object_id: &ObjectID) -> bool {
        let state = self.state.lock();
        state
            .objects
            .get(object_id)
            .is_some_and(|entry| !entry.is_in_plasma_error())
    }

    /// Number of resident objects.
    pub fn size(&self) -> usize {
        self.state.lock().objects.len()
    }

    #[cfg(test)]
    fn num_blocking_waiter_keys(&self) -> usize {
        self.state.lock().object_get_requests.len()
    }
}

impl Default for CoreWorkerMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
