// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The CoreWorker facade tying the store and the submitter together.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cirrus_common::id::ObjectID;
use cirrus_common::status::CirrusResult;
use cirrus_proto::rpc;
use cirrus_rpc_client::WorkerLeaseClient;

use crate::direct_task_submitter::{
    CoreWorkerClientFactory, CoreWorkerDirectTaskSubmitter, WorkerAddress,
};
use crate::memory_store::{CirrusObject, CoreWorkerMemoryStore, StoreInPlasma};
use crate::options::CoreWorkerOptions;
use crate::task_spec::TaskSpecification;

/// One worker process's view of the system: an in-memory object store
/// plus a direct task submitter wired to injected collaborators.
pub struct CoreWorker {
    options: CoreWorkerOptions,
    memory_store: Arc<CoreWorkerMemoryStore>,
    direct_task_submitter: Arc<CoreWorkerDirectTaskSubmitter>,
    worker_address: rpc::Address,
}

impl CoreWorker {
    /// Create a CoreWorker. The lease client, worker-client factory,
    /// and optional plasma provider come from the embedder.
    pub fn new(
        options: CoreWorkerOptions,
        lease_client: Arc<dyn WorkerLeaseClient>,
        client_factory: CoreWorkerClientFactory,
        store_in_plasma: Option<StoreInPlasma>,
    ) -> Self {
        let memory_store = Arc::new(match store_in_plasma {
            Some(store_in_plasma) => {
                CoreWorkerMemoryStore::with_plasma_provider(store_in_plasma)
            }
            None => CoreWorkerMemoryStore::new(),
        });
        let direct_task_submitter = Arc::new(CoreWorkerDirectTaskSubmitter::new(
            lease_client,
            client_factory,
            Arc::clone(&memory_store),
        ));
        let worker_address = rpc::Address {
            node_id: options.node_id.binary(),
            ip_address: options.node_ip_address.clone(),
            port: 0,
            worker_id: options.worker_id.binary(),
        };
        tracing::info!(
            worker_id = %options.worker_id,
            job_id = %options.job_id,
            "core worker initialized"
        );
        Self {
            options,
            memory_store,
            direct_task_submitter,
            worker_address,
        }
    }

    // ─── Object API ──────────────────────────────────────────────────

    /// Put an object into the in-process memory store.
    pub fn put_object(
        &self,
        object_id: ObjectID,
        data: Option<Bytes>,
        metadata: Option<Bytes>,
    ) -> CirrusResult<()> {
        self.memory_store
            .put(object_id, &CirrusObject::new(data, metadata))
    }

    /// Get objects from the memory store, blocking up to `timeout`
    /// (`None` waits forever). Slots whose object did not arrive in
    /// time are `None`.
    pub fn get_objects(
        &self,
        object_ids: &[ObjectID],
        timeout: Option<Duration>,
    ) -> CirrusResult<Vec<Option<Arc<CirrusObject>>>> {
        let mut results = Vec::new();
        match self.memory_store.get(
            object_ids,
            object_ids.len(),
            timeout,
            /* remove_after_get */ false,
            &mut results,
        ) {
            Ok(()) => Ok(results),
            Err(error) if error.is_timed_out() => Ok(results),
            Err(error) => Err(error),
        }
    }

    /// Check if an object is resident in the memory store.
    pub fn contains_object(&self, object_id: &ObjectID) -> bool {
        self.memory_store.contains(object_id)
    }

    /// Delete objects from the memory store.
    pub fn delete_objects(&self, object_ids: &[ObjectID]) {
        self.memory_store.delete(object_ids);
    }

    // ─── Task API ────────────────────────────────────────────────────

    /// Submit a direct task for execution.
    pub fn submit_task(&self, task: TaskSpecification) -> CirrusResult<()> {
        self.direct_task_submitter.submit_task(task)
    }

    /// Scheduler wiring entry point: a worker lease was granted.
    pub fn handle_worker_lease_granted(&self, address: WorkerAddress) {
        self.direct_task_submitter.handle_worker_lease_granted(address);
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn options(&self) -> &CoreWorkerOptions {
        &self.options
    }

    pub fn worker_address(&self) -> &rpc::Address {
        &self.worker_address
    }

    pub fn memory_store(&self) -> &Arc<CoreWorkerMemoryStore> {
        &self.memory_store
    }

    pub fn task_submitter(&self) -> &Arc<CoreWorkerDirectTaskSubmitter> {
        &self.direct_task_submitter
    }
}
