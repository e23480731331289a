// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Direct task submission over leased workers.
//!
//! Once a task's direct-call arguments are inlined it enters a FIFO
//! queue. The submitter keeps at most one worker-lease request in
//! flight; each granted worker drains one task at a time, going idle
//! between replies, and is returned to the scheduler when the queue is
//! empty or the worker errored.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use cirrus_common::id::{ObjectID, TaskID, TaskTransportType};
use cirrus_common::status::CirrusResult;
use cirrus_proto::rpc::{self, ErrorType};
use cirrus_rpc_client::{CoreWorkerClient, WorkerLeaseClient};

use crate::dependency_resolver::LocalDependencyResolver;
use crate::memory_store::{CirrusObject, CoreWorkerMemoryStore};
use crate::task_spec::TaskSpecification;

/// Worker endpoint, used as the client-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerAddress {
    pub ip_address: String,
    pub port: i32,
}

impl WorkerAddress {
    pub fn new(ip_address: impl Into<String>, port: i32) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }

    pub fn from_proto(address: &rpc::Address) -> Self {
        Self {
            ip_address: address.ip_address.clone(),
            port: address.port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}

/// Factory producing an RPC client for a granted worker address.
pub type CoreWorkerClientFactory =
    Box<dyn Fn(&WorkerAddress) -> Arc<dyn CoreWorkerClient> + Send + Sync>;

struct SubmitterState {
    /// Tasks ready for dispatch, strict FIFO.
    queued_tasks: VecDeque<TaskSpecification>,
    /// At most one lease request is outstanding.
    worker_request_pending: bool,
    /// Clients for every address granted at least once.
    client_cache: HashMap<WorkerAddress, Arc<dyn CoreWorkerClient>>,
}

/// Submitter for direct tasks.
pub struct CoreWorkerDirectTaskSubmitter {
    lease_client: Arc<dyn WorkerLeaseClient>,
    client_factory: CoreWorkerClientFactory,
    resolver: LocalDependencyResolver,
    in_memory_store: Arc<CoreWorkerMemoryStore>,
    state: Mutex<SubmitterState>,
}

impl CoreWorkerDirectTaskSubmitter {
    pub fn new(
        lease_client: Arc<dyn WorkerLeaseClient>,
        client_factory: CoreWorkerClientFactory,
        in_memory_store: Arc<CoreWorkerMemoryStore>,
    ) -> Self {
        Self {
            lease_client,
            client_factory,
            resolver: LocalDependencyResolver::new(Arc::clone(&in_memory_store)),
            in_memory_store,
            state: Mutex::new(SubmitterState {
                queued_tasks: VecDeque::new(),
                worker_request_pending: false,
                client_cache: HashMap::new(),
            }),
        }
    }

    /// Submit a task. Returns immediately; the task is queued once its
    /// direct-call arguments resolve (synchronously if all are already
    /// resident) and dispatched on whatever thread frees a worker.
    pub fn submit_task(self: &Arc<Self>, task: TaskSpecification) -> CirrusResult<()> {
        let this = Arc::clone(self);
        let queued = task.clone();
        self.resolver.resolve_dependencies(&task, move || {
            let mut state = this.state.lock();
            this.request_new_worker_if_needed(&mut state, &queued);
            state.queued_tasks.push_back(queued);
            // The task will be picked up by the next leased or newly
            // idle worker; one is guaranteed to show up because the
            // lease was requested above while holding the lock.
        });
        Ok(())
    }

    /// Called by the scheduler wiring when a lease is granted.
    pub fn handle_worker_lease_granted(self: &Arc<Self>, address: WorkerAddress) {
        {
            let mut state = self.state.lock();
            state.worker_request_pending = false;
            if !state.client_cache.contains_key(&address) {
                let client = (self.client_factory)(&address);
                state.client_cache.insert(address.clone(), client);
                tracing::info!(worker = %address, "connected to leased worker");
            }
        }

        // Try to assign it work.
        self.on_worker_idle(&address, /* was_error */ false);
    }

    /// Hand the next queued task to an idle worker, or return its lease
    /// when there is nothing to run (or the worker errored).
    fn on_worker_idle(self: &Arc<Self>, address: &WorkerAddress, was_error: bool) {
        let mut state = self.state.lock();
        if state.queued_tasks.is_empty() || was_error {
            self.return_worker(address);
        } else {
            let client = Arc::clone(
                state
                    .client_cache
                    .get(address)
                    .expect("no client for leased worker"),
            );
            let task = state.queued_tasks.pop_front().unwrap();
            self.push_normal_task(address.clone(), client, task);
        }
        // Still have a queue of tasks; keep a lease request in flight.
        let next = state.queued_tasks.front().cloned();
        if let Some(next) = next {
            self.request_new_worker_if_needed(&mut state, &next);
        }
    }

    /// Issue a lease request for `resource_spec` unless one is already
    /// outstanding. Must be called with the submitter lock held.
    fn request_new_worker_if_needed(
        &self,
        state: &mut SubmitterState,
        resource_spec: &TaskSpecification,
    ) {
        if state.worker_request_pending {
            return;
        }
        let task_id = resource_spec.task_id();
        let request = rpc::RequestWorkerLeaseRequest {
            resource_spec: Some(resource_spec.to_proto()),
        };
        let lease_client = Arc::clone(&self.lease_client);
        tracing::debug!(task_id = %task_id, "requesting worker lease");
        tokio::spawn(async move {
            if let Err(error) = lease_client.request_worker_lease(request).await {
                tracing::warn!(task_id = %task_id, %error, "worker lease request failed");
            }
        });
        state.worker_request_pending = true;
    }

    /// Return a leased worker to the scheduler, fire and forget.
    fn return_worker(&self, address: &WorkerAddress) {
        let request = rpc::ReturnWorkerRequest {
            worker_port: address.port,
            ..Default::default()
        };
        let lease_client = Arc::clone(&self.lease_client);
        let address = address.clone();
        tokio::spawn(async move {
            if let Err(error) = lease_client.return_worker(request).await {
                tracing::warn!(worker = %address, %error, "failed to return worker lease");
            }
        });
    }

    /// Start the push RPC for one task. The submitter lock may be held:
    /// initiation only spawns the call, completion is handled by the
    /// spawned future.
    fn push_normal_task(
        self: &Arc<Self>,
        address: WorkerAddress,
        client: Arc<dyn CoreWorkerClient>,
        task: TaskSpecification,
    ) {
        let task_id = task.task_id();
        let num_returns = task.num_returns();
        let request = rpc::PushTaskRequest {
            task_spec: Some(task.take_message()),
            ..Default::default()
        };
        tracing::debug!(task_id = %task_id, worker = %address, "pushing task to worker");

        let this = Arc::clone(self);
        let store = Arc::clone(&self.in_memory_store);
        tokio::spawn(async move {
            match client.push_normal_task(request).await {
                Ok(reply) => {
                    this.on_worker_idle(&address, /* was_error */ false);
                    write_objects_to_memory_store(&reply, &store);
                }
                Err(error) => {
                    tracing::warn!(task_id = %task_id, worker = %address, %error, "task push failed");
                    this.on_worker_idle(&address, /* was_error */ true);
                    treat_task_as_failed(&task_id, num_returns, ErrorType::WorkerDied, &store);
                }
            }
        });
    }

    /// Number of tasks waiting for a worker. Advisory.
    pub fn num_queued_tasks(&self) -> usize {
        self.state.lock().queued_tasks.len()
    }

    /// Whether a lease request is outstanding. Advisory.
    pub fn is_worker_request_pending(&self) -> bool {
        self.state.lock().worker_request_pending
    }

    /// Number of tasks still resolving dependencies. Advisory.
    pub fn num_pending_dependencies(&self) -> usize {
        self.resolver.num_pending()
    }
}

/// Publish a reply's return values into the memory store. A racing
/// writer may have published a value first; the original copy wins.
pub fn write_objects_to_memory_store(reply: &rpc::PushTaskReply, store: &CoreWorkerMemoryStore) {
    for return_object in &reply.return_objects {
        let object_id = ObjectID::from_binary(&return_object.object_id);
        let data = (!return_object.data.is_empty())
            .then(|| Bytes::copy_from_slice(&return_object.data));
        let metadata = (!return_object.metadata.is_empty())
            .then(|| Bytes::copy_from_slice(&return_object.metadata));
        let object = CirrusObject::new(data, metadata);
        if let Err(error) = store.put(object_id, &object) {
            tracing::debug!(object_id = %object_id, %error, "return object already present");
        }
    }
}

/// Publish failure sentinels for every return value of a failed task,
/// so readers blocked on its results observe the error.
pub fn treat_task_as_failed(
    task_id: &TaskID,
    num_returns: u64,
    error_type: ErrorType,
    store: &CoreWorkerMemoryStore,
) {
    tracing::debug!(task_id = %task_id, ?error_type, num_returns, "marking task as failed");
    let failure = CirrusObject::from_error(error_type);
    for i in 0..num_returns {
        let object_id =
            ObjectID::for_task_return(task_id, i as u32 + 1, TaskTransportType::Direct);
        if let Err(error) = store.put(object_id, &failure) {
            tracing::debug!(object_id = %object_id, %error, "failed task return already present");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cirrus_common::id::JobID;
    use cirrus_common::status::CirrusError;
    use cirrus_proto::rpc::Language;
    use cirrus_test_utils::{FakeCoreWorkerClient, FakeWorkerLeaseClient};

    use crate::task_spec::TaskSpecBuilder;

    fn make_task(name: &str, num_returns: u64) -> TaskSpecification {
        let job_id = JobID::from_int(1);
        let mut builder = TaskSpecBuilder::new();
        builder.set_common_task_spec(
            &TaskID::for_job(&job_id),
            name.into(),
            Language::Rust,
            &job_id,
            rpc::Address::default(),
            num_returns,
        );
        builder.build()
    }

    struct Harness {
        store: Arc<CoreWorkerMemoryStore>,
        lease_client: Arc<FakeWorkerLeaseClient>,
        worker_client: Arc<FakeCoreWorkerClient>,
        submitter: Arc<CoreWorkerDirectTaskSubmitter>,
    }

    fn make_harness() -> Harness {
        let store = Arc::new(CoreWorkerMemoryStore::new());
        let lease_client = Arc::new(FakeWorkerLeaseClient::new());
        let worker_client = Arc::new(FakeCoreWorkerClient::new());
        let factory_client = Arc::clone(&worker_client);
        let submitter = Arc::new(CoreWorkerDirectTaskSubmitter::new(
            Arc::clone(&lease_client) as Arc<dyn WorkerLeaseClient>,
            Box::new(move |_address| {
                Arc::clone(&factory_client) as Arc<dyn CoreWorkerClient>
            }),
            Arc::clone(&store),
        ));
        Harness {
            store,
            lease_client,
            worker_client,
            submitter,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_submit_queues_synchronously_and_requests_one_lease() {
        let h = make_harness();

        h.submitter.submit_task(make_task("a", 1)).unwrap();
        // No dependencies: queued within the submit call.
        assert_eq!(h.submitter.num_queued_tasks(), 1);
        assert!(h.submitter.is_worker_request_pending());

        // More submissions coalesce onto the outstanding lease request.
        h.submitter.submit_task(make_task("b", 1)).unwrap();
        h.submitter.submit_task(make_task("c", 1)).unwrap();
        assert_eq!(h.submitter.num_queued_tasks(), 3);

        settle().await;
        assert_eq!(h.lease_client.num_lease_requests(), 1);
    }

    #[tokio::test]
    async fn test_single_worker_drains_queue_in_fifo_order() {
        let h = make_harness();
        for name in ["a", "b", "c"] {
            h.submitter.submit_task(make_task(name, 1)).unwrap();
        }

        h.submitter
            .handle_worker_lease_granted(WorkerAddress::new("10.0.0.1", 5000));
        settle().await;

        // Each reply frees the worker for the next task.
        let names: Vec<String> = std::iter::from_fn(|| h.worker_client.pop_push_request())
            .map(|request| request.task_spec.unwrap().name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(h.submitter.num_queued_tasks(), 0);

        // Queue drained: the worker went back to the scheduler.
        assert_eq!(h.lease_client.num_returned_workers(), 1);
    }

    #[tokio::test]
    async fn test_lease_granted_with_empty_queue_returns_worker() {
        let h = make_harness();

        h.submitter
            .handle_worker_lease_granted(WorkerAddress::new("10.0.0.2", 5001));
        settle().await;

        assert_eq!(h.worker_client.num_push_requests(), 0);
        assert_eq!(h.lease_client.num_returned_workers(), 1);
        assert!(!h.submitter.is_worker_request_pending());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_failure_publishes_worker_died_sentinels() {
        let h = make_harness();
        h.worker_client
            .set_push_reply(Err(CirrusError::rpc_error("connection reset", 14)));

        let task = make_task("doomed", 2);
        let task_id = task.task_id();
        h.submitter.submit_task(task).unwrap();
        h.submitter
            .handle_worker_lease_granted(WorkerAddress::new("10.0.0.3", 5002));
        settle().await;

        // Errored worker was released.
        assert_eq!(h.lease_client.num_returned_workers(), 1);

        for index in 1..=2u32 {
            let return_id =
                ObjectID::for_task_return(&task_id, index, TaskTransportType::Direct);
            let mut results = Vec::new();
            h.store
                .get(
                    &[return_id],
                    1,
                    Some(Duration::from_secs(5)),
                    false,
                    &mut results,
                )
                .unwrap();
            let sentinel = results[0].as_ref().unwrap();
            assert_eq!(sentinel.error_type(), Some(ErrorType::WorkerDied));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_successful_reply_writes_return_objects() {
        let h = make_harness();
        let task = make_task("ok", 1);
        let task_id = task.task_id();
        let return_id = ObjectID::for_task_return(&task_id, 1, TaskTransportType::Direct);
        h.worker_client.set_push_reply(Ok(rpc::PushTaskReply {
            return_objects: vec![rpc::ReturnObject {
                object_id: return_id.binary(),
                data: b"result".to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        }));

        h.submitter.submit_task(task).unwrap();
        h.submitter
            .handle_worker_lease_granted(WorkerAddress::new("10.0.0.4", 5003));
        settle().await;

        assert!(h.store.contains(&return_id));
        let mut results = Vec::new();
        h.store
            .get(
                &[return_id],
                1,
                Some(Duration::from_secs(5)),
                false,
                &mut results,
            )
            .unwrap();
        assert_eq!(
            results[0].as_ref().unwrap().data().unwrap().as_ref(),
            b"result"
        );
    }

    #[tokio::test]
    async fn test_client_cache_reuses_connections() {
        let store = Arc::new(CoreWorkerMemoryStore::new());
        let lease_client = Arc::new(FakeWorkerLeaseClient::new());
        let worker_client = Arc::new(FakeCoreWorkerClient::new());
        let factory_client = Arc::clone(&worker_client);
        let factory_calls = Arc::new(Mutex::new(0usize));
        let factory_calls_clone = Arc::clone(&factory_calls);
        let submitter = Arc::new(CoreWorkerDirectTaskSubmitter::new(
            lease_client as Arc<dyn WorkerLeaseClient>,
            Box::new(move |_address| {
                *factory_calls_clone.lock() += 1;
                Arc::clone(&factory_client) as Arc<dyn CoreWorkerClient>
            }),
            store,
        ));

        let address = WorkerAddress::new("10.0.0.5", 5004);
        submitter.handle_worker_lease_granted(address.clone());
        submitter.handle_worker_lease_granted(address);
        settle().await;

        assert_eq!(*factory_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_lease_request_reissued_while_tasks_remain() {
        let h = make_harness();
        for name in ["a", "b"] {
            h.submitter.submit_task(make_task(name, 1)).unwrap();
        }
        settle().await;
        assert_eq!(h.lease_client.num_lease_requests(), 1);

        // Granting a worker clears the pending flag; dispatching "a"
        // with "b" still queued issues a fresh request.
        h.submitter
            .handle_worker_lease_granted(WorkerAddress::new("10.0.0.6", 5005));
        settle().await;
        assert_eq!(h.lease_client.num_lease_requests(), 2);
        assert_eq!(h.worker_client.num_push_requests(), 2);
    }
}
