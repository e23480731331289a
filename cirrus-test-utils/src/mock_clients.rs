// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Recording fake RPC clients for unit and integration tests.

use std::collections::VecDeque;

use parking_lot::Mutex;

use cirrus_common::status::CirrusResult;
use cirrus_proto::rpc;
use cirrus_rpc_client::{CoreWorkerClient, WorkerLeaseClient};

/// A fake lease client that records requests for inspection and always
/// acknowledges them. Lease grants are driven by the test itself.
pub struct FakeWorkerLeaseClient {
    lease_requests: Mutex<VecDeque<rpc::RequestWorkerLeaseRequest>>,
    returned_workers: Mutex<Vec<rpc::ReturnWorkerRequest>>,
}

impl FakeWorkerLeaseClient {
    pub fn new() -> Self {
        Self {
            lease_requests: Mutex::new(VecDeque::new()),
            returned_workers: Mutex::new(Vec::new()),
        }
    }

    pub fn num_lease_requests(&self) -> usize {
        self.lease_requests.lock().len()
    }

    /// Pop the oldest recorded lease request.
    pub fn pop_lease_request(&self) -> Option<rpc::RequestWorkerLeaseRequest> {
        self.lease_requests.lock().pop_front()
    }

    pub fn num_returned_workers(&self) -> usize {
        self.returned_workers.lock().len()
    }

    pub fn returned_worker_ports(&self) -> Vec<i32> {
        self.returned_workers
            .lock()
            .iter()
            .map(|request| request.worker_port)
            .collect()
    }
}

impl Default for FakeWorkerLeaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WorkerLeaseClient for FakeWorkerLeaseClient {
    async fn request_worker_lease(
        &self,
        req: rpc::RequestWorkerLeaseRequest,
    ) -> CirrusResult<()> {
        self.lease_requests.lock().push_back(req);
        Ok(())
    }

    async fn return_worker(&self, req: rpc::ReturnWorkerRequest) -> CirrusResult<()> {
        self.returned_workers.lock().push(req);
        Ok(())
    }
}

/// A fake worker client that records pushed tasks and answers each push
/// with a configurable reply.
pub struct FakeCoreWorkerClient {
    push_requests: Mutex<VecDeque<rpc::PushTaskRequest>>,
    push_reply: Mutex<CirrusResult<rpc::PushTaskReply>>,
}

impl FakeCoreWorkerClient {
    pub fn new() -> Self {
        Self {
            push_requests: Mutex::new(VecDeque::new()),
            push_reply: Mutex::new(Ok(rpc::PushTaskReply::default())),
        }
    }

    /// Set the reply returned by every subsequent push.
    pub fn set_push_reply(&self, reply: CirrusResult<rpc::PushTaskReply>) {
        *self.push_reply.lock() = reply;
    }

    pub fn num_push_requests(&self) -> usize {
        self.push_requests.lock().len()
    }

    /// Pop the oldest recorded push request.
    pub fn pop_push_request(&self) -> Option<rpc::PushTaskRequest> {
        self.push_requests.lock().pop_front()
    }
}

impl Default for FakeCoreWorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CoreWorkerClient for FakeCoreWorkerClient {
    async fn push_normal_task(
        &self,
        req: rpc::PushTaskRequest,
    ) -> CirrusResult<rpc::PushTaskReply> {
        self.push_requests.lock().push_back(req);
        self.push_reply.lock().clone()
    }
}
