// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Async traits for the scheduler and worker clients.

use cirrus_common::status::CirrusResult;
use cirrus_proto::rpc;

/// Async interface for leasing workers from the external scheduler.
///
/// `request_worker_lease` only delivers the request; the grant arrives
/// out of band through the submitter's lease-granted handler.
#[async_trait::async_trait]
pub trait WorkerLeaseClient: Send + Sync {
    async fn request_worker_lease(
        &self,
        req: rpc::RequestWorkerLeaseRequest,
    ) -> CirrusResult<()>;

    async fn return_worker(&self, req: rpc::ReturnWorkerRequest) -> CirrusResult<()>;
}

/// Async interface for pushing tasks to a leased worker.
#[async_trait::async_trait]
pub trait CoreWorkerClient: Send + Sync {
    async fn push_normal_task(
        &self,
        req: rpc::PushTaskRequest,
    ) -> CirrusResult<rpc::PushTaskReply>;
}
