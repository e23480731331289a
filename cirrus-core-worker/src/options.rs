// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Core worker configuration options.

use cirrus_common::id::{JobID, NodeID, WorkerID};
use cirrus_proto::rpc::Language;

/// The type of worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerType {
    Worker,
    Driver,
}

/// Options for initializing a [`crate::core_worker::CoreWorker`].
#[derive(Debug, Clone)]
pub struct CoreWorkerOptions {
    pub worker_type: WorkerType,
    pub language: Language,
    pub job_id: JobID,
    pub worker_id: WorkerID,
    pub node_id: NodeID,
    pub node_ip_address: String,
}

impl Default for CoreWorkerOptions {
    fn default() -> Self {
        Self {
            worker_type: WorkerType::Worker,
            language: Language::Rust,
            job_id: JobID::nil(),
            worker_id: WorkerID::from_random(),
            node_id: NodeID::nil(),
            node_ip_address: "127.0.0.1".to_string(),
        }
    }
}
