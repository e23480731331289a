// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! RPC message types (package `cirrus.rpc`).

use std::collections::HashMap;

/// Network address of a worker process.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(bytes = "vec", tag = "1")]
    pub node_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub ip_address: String,
    #[prost(int32, tag = "3")]
    pub port: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub worker_id: Vec<u8>,
}

/// A single task argument slot.
///
/// An argument is either passed by reference (`object_ids` holds exactly
/// one encoded ObjectID) or by value (`data`/`metadata` hold the bytes and
/// `object_ids` is empty).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskArg {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub object_ids: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub metadata: Vec<u8>,
}

/// Full specification of a task to execute.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskSpec {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "Language", tag = "2")]
    pub language: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub job_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub task_id: Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub args: Vec<TaskArg>,
    #[prost(uint64, tag = "6")]
    pub num_returns: u64,
    #[prost(map = "string, double", tag = "7")]
    pub required_resources: HashMap<String, f64>,
    #[prost(message, optional, tag = "8")]
    pub caller_address: Option<Address>,
}

/// Request to execute a task on a leased worker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushTaskRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub intended_worker_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub task_spec: Option<TaskSpec>,
    #[prost(int64, tag = "3")]
    pub sequence_number: i64,
}

/// One return value of an executed task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReturnObject {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub in_plasma: bool,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub metadata: Vec<u8>,
}

/// Reply carrying the return values of an executed task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushTaskReply {
    #[prost(message, repeated, tag = "1")]
    pub return_objects: Vec<ReturnObject>,
    #[prost(bool, tag = "2")]
    pub worker_exiting: bool,
}

/// Request for a worker lease from the external scheduler.
///
/// The grant arrives out of band: the scheduler wiring invokes the
/// submitter's lease-granted handler with the worker's address.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestWorkerLeaseRequest {
    #[prost(message, optional, tag = "1")]
    pub resource_spec: Option<TaskSpec>,
}

/// Request to return a previously granted worker lease.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReturnWorkerRequest {
    #[prost(int32, tag = "1")]
    pub worker_port: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub worker_id: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub disconnect_worker: bool,
}

/// The programming language of a worker or task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Language {
    Python = 0,
    Java = 1,
    Cpp = 2,
    Rust = 3,
}

/// Error classes encoded into failure-sentinel object metadata.
///
/// The sentinel is the decimal string of the enum value, so readers can
/// classify a failed object without deserializing its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorType {
    /// The worker executing the task died.
    WorkerDied = 0,
    /// Task execution raised an application error.
    TaskExecutionException = 1,
    /// The object cannot be reconstructed.
    ObjectUnreconstructable = 2,
    /// The real value lives in the external plasma store.
    ObjectInPlasma = 3,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_task_spec_roundtrip() {
        let spec = TaskSpec {
            name: "f".to_string(),
            language: Language::Python as i32,
            job_id: vec![0, 0, 0, 1],
            task_id: vec![7; 16],
            args: vec![TaskArg {
                object_ids: vec![vec![1; 20]],
                ..Default::default()
            }],
            num_returns: 2,
            ..Default::default()
        };
        let bytes = spec.encode_to_vec();
        let decoded = TaskSpec::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_error_type_values_are_stable() {
        assert_eq!(ErrorType::WorkerDied as i32, 0);
        assert_eq!(ErrorType::ObjectInPlasma as i32, 3);
        assert_eq!(ErrorType::try_from(3).unwrap(), ErrorType::ObjectInPlasma);
        assert!(ErrorType::try_from(99).is_err());
    }
}
