// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Task specification wrapper and builder.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use cirrus_common::id::{JobID, ObjectID, TaskID};
use cirrus_proto::rpc::{self, TaskArg, TaskSpec};

/// A task specification wrapping a shared wire message.
///
/// Clones alias the same underlying message: mutating one (for example,
/// inlining a resolved argument) is visible through every clone. This is
/// what lets dependency-resolution callbacks edit the message the
/// submitter later ships.
#[derive(Clone)]
pub struct TaskSpecification {
    message: Arc<Mutex<TaskSpec>>,
}

impl TaskSpecification {
    pub fn new(message: TaskSpec) -> Self {
        Self {
            message: Arc::new(Mutex::new(message)),
        }
    }

    pub fn task_id(&self) -> TaskID {
        TaskID::from_binary(&self.message.lock().task_id)
    }

    pub fn name(&self) -> String {
        self.message.lock().name.clone()
    }

    pub fn num_returns(&self) -> u64 {
        self.message.lock().num_returns
    }

    pub fn num_args(&self) -> usize {
        self.message.lock().args.len()
    }

    /// Number of object IDs in argument slot `i`.
    pub fn arg_id_count(&self, i: usize) -> usize {
        self.message.lock().args[i].object_ids.len()
    }

    /// The `k`-th object ID of argument slot `i`.
    pub fn arg_id(&self, i: usize, k: usize) -> ObjectID {
        ObjectID::from_binary(&self.message.lock().args[i].object_ids[k])
    }

    /// Run `f` with mutable access to the wire message.
    pub fn with_mutable_message<R>(&self, f: impl FnOnce(&mut TaskSpec) -> R) -> R {
        f(&mut self.message.lock())
    }

    /// Move the wire message out, leaving a default in its place.
    /// Used to hand the message to an outgoing request without a copy.
    pub fn take_message(&self) -> TaskSpec {
        std::mem::take(&mut self.message.lock())
    }

    /// A detached copy of the wire message.
    pub fn to_proto(&self) -> TaskSpec {
        self.message.lock().clone()
    }
}

impl std::fmt::Debug for TaskSpecification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.lock();
        f.debug_struct("TaskSpecification")
            .field("task_id", &hex::encode(&message.task_id))
            .field("name", &message.name)
            .field("num_args", &message.args.len())
            .field("num_returns", &message.num_returns)
            .finish()
    }
}

/// Builder for constructing a [`TaskSpecification`].
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::default(),
        }
    }

    /// Set common fields shared by all tasks.
    pub fn set_common_task_spec(
        &mut self,
        task_id: &TaskID,
        name: String,
        language: rpc::Language,
        job_id: &JobID,
        caller_address: rpc::Address,
        num_returns: u64,
    ) -> &mut Self {
        self.spec.task_id = task_id.binary();
        self.spec.name = name;
        self.spec.language = language as i32;
        self.spec.job_id = job_id.binary();
        self.spec.caller_address = Some(caller_address);
        self.spec.num_returns = num_returns;
        self
    }

    /// Add an argument passed by reference.
    pub fn add_by_ref_arg(&mut self, object_id: &ObjectID) -> &mut Self {
        self.spec.args.push(TaskArg {
            object_ids: vec![object_id.binary()],
            ..Default::default()
        });
        self
    }

    /// Add an argument passed by value.
    pub fn add_by_value_arg(&mut self, data: Bytes) -> &mut Self {
        self.spec.args.push(TaskArg {
            data: data.to_vec(),
            ..Default::default()
        });
        self
    }

    /// Declare a required resource for scheduling.
    pub fn add_required_resource(&mut self, name: String, quantity: f64) -> &mut Self {
        self.spec.required_resources.insert(name, quantity);
        self
    }

    pub fn build(self) -> TaskSpecification {
        TaskSpecification::new(self.spec)
    }
}

impl Default for TaskSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_common::id::TaskTransportType;

    fn make_task(num_returns: u64) -> TaskSpecification {
        let job_id = JobID::from_int(1);
        let mut builder = TaskSpecBuilder::new();
        builder.set_common_task_spec(
            &TaskID::for_job(&job_id),
            "my_func".into(),
            rpc::Language::Rust,
            &job_id,
            rpc::Address::default(),
            num_returns,
        );
        builder.build()
    }

    #[test]
    fn test_builder_sets_common_fields() {
        let task = make_task(2);
        assert_eq!(task.name(), "my_func");
        assert_eq!(task.num_returns(), 2);
        assert_eq!(task.num_args(), 0);
        assert_eq!(task.task_id().job_id(), JobID::from_int(1));
    }

    #[test]
    fn test_arg_accessors() {
        let oid = ObjectID::from_random().with_transport_type(TaskTransportType::Direct);
        let job_id = JobID::from_int(3);
        let mut builder = TaskSpecBuilder::new();
        builder
            .set_common_task_spec(
                &TaskID::for_job(&job_id),
                "f".into(),
                rpc::Language::Rust,
                &job_id,
                rpc::Address::default(),
                1,
            )
            .add_by_ref_arg(&oid)
            .add_by_value_arg(Bytes::from_static(b"inline"));
        let task = builder.build();

        assert_eq!(task.num_args(), 2);
        assert_eq!(task.arg_id_count(0), 1);
        assert_eq!(task.arg_id(0, 0), oid);
        assert_eq!(task.arg_id_count(1), 0);
    }

    #[test]
    fn test_clones_alias_the_same_message() {
        let task = make_task(1);
        let alias = task.clone();
        alias.with_mutable_message(|message| message.name = "renamed".into());
        assert_eq!(task.name(), "renamed");
    }

    #[test]
    fn test_take_message_leaves_default() {
        let task = make_task(1);
        let message = task.take_message();
        assert_eq!(message.name, "my_func");
        assert_eq!(task.num_returns(), 0);
        assert!(task.name().is_empty());
    }
}
