// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Core worker logic for Cirrus.
//!
//! The hot path of a task-execution worker: an in-process object store
//! coordinating producers and consumers of named values, a resolver
//! that inlines argument values into task messages, and a submitter
//! that leases remote workers and dispatches tasks to them.

pub mod core_worker;
pub mod dependency_resolver;
pub mod direct_task_submitter;
pub mod memory_store;
pub mod options;
pub mod task_spec;
