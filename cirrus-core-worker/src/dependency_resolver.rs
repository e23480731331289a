// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Local dependency resolution for task arguments.
//!
//! A task argument holding a single direct-call ObjectID is a local
//! dependency: before the task can be shipped, the value is fetched
//! from the in-memory store and inlined into the task message (or
//! rewritten as a plasma reference when the value lives there).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use cirrus_common::id::{ObjectID, TaskTransportType};

use crate::memory_store::{CirrusObject, CoreWorkerMemoryStore};
use crate::task_spec::TaskSpecification;

/// Per-task resolution state, shared by the per-dependency callbacks.
/// Dropped when the last dependency callback finishes.
struct TaskState {
    task: TaskSpecification,
    local_dependencies: HashSet<ObjectID>,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

/// Resolves the direct-call arguments of tasks against the memory store.
pub struct LocalDependencyResolver {
    in_memory_store: Arc<CoreWorkerMemoryStore>,
    /// Tasks with at least one unresolved dependency. Advisory.
    num_pending: Arc<Mutex<usize>>,
}

impl LocalDependencyResolver {
    pub fn new(in_memory_store: Arc<CoreWorkerMemoryStore>) -> Self {
        Self {
            in_memory_store,
            num_pending: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of tasks still waiting on a dependency.
    pub fn num_pending(&self) -> usize {
        *self.num_pending.lock()
    }

    /// Resolve all direct-call arguments of `task`, then call
    /// `on_complete` exactly once.
    ///
    /// If every dependency is already resident (or there are none),
    /// `on_complete` runs synchronously within this call. Otherwise it
    /// runs from whichever put satisfies the last dependency, outside
    /// the resolver's locks. Argument slots with more than one ID are
    /// not supported.
    pub fn resolve_dependencies<F>(&self, task: &TaskSpecification, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut local_dependencies = HashSet::new();
        for i in 0..task.num_args() {
            let count = task.arg_id_count(i);
            if count > 0 {
                assert!(count <= 1, "multi-ID arguments are not supported");
                let object_id = task.arg_id(i, 0);
                if object_id.is_direct_call() {
                    local_dependencies.insert(object_id);
                }
            }
        }
        if local_dependencies.is_empty() {
            on_complete();
            return;
        }

        *self.num_pending.lock() += 1;
        let state = Arc::new(Mutex::new(TaskState {
            task: task.clone(),
            local_dependencies: local_dependencies.clone(),
            on_complete: Some(Box::new(on_complete)),
        }));

        for object_id in local_dependencies {
            let state = Arc::clone(&state);
            let num_pending = Arc::clone(&self.num_pending);
            // May run synchronously from get_async when the object is
            // already resident.
            self.in_memory_store.get_async(
                object_id,
                Box::new(move |object| {
                    let on_complete = {
                        let mut state = state.lock();
                        do_inline_object_value(&object_id, &object, &state.task);
                        state.local_dependencies.remove(&object_id);
                        if state.local_dependencies.is_empty() {
                            *num_pending.lock() -= 1;
                            state.on_complete.take()
                        } else {
                            None
                        }
                    };
                    if let Some(on_complete) = on_complete {
                        on_complete();
                    }
                }),
            );
        }
    }
}

/// Inline a resolved value into the argument slot holding `object_id`.
///
/// A plasma marker turns the slot into a by-reference argument (single
/// ID with the plasma transport tag); anything else becomes a by-value
/// argument carrying the object's bytes. Exactly one slot must hold the
/// ID.
fn do_inline_object_value(
    object_id: &ObjectID,
    value: &CirrusObject,
    task: &TaskSpecification,
) {
    let matches = task.with_mutable_message(|message| {
        let mut matches = 0;
        for arg in message.args.iter_mut() {
            if arg.object_ids.len() == 1 && arg.object_ids[0] == object_id.as_bytes() {
                arg.object_ids.clear();
                if value.is_in_plasma_error() {
                    // The executor fetches the value from plasma.
                    arg.object_ids.push(
                        object_id
                            .with_transport_type(TaskTransportType::Plasma)
                            .binary(),
                    );
                } else {
                    if let Some(data) = value.data() {
                        arg.data = data.to_vec();
                    }
                    if let Some(metadata) = value.metadata() {
                        arg.metadata = metadata.to_vec();
                    }
                }
                matches += 1;
            }
        }
        matches
    });
    assert_eq!(matches, 1, "expected exactly one argument slot holding {object_id}");
}
