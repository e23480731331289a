// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Client-side RPC interfaces consumed by the core worker.
//!
//! Transport implementations live with the embedder; the worker only
//! depends on these traits.

mod traits;

pub use traits::{CoreWorkerClient, WorkerLeaseClient};
