// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Wire message types for Cirrus.
//!
//! Hand-maintained `prost` messages; the encoded form is what travels
//! between workers, so field tags are stable.

pub mod rpc;
