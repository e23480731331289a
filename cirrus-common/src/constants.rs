// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Workspace-wide constants.

/// Length of full-length Cirrus unique IDs in bytes.
pub const UNIQUE_ID_SIZE: usize = 16;
