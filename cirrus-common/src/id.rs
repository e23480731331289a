// Copyright 2024 The Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Cirrus ID types.
//!
//! ID hierarchy:
//! - `JobID` (4 bytes)
//! - `TaskID` (16 bytes = 12 unique + 4 JobID)
//! - `ObjectID` (20 bytes = 4-byte index word + 16 TaskID)
//! - `UniqueID` / `WorkerID` / `NodeID` (16 bytes)
//!
//! The high bit of an `ObjectID`'s index word carries the task transport
//! tag: set means the object flows inline through task messages and the
//! in-memory store (a direct-call object), clear means it is referenced
//! through the external plasma store.

use std::fmt;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::constants::UNIQUE_ID_SIZE;

/// How an object travels between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTransportType {
    /// Referenced through the external plasma store.
    Plasma,
    /// Passed inline through task messages and the in-memory store.
    Direct,
}

/// Generates a fixed-size Cirrus ID type.
///
/// Each ID is a `[u8; N]` newtype with binary/hex constructors and
/// accessors, a `nil()` sentinel (all 0xFF bytes), and the usual
/// equality/hashing/formatting traits. Equality covers every bit.
macro_rules! define_cirrus_id {
    ($name:ident, $size:expr) => {
        #[derive(Clone, Copy)]
        #[repr(C)]
        pub struct $name {
            data: [u8; $size],
        }

        impl $name {
            /// The fixed byte size of this ID type.
            pub const SIZE: usize = $size;

            /// Create a nil ID (all 0xFF bytes).
            pub const fn nil() -> Self {
                Self {
                    data: [0xFF; $size],
                }
            }

            /// Create an ID from raw bytes. Panics if `bytes.len() != SIZE`.
            pub fn from_binary(bytes: &[u8]) -> Self {
                assert_eq!(
                    bytes.len(),
                    $size,
                    "expected {} bytes for {}, got {}",
                    $size,
                    stringify!($name),
                    bytes.len()
                );
                let mut data = [0u8; $size];
                data.copy_from_slice(bytes);
                Self { data }
            }

            /// Create an ID from a hex string. Returns `nil()` on invalid input.
            pub fn from_hex(hex_str: &str) -> Self {
                if hex_str.len() != $size * 2 {
                    tracing::error!(
                        "incorrect hex string length for {}: expected {}, got {}",
                        stringify!($name),
                        $size * 2,
                        hex_str.len()
                    );
                    return Self::nil();
                }
                match hex::decode(hex_str) {
                    Ok(bytes) => Self::from_binary(&bytes),
                    Err(_) => {
                        tracing::error!("invalid hex string for {}", stringify!($name));
                        Self::nil()
                    }
                }
            }

            /// Create a random ID.
            pub fn from_random() -> Self {
                let mut data = [0u8; $size];
                rand::thread_rng().fill(&mut data[..]);
                Self { data }
            }

            /// Returns true if this is the nil ID (all 0xFF).
            pub fn is_nil(&self) -> bool {
                self.data == [0xFF; $size]
            }

            /// Raw byte array reference.
            pub fn data(&self) -> &[u8; $size] {
                &self.data
            }

            /// Raw bytes as `&[u8]`.
            pub fn as_bytes(&self) -> &[u8] {
                &self.data
            }

            /// Stable wire representation (owned copy of the bytes).
            pub fn binary(&self) -> Vec<u8> {
                self.data.to_vec()
            }

            /// Hex-encoded string (lowercase).
            pub fn hex(&self) -> String {
                hex::encode(self.data)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.data == other.data
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.data.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.data
            }
        }
    };
}

// ─── ID Type Definitions ────────────────────────────────────────────────────

define_cirrus_id!(UniqueID, UNIQUE_ID_SIZE);

// JobID: 4 bytes
define_cirrus_id!(JobID, 4);

// TaskID: 16 bytes (12 unique + 4 JobID)
define_cirrus_id!(TaskID, 16);

// ObjectID: 20 bytes (4-byte index word + 16 TaskID)
define_cirrus_id!(ObjectID, 20);

define_cirrus_id!(WorkerID, UNIQUE_ID_SIZE);
define_cirrus_id!(NodeID, UNIQUE_ID_SIZE);

// ─── JobID extras ───────────────────────────────────────────────────────────

impl JobID {
    /// Create a JobID from a u32 integer.
    pub fn from_int(value: u32) -> Self {
        Self {
            data: value.to_be_bytes(),
        }
    }

    /// Convert to a u32 integer.
    pub fn to_int(&self) -> u32 {
        u32::from_be_bytes(self.data)
    }
}

// ─── TaskID extras ──────────────────────────────────────────────────────────

impl TaskID {
    const UNIQUE_BYTES_LENGTH: usize = 12;

    /// Create a TaskID for a given job with random unique bytes.
    pub fn for_job(job_id: &JobID) -> Self {
        let mut data = [0u8; 16];
        rand::thread_rng().fill(&mut data[..Self::UNIQUE_BYTES_LENGTH]);
        data[Self::UNIQUE_BYTES_LENGTH..].copy_from_slice(job_id.data());
        Self { data }
    }

    /// Extract the embedded JobID (last 4 bytes).
    pub fn job_id(&self) -> JobID {
        JobID::from_binary(&self.data[Self::UNIQUE_BYTES_LENGTH..])
    }
}

// ─── ObjectID extras ────────────────────────────────────────────────────────

impl ObjectID {
    const INDEX_BYTES_LENGTH: usize = 4;

    /// High bit of the index word: set for direct-call objects.
    const DIRECT_CALL_FLAG: u32 = 1 << 31;

    /// Low bits of the index word hold the return index.
    const INDEX_MASK: u32 = Self::DIRECT_CALL_FLAG - 1;

    /// Maximum number of objects returnable by a single task.
    pub const MAX_OBJECT_INDEX: u32 = Self::INDEX_MASK;

    /// Create the ObjectID of a task's `index`-th return value
    /// (return indexes start at 1).
    pub fn for_task_return(task_id: &TaskID, index: u32, transport: TaskTransportType) -> Self {
        assert!(
            index >= 1 && index <= Self::MAX_OBJECT_INDEX,
            "return index {} out of range",
            index
        );
        let mut word = index;
        if transport == TaskTransportType::Direct {
            word |= Self::DIRECT_CALL_FLAG;
        }
        let mut data = [0u8; 20];
        data[..Self::INDEX_BYTES_LENGTH].copy_from_slice(&word.to_be_bytes());
        data[Self::INDEX_BYTES_LENGTH..].copy_from_slice(task_id.data());
        Self { data }
    }

    fn index_word(&self) -> u32 {
        u32::from_be_bytes(self.data[..Self::INDEX_BYTES_LENGTH].try_into().unwrap())
    }

    /// Get the return index (flag bits masked off).
    pub fn object_index(&self) -> u32 {
        self.index_word() & Self::INDEX_MASK
    }

    /// Extract the embedded TaskID (last 16 bytes).
    pub fn task_id(&self) -> TaskID {
        TaskID::from_binary(&self.data[Self::INDEX_BYTES_LENGTH..])
    }

    /// The transport tag carried in the index word.
    pub fn transport_type(&self) -> TaskTransportType {
        if self.index_word() & Self::DIRECT_CALL_FLAG != 0 {
            TaskTransportType::Direct
        } else {
            TaskTransportType::Plasma
        }
    }

    /// Whether this object flows inline through the in-memory store.
    pub fn is_direct_call(&self) -> bool {
        self.transport_type() == TaskTransportType::Direct
    }

    /// A copy of this ID with the transport tag replaced.
    pub fn with_transport_type(&self, transport: TaskTransportType) -> Self {
        let mut word = self.index_word();
        match transport {
            TaskTransportType::Direct => word |= Self::DIRECT_CALL_FLAG,
            TaskTransportType::Plasma => word &= !Self::DIRECT_CALL_FLAG,
        }
        let mut data = self.data;
        data[..Self::INDEX_BYTES_LENGTH].copy_from_slice(&word.to_be_bytes());
        Self { data }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_id() {
        let id = JobID::nil();
        assert!(id.is_nil());
        assert_eq!(id.data(), &[0xFF; 4]);
    }

    #[test]
    fn test_job_id_roundtrip() {
        for val in [0u32, 1, 100, u32::MAX] {
            let id = JobID::from_int(val);
            assert_eq!(id.to_int(), val);

            let hex_str = id.hex();
            let id2 = JobID::from_hex(&hex_str);
            assert_eq!(id, id2);

            let bin = id.binary();
            let id3 = JobID::from_binary(&bin);
            assert_eq!(id, id3);
        }
    }

    #[test]
    fn test_task_id_embeds_job_id() {
        let job_id = JobID::from_int(7);
        let task_id = TaskID::for_job(&job_id);
        assert_eq!(task_id.job_id(), job_id);
    }

    #[test]
    fn test_object_id_for_task_return() {
        let task_id = TaskID::from_random();
        let obj_id = ObjectID::for_task_return(&task_id, 5, TaskTransportType::Direct);
        assert_eq!(obj_id.object_index(), 5);
        assert_eq!(obj_id.task_id(), task_id);
        assert!(obj_id.is_direct_call());

        let by_ref = ObjectID::for_task_return(&task_id, 5, TaskTransportType::Plasma);
        assert_eq!(by_ref.object_index(), 5);
        assert!(!by_ref.is_direct_call());
    }

    #[test]
    fn test_with_transport_type() {
        let task_id = TaskID::from_random();
        let direct = ObjectID::for_task_return(&task_id, 2, TaskTransportType::Direct);
        let plasma = direct.with_transport_type(TaskTransportType::Plasma);

        // The transport bit is part of the identity.
        assert_ne!(direct, plasma);
        assert_eq!(plasma.transport_type(), TaskTransportType::Plasma);
        assert_eq!(plasma.object_index(), direct.object_index());
        assert_eq!(plasma.task_id(), direct.task_id());
        assert_eq!(plasma.with_transport_type(TaskTransportType::Direct), direct);
    }

    #[test]
    fn test_with_transport_type_is_idempotent() {
        let id = ObjectID::from_random().with_transport_type(TaskTransportType::Direct);
        assert_eq!(id.with_transport_type(TaskTransportType::Direct), id);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_zero_return_index_rejected() {
        ObjectID::for_task_return(&TaskID::from_random(), 0, TaskTransportType::Direct);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = UniqueID::from_random();
        let hex_str = id.hex();
        assert_eq!(hex_str.len(), 32);
        let id2 = UniqueID::from_hex(&hex_str);
        assert_eq!(id, id2);
    }

    #[test]
    fn test_from_hex_bad_input_is_nil() {
        assert!(UniqueID::from_hex("abc").is_nil());
        assert!(UniqueID::from_hex(&"zz".repeat(UniqueID::SIZE)).is_nil());
    }
}
