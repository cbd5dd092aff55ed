// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data types and capability traits for keeping a client's pool of single-use key material
//! topped up on a remote directory.
//!
//! Two kinds of key material are covered:
//!
//! - Proteus **pre-keys**: Signal-style one-time keys, identified by a small integer which wraps
//!   around a fixed-size id space.
//! - MLS **key packages**: published credentials a peer uses to add this client to a group.
//!
//! Other participants consume this material whenever they start a session or add us to a group,
//! even when we are offline. Replenishing it is a background maintenance task: this crate only
//! defines the vocabulary (ids, counters, timestamps, errors) and the interfaces towards the
//! remote directory, the crypto provider and local persistence. The orchestration lives in
//! `keyfill`, an in-memory persistence layer in `keyfill-store`.
mod error;
mod identity;
mod key_package;
mod liveness;
mod prekey;
mod timestamp;
pub mod traits;

pub use error::{CryptoProviderFailure, NetworkFailure, RefillError, StorageFailure};
pub use identity::ClientId;
pub use key_package::{KeyPackage, KeyPackageCount};
pub use liveness::SyncLiveness;
pub use prekey::{MAX_PREKEY_ID, PreKeyId, PreKeyMaterial, max_prekey_id};
pub use timestamp::{Clock, SystemClock, Timestamp};
