// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence for the bookkeeping which drives key material refills: the highest pre-key id we
//! ever uploaded and the instants of the last pre-key and key package checks.
//!
//! Only an in-memory implementation is provided. Applications with a database implement
//! [`PreKeyStore`](keyfill_core::traits::PreKeyStore) and
//! [`KeyPackageStore`](keyfill_core::traits::KeyPackageStore) on top of it.
#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
