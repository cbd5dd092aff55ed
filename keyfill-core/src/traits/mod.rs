// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces towards everything outside of the refill logic: the remote directory, the crypto
//! provider and local persistence.
//!
//! For both protocols there is one "repository" trait which is all the orchestration code
//! depends on. Repositories are usually not implemented directly but composed from the narrower
//! `*Api`, `*CryptoProvider` and `*Store` traits, see the data sources in `keyfill`.
mod mls;
mod proteus;

pub use mls::{
    ClientIdProvider, KeyPackageApi, KeyPackageRepository, KeyPackageStore, MlsCryptoProvider,
};
pub use proteus::{PreKeyApi, PreKeyRepository, PreKeyStore, ProteusCryptoProvider};
