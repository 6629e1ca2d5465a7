//! # libflexvol: node-side flex volume orchestration
//!
//! `libflexvol` implements the node half of a flex volume plugin: every
//! driver invocation carries one lifecycle operation (attach, detach, mount,
//! unmount, is-attached), and the [`FlexController`] satisfies it by
//! combining a remote storage control plane with backend-specific mount
//! executors on the node. Each invocation may be its own process, so no state
//! is kept in memory between calls.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Requests, the response envelope, volume records, backend kinds. |
//! | [`error`] | [`FlexError`] enum covering all failure modes. |
//! | [`config`] | [`PluginConfig`], loaded from YAML or the environment. |
//! | [`operation`] | [`FlexOperation`], one variant per protocol operation. |
//! | [`controller`] | [`FlexController`], the per-operation protocols. |
//! | [`client`] | [`StorageClient`] trait and its REST implementation. |
//! | [`mounter`] | [`Mounter`] trait and the block / NFS / cluster executors. |
//! | [`registry`] | Lazily built, cached executor per backend kind. |
//! | [`attach`] | Attached-host lookup. |
//! | [`paths`] | Block mount template and the symlink protocol. |
//! | [`lock`] | Node-wide `flock(2)` unmount lock. |

pub mod attach;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
mod exec;
pub mod lock;
pub mod mounter;
pub mod operation;
pub mod paths;
pub mod registry;
pub mod types;

pub use client::StorageClient;
pub use config::PluginConfig;
pub use controller::FlexController;
pub use error::{FlexError, FlexResult};
pub use mounter::{Mounter, MounterFactory};
pub use operation::FlexOperation;
pub use types::*;
