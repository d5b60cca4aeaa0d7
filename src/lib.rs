#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

//! A sparse virtual-disk engine implementing the QCOW2 v2 on-disk format
//! as a block device: a two-level cluster allocator/translator plus a
//! range-locked write-back sector cache in front of an arbitrary backing
//! device.

pub mod allocator;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod header;
pub mod intervalset;
pub mod logging;
pub mod metaio;
pub mod offset;
pub mod rangelock;
pub mod refcount;
pub mod translator;

pub use backend::{BackingDevice, BackingInfo};
pub use config::EngineConfig;
pub use engine::{Engine, EngineInfo};
pub use error::{EngineError, Result};

#[cfg(feature = "mem-backend")]
pub use backend::MemBackingDevice;

#[cfg(feature = "file-backend")]
pub use backend::file::FileBackingDevice;
