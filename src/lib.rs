// src/lib.rs

pub mod bsp;
pub mod document;
pub mod map;

pub use bsp::{BuildConfig, BuildError, BuildObserver, Partitioner};
pub use document::MapDocument;
