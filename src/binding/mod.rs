//! Reference-counted sharing of registry entries.
//!
//! Independent observers bind and release entries by key; an entry is evicted
//! once the last observer lets go of it.

mod binding;

pub use binding::{Attachment, ConsumerBindings, Persistence, Release};
