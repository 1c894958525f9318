//! Single-value reactive cells.
//!
//! Cells hold one value and call their subscribers synchronously on every
//! write. Controllers expose their state through them.

mod cell;

pub use cell::{Callback, ReactiveCell, SubscriptionGuard};
