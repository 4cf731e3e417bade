//! Registration tables for the extension bridge.
//!
//! - [`ClassDb`]: engine classes, extension classes and the virtuals each declares
//! - [`MethodTable`]: method binds resolved once at startup
//! - [`VirtualRegistry`]: per-class virtual entries and their overrides
//! - [`Bridge`]: all of the above, frozen, plus the engine callbacks
//!
//! Everything is built single-threaded through [`BridgeBuilder`] and is
//! read-only afterward.

mod bridge;
mod callbacks;
mod class_db;
mod method_table;
mod virtuals;

pub use bridge::{Bridge, BridgeBuilder, ClassBuilder};
pub use class_db::{ClassDb, ClassInfo, ClassKind};
pub use method_table::MethodTable;
pub use virtuals::{VirtualEntry, VirtualOutcome, VirtualRegistry};
