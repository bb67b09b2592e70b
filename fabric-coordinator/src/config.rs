//! Re-exports the layered configuration type. Kept as its own module
//! (rather than inlined in `main`) so `state.rs` and `scheduler.rs` can
//! depend on it without reaching into `fabric_control` directly.

pub use fabric_control::{ConfigError, CoordinatorConfig};
