//! Storage fabric coordinator binary's supporting library.
//!
//! Everything the device channel and background daemons need to be
//! wired together lives here; `main.rs` is just CLI parsing, startup
//! ordering, and the axum serve loop.

pub mod config;
pub mod device_handler;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use config::CoordinatorConfig;
pub use device_handler::CoordinatorDeviceHandler;
pub use scheduler::Scheduler;
pub use state::AppState;
