pub mod auth;
pub mod batch;
pub mod batch_handlers;
pub mod desktop_handlers;
pub mod error;
pub mod event_bus;
pub mod handlers;
pub mod metrics;
pub mod pages;
pub mod reconstruction_handlers;
pub mod routes;
pub mod server;
pub mod state;
#[cfg(test)]
mod test_support;
pub mod trial_handlers;
pub mod ws;

pub use batch::{BatchScheduler, BatchStatus};
pub use error::*;
pub use event_bus::{EventBus, PanelEvent};
pub use routes::*;
pub use server::*;
pub use state::*;
