//! In-process runtime plumbing: the event model and the broadcast bus.

pub mod event_bus;
pub mod events;

pub use event_bus::InProcStatusBus;
pub use events::InsightEvent;
