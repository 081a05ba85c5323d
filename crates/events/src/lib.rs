//! Domain events: the event trait, the stream envelope and the in-process
//! execution helper shared by the order aggregates.

pub mod envelope;
pub mod event;
pub mod handler;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
