//! Events, drivers and the dispatch service.
//!
//! An [`Event`] describes *what* to do; a [`Driver`] decides *when and how* it is
//! carried out. The [`EventService`] is the single dispatch entry point: it looks up
//! the driver named by the event (or the process-wide default) and hands the event
//! to it.

pub mod dispatcher;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod event;
pub mod registry;

pub use dispatcher::EventService;
pub use driver::{
    Driver, DriverName, DriverOptions, DriverRegistry, DriverRegistryBuilder, RegisteredDriver,
    SyncDriver,
};
pub use envelope::EventEnvelope;
pub use error::DispatchError;
pub use event::{DEFAULT_QUEUE, Event};
pub use registry::{EventCtor, EventRegistry, EventRegistryBuilder, Listener};
