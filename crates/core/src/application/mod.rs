// Application Layer - adapter composition logic

pub mod mapper;
pub mod observation;
pub mod registry;

pub use mapper::{MapperAdapter, MapperFactory};
pub use observation::{observation_queue, ObservationEntry, ObservationQueue, ObservationSender};
pub use registry::{AdapterFactory, AdapterRegistry};
