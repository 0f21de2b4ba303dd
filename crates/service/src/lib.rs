pub mod broker;
pub mod scheduler;
pub mod telemetry;

pub use broker::{BrokerService, SubjectRef, TransitionRequest};
pub use scheduler::SweepScheduler;
pub use telemetry::{init_logging, LoggingInitError};
