pub mod checksum;
pub mod coerce;
pub mod error;
pub mod flow;
pub mod infer;
pub mod stream;

pub use error::FlowError;
pub use flow::{Dataflow, FlowCounters};
pub use stream::{Datastream, SAMPLE_SIZE};
