pub mod error;

pub use error::WorkerError;
