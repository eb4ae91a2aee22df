pub mod batch;
pub mod driver;
pub mod error;
pub mod prompts;
pub mod semaphore;

pub use batch::{run_batch, BatchDetailRequest, DEFAULT_MAX_PARALLEL};
pub use driver::{BuildDriver, BuildObserver, BuildRequest, NoopObserver};
pub use error::BuildError;
pub use semaphore::{Semaphore, SemaphorePermit};
