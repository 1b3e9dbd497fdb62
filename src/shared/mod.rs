pub mod errors;
pub mod ocpp_frame;
pub mod retry;
pub mod shutdown;

pub use errors::{DomainError, InfraError};
pub use ocpp_frame::{OcppFrame, OcppFrameError};
pub use retry::{retry_with_backoff, RetryConfig};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
