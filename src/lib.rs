pub mod config;
pub mod delivery;
pub mod error;
mod key_throttle;
pub mod throttler;

pub use config::ThrottleConfig;
pub use delivery::{Batch, Deliver};
pub use error::{ThrottlerError, ThrottlerResult};
pub use throttler::{Throttler, ThrottlerStats};
pub use tokio_util::sync::CancellationToken;
