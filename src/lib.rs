// Circuit breaker guarding a fallible operation

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod state;

// Re-export key types for convenience
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, Fallback};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerConfig, OpenPolicy};
pub use error::{BreakerError, ConfigError};
pub use state::CircuitState;
