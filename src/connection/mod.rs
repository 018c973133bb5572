//! Connection lifecycle: backoff, shared state, status announcements and the
//! manager that ties them to a transport

pub mod backoff;
pub mod clock;
pub mod manager;
pub mod state;
pub mod status;

pub use backoff::{no_jitter, uniform_jitter, BackoffError, BackoffScheduler, JitterFn};
pub use clock::{Clock, SystemClock};
pub use manager::{
    ConnectionManager, ConnectionManagerBuilder, ManagerSettings, ReconnectStrategy,
    TickOutcome, RECONNECT_IN_FLIGHT_TIMEOUT,
};
pub use state::{ConnectionState, ConnectionStats};
pub use status::StatusAnnouncer;
