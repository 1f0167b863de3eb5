use crate::error::Error;
use std::time::Duration;

/// A single per-interaction behavior requested at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOption {
    /// Hold the response back for at least this long before writing it.
    DelayResponse(Duration),
}

/// The fully resolved per-interaction configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StubConfig {
    pub delay: Duration,
}

/// Resolves a list of options into a concrete [`StubConfig`].
///
/// Resolution is eager: a bad option set fails here, at registration time,
/// never during dispatch. Each option kind may appear at most once; a
/// duplicate means the test registering the interaction is misconfigured.
pub fn resolve(options: &[StubOption]) -> Result<StubConfig, Error> {
    let mut config = StubConfig::default();
    let mut delay_seen = false;

    for option in options {
        match option {
            StubOption::DelayResponse(delay) => {
                if delay_seen {
                    return Err(Error::DuplicateOption("delay_response"));
                }
                config.delay = *delay;
                delay_seen = true;
            }
        }
    }

    Ok(config)
}

/// Timing configuration for [`StubServer`](crate::StubServer) startup and
/// shutdown waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub startup_wait_timeout: Duration,
    pub shutdown_wait_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            startup_wait_timeout: Duration::from_secs(3),
            shutdown_wait_timeout: Duration::from_secs(15),
        }
    }
}
