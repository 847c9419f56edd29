//! Fluent builder for [`Engine`] construction.

use crate::reactor::core::{DEFAULT_TICK_INTERVAL, DEFAULT_UPDATE_TIMEOUT, Engine, PanicHandler};

use std::time::Duration;

/// Builder for engines with non-default timing or a panic handler.
///
/// # Example
/// ```
/// use sockloop::EngineBuilder;
/// use std::time::Duration;
///
/// let engine = EngineBuilder::new()
///     .tick_interval(Duration::from_millis(250))
///     .update_timeout(Duration::from_millis(5))
///     .build();
/// assert_eq!(engine.stream_count(), 0);
/// ```
pub struct EngineBuilder {
    tick_interval: Duration,
    update_timeout: Duration,
    panic_handler: Option<PanicHandler>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            panic_handler: None,
        }
    }

    /// Interval between [`Event::Tick`](crate::Event::Tick) deliveries.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Upper bound on how long one [`Engine::update`] call waits for readiness.
    pub fn update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = timeout;
        self
    }

    /// Handler invoked on fatal internal failures, see [`Engine::at_panic`].
    pub fn panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + 'static,
    {
        self.panic_handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Engine {
        Engine::with_config(self.tick_interval, self.update_timeout, self.panic_handler)
    }
}
