use super::{Server, ServerConfig};
use crate::console::{ConsoleSubsystem, NoConsole};
use crate::transport::{FdTransport, UnixTransport};

/// Builder for configuring and creating a [`Server`].
///
/// # Examples
///
/// ```rust,ignore
/// let server = ServerBuilder::new()
///     .max_poll_users(256)
///     .handle_limit(64)
///     .trace_requests(true)
///     .build();
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    console: Box<dyn ConsoleSubsystem>,
    transport: Box<dyn FdTransport>,
}

impl ServerBuilder {
    /// Creates a builder with the default configuration: no console
    /// subsystem and descriptor passing over the process channel.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            console: Box::new(NoConsole),
            transport: Box::new(UnixTransport),
        }
    }

    /// Sets the capacity of the poll table, i.e. the number of fds that
    /// can exist at once.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_poll_users(mut self, n: usize) -> Self {
        assert!(n > 0, "max_poll_users must be > 0");

        self.config.max_poll_users = n;
        self
    }

    /// Sets the number of handles each process may hold.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn handle_limit(mut self, n: usize) -> Self {
        assert!(n > 0, "handle_limit must be > 0");

        self.config.handle_limit = n;
        self
    }

    /// Logs every dispatched request and its reply status at trace level.
    pub fn trace_requests(mut self, enabled: bool) -> Self {
        self.config.trace_requests = enabled;
        self
    }

    pub fn console(mut self, console: impl ConsoleSubsystem + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn transport(mut self, transport: impl FdTransport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.config, self.console, self.transport)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
