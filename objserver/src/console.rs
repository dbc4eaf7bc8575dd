use crate::error::Result;
use crate::object::Object;
use crate::process::{Handle, Process};

/// The console subsystem, as far as the fd layer needs it.
///
/// Consoles synchronize outside the fd layer, so a console handle may have
/// no fd and still be valid for `get_handle_fd`.
pub trait ConsoleSubsystem {
    /// Returns `true` if `obj` belongs to the console subsystem.
    fn is_console_object(&self, obj: &Object) -> bool;

    /// Lets `process` share the console `handle` of its parent.
    fn inherit_console(&self, parent: &Process, process: &Process, handle: Handle) -> Result<()>;
}

/// A broker without consoles.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConsole;

impl ConsoleSubsystem for NoConsole {
    fn is_console_object(&self, _obj: &Object) -> bool {
        false
    }

    fn inherit_console(&self, _parent: &Process, _process: &Process, _handle: Handle) -> Result<()> {
        Ok(())
    }
}
