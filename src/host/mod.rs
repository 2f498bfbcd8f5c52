//! Desktop host: main window bookkeeping, single-instance lock and the event loop.

pub mod instance;
mod shell;
mod window;

pub use shell::{run_shell, ShellExit, ShellParts};
