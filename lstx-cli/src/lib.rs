//! Administrative shell for the log stream transaction context managers of an
//! in-memory tenant.

mod cli;
mod command;
mod script_executor;
mod session;
mod shell;

pub use cli::Cli;
pub use script_executor::ScriptExecutor;
pub use session::AdminSession;
