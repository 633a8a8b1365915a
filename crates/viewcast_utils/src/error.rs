//! Error helpers shared by the viewcast processes.

use std::error::Error;

/// Boxed error used at process boundaries where the concrete type no longer matters.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Render an error and every `source()` below it, one cause per line.
///
/// Used when a process gives up during startup so the operator sees the
/// whole chain instead of only the outermost message.
pub fn report(err: &dyn Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }

    rendered
}
