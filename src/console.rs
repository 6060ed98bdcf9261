//! Colored console diagnostics
//!
//! All termcolor operations use `let _ =` to deliberately ignore errors.
//! Colored output is decorative. If stderr/stdout is unavailable (broken
//! pipe, no TTY, etc.), the program continues without it.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Environment variables that switch on debug output when set to `true` or `1`.
pub const DEBUG_ENV_VARS: [&str; 3] = ["KODEGEN_KEYCHAIN_DEBUG", "RUNNER_DEBUG", "SYSTEM_DEBUG"];

pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

#[must_use]
pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Enable verbose output if any CI debug switch is present in the environment.
pub fn init_from_env() {
    let enabled = DEBUG_ENV_VARS.iter().any(|name| {
        std::env::var(name)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    });
    if enabled {
        set_verbose(true);
    }
}

/// Print a warning with yellow color to stderr
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer
            .set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Yellow)));
        let _ = write!(&mut buffer, "⚠️  ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print an error with red color to stderr
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer
            .set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Red)));
        let _ = write!(&mut buffer, "❌ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a success message with green color to stdout
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer
            .set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Green)));
        let _ = write!(&mut buffer, "✓ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a plain progress line to stdout
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a dimmed diagnostic line to stderr when verbose output is enabled
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if $crate::console::verbose() {
            use ::std::io::Write as _;
            use ::termcolor::WriteColor as _;
            let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
            let mut buffer = bufwtr.buffer();
            let _ = buffer.set_color(::termcolor::ColorSpec::new().set_dimmed(true));
            let _ = write!(&mut buffer, "[debug] ");
            let _ = writeln!(&mut buffer, $($arg)*);
            let _ = buffer.reset();
            let _ = bufwtr.print(&buffer);
        }
    }};
}
