//! Command: print version information.

/// Version string: the build-time `CONVERGE_VERSION` or the crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("CONVERGE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Print the converge version to stdout.
#[allow(clippy::print_stdout)]
pub fn run() {
    println!("converge {}", version());
}
