//! tiercache.
//!
//! A command line front end to the two-tier object cache. It fetches objects through the cache
//! and inspects or cleans up the persistent tier.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
