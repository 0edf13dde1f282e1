//! Entry-point wrapper for a party process.
//!
//! A multi-party round that fails half-way cannot be resumed, so every error
//! and every panic ends the process with a non-zero exit code after being
//! logged.
use crate::errors::ErrorWithBody;
use log::{error, info};
use std::fmt::Display;
use std::process;
use std::result::Result;

/// Exit code of a party process that hit an error or a panic.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Runs `f`, logging any returned error or panic and terminating the process on either.
///
/// # Arguments
///
/// `f` - closure without arguments running one party's computation and returning `Result<()>`
pub fn execute_main<T, E>(f: T)
where
    T: FnOnce() -> Result<(), E> + std::panic::UnwindSafe,
    E: ErrorWithBody + Display,
{
    let result = std::panic::catch_unwind(|| {
        if let Err(e) = f() {
            error!("SNNI Error: {}", e);
            let body = e.get_body();
            info!("error location: {}:{}:{}", body.file, body.line, body.column);
            process::exit(FAILURE_EXIT_CODE);
        }
    });
    process_result(result);
}

#[doc(hidden)]
pub fn extract_panic_message(e: Box<dyn std::any::Any + Send>) -> Option<String> {
    match e.downcast::<String>() {
        Ok(panic_msg) => Some(*panic_msg),
        Err(e) => e.downcast::<&str>().ok().map(|msg| (*msg).to_owned()),
    }
}

#[doc(hidden)]
pub fn process_result<R>(result: std::thread::Result<R>) {
    if let Err(e) = result {
        match extract_panic_message(e) {
            Some(panic_msg) => error!("panic: {}", panic_msg),
            None => error!("panic of unknown type"),
        }
        process::exit(FAILURE_EXIT_CODE);
    }
}
