use log::{debug, error, info};
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Run an async operation, logging its start, duration and outcome
pub async fn timed<T, E, F>(name: &str, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    debug!("Starting execution of {}", name);
    let started = Instant::now();
    let result = operation.await;
    report(name, started, &result);
    result
}

/// Like [`timed`] for operations that cannot fail
pub async fn timed_value<T, F>(name: &str, operation: F) -> T
where
    F: Future<Output = T>,
{
    debug!("Starting execution of {}", name);
    let started = Instant::now();
    let value = operation.await;
    info!(
        "{} executed successfully in {:.3}s",
        name,
        started.elapsed().as_secs_f64()
    );
    value
}

/// Blocking counterpart of [`timed`]
pub fn timed_sync<T, E, F>(name: &str, operation: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    debug!("Starting execution of {}", name);
    let started = Instant::now();
    let result = operation();
    report(name, started, &result);
    result
}

fn report<T, E: Display>(name: &str, started: Instant, result: &Result<T, E>) {
    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(_) => info!("{} executed successfully in {:.3}s", name, elapsed),
        Err(e) => error!("{} failed after {:.3}s: {}", name, elapsed, e),
    }
}
