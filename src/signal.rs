//! Signal handling for stopping between batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Install a Ctrl-C handler and return the flag it sets.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })?;

    Ok(shutdown)
}
