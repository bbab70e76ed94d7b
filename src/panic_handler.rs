use log::error;
use std::panic;

/// Install `better_panic` and log every panic before the default hook runs.
/// The engine host thread can panic without taking the client down, so the
/// log is often the only trace of it.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        error!("Thread '{name}' panicked: {panic_info}");
        default_hook(panic_info);
    }));
}
