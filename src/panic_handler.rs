use std::panic;

/// Log panics before the default report, then exit.
///
/// Render panics on the worker thread are caught there and never reach this
/// hook's exit path.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        if name == "render" {
            log::error!("Render thread panicked: {panic_info}");
            default_hook(panic_info);
            return;
        }

        log::error!("Panic on thread '{name}': {panic_info}");
        log::logger().flush();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}
