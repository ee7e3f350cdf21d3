use std::time::Duration;

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ Failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(lib_econbridge::init()) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }

    // the console reader blocks on stdin and would hold the runtime open
    runtime.shutdown_timeout(Duration::from_secs(1));
}
