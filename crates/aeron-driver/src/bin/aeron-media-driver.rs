// SPDX-License-Identifier: Apache-2.0 OR MIT

//! aeron-media-driver - the server process of the reliable UDP publish/
//! subscribe transport.
//!
//! # Usage
//!
//! ```bash
//! # Run with compiled-in defaults
//! aeron-media-driver
//!
//! # Run with a properties file overlay
//! aeron-media-driver driver.properties
//! ```
//!
//! Takes at most one positional argument: a properties file path. Exits 0
//! on a clean shutdown (SIGINT/SIGTERM), non-zero on a configuration error
//! or on detecting a live driver already running against the same aeron
//! directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aeron_driver::cnc::Cnc;
use aeron_driver::config::Context;
use aeron_driver::{Driver, CNC_RING_CAPACITY};

const LIVENESS_TIMEOUT_MS: i64 = 10_000;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() > 1 {
        eprintln!("usage: aeron-media-driver [properties-file]");
        std::process::exit(2);
    }
    let properties_path = args.first().map(PathBuf::from);

    match run(properties_path.as_deref()) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            log::error!("aeron-media-driver failed: {err}");
            eprintln!("aeron-media-driver: {err}");
            std::process::exit(1);
        }
    }
}

fn run(properties_path: Option<&std::path::Path>) -> aeron_driver::error::Result<()> {
    let context = Context::build(properties_path)?;
    log::info!(
        "starting aeron-media-driver: dir={} term_length={} mtu={} threading_mode={:?}",
        context.aeron_dir.display(),
        context.term_length,
        context.mtu,
        context.threading_mode
    );

    refuse_if_already_running(&context)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    register_signal_handlers(&shutdown);

    let mut driver = Driver::start(context)?;
    log::info!("driver started, waiting for shutdown signal");

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("shutdown signal received, stopping agents");
    driver.shutdown();
    log::info!("aeron-media-driver stopped cleanly");
    Ok(())
}

/// Another driver instance in the same aeron directory is detected via the
/// CnC file's liveness counter; a fresh driver refuses to start unless the
/// prior instance is stale.
fn refuse_if_already_running(context: &Context) -> aeron_driver::error::Result<()> {
    let cnc_path = context.aeron_dir.join("cnc.dat");
    if !cnc_path.exists() {
        return Ok(());
    }

    let cnc = match Cnc::open(&cnc_path, CNC_RING_CAPACITY) {
        Ok(cnc) => cnc,
        // A partially-written or foreign file; let Driver::start's own
        // create-or-fail path surface the real error.
        Err(_) => return Ok(()),
    };
    let now_ms = now_epoch_millis();
    if cnc.is_active(now_ms, LIVENESS_TIMEOUT_MS) {
        return Err(aeron_driver::error::Error::Generic(format!(
            "a driver is already running against {}",
            context.aeron_dir.display()
        )));
    }
    drop(cnc);
    log::warn!(
        "found a stale driver instance at {}, removing it",
        cnc_path.display()
    );
    std::fs::remove_file(&cnc_path)?;
    Ok(())
}

fn now_epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn register_signal_handlers(shutdown: &Arc<AtomicBool>) {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::flag;

    if let Err(err) = flag::register(SIGINT, Arc::clone(shutdown)) {
        log::warn!("failed to register SIGINT handler: {err}");
    }
    if let Err(err) = flag::register(SIGTERM, Arc::clone(shutdown)) {
        log::warn!("failed to register SIGTERM handler: {err}");
    }
}
