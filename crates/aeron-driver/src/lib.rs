// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A reliable, high-throughput, low-latency UDP publish/subscribe media
//! driver.
//!
//! The driver is the only party that owns network sockets. It is built from
//! three single-threaded agents that cooperate over SPSC command queues:
//!
//! - [`agents::Conductor`] validates and actions client commands arriving
//!   over the CnC file, allocates log buffers on disk, and creates or tears
//!   down publications and subscriptions.
//! - [`agents::Sender`] drives every live [`publication::NetworkPublication`]:
//!   draining committed data onto the wire, resending SETUP, and servicing
//!   NAKs.
//! - [`agents::Receiver`] drives every live [`image::PublicationImage`]:
//!   rebuilding term buffers from inbound DATA frames, issuing NAKs for
//!   gaps, and sending status messages.
//!
//! [`Driver`] wires the three together according to the configured
//! [`config::ThreadingMode`] and owns their lifetime.

pub mod agents;
pub mod channel;
pub mod cnc;
pub mod config;
pub mod error;
pub mod flowcontrol;
pub mod image;
pub mod logbuffer;
pub mod publication;
pub mod retransmit;
pub mod runtime_knobs;
pub mod slab;
pub mod subscription;
pub mod uri;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::bounded;

use agents::{
    AgentRunner, COMMAND_QUEUE_CAPACITY, ComposedIdleStrategy, Conductor, Receiver, Sender,
};
use cnc::Cnc;
use config::{Context, ThreadingMode};
use error::Result;
use runtime_knobs::RuntimeKnobs;

/// Capacity of each of the CnC file's two command rings, in bytes. Exposed
/// so a caller opening the CnC file directly (e.g. the driver binary's
/// stale-instance probe) uses the same ring shape `Driver::start` does.
pub const CNC_RING_CAPACITY: usize = 1024 * 1024;

/// A running driver instance: the CnC file plus whichever OS threads the
/// configured [`ThreadingMode`] spun up to carry the three agents.
///
/// Dropping or calling [`Driver::shutdown`] clears the shared `running`
/// flag and joins every thread; the CnC file's liveness counter then goes
/// stale, letting the next driver started against the same directory
/// detect this instance is gone.
pub struct Driver {
    context: Arc<Context>,
    runtime_knobs: Arc<RuntimeKnobs>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Driver {
    /// Bootstrap a new driver: create the aeron directory and CnC file,
    /// wire the three agents together per `context.threading_mode`, and
    /// spawn them.
    pub fn start(context: Context) -> Result<Self> {
        let context = Arc::new(context);
        std::fs::create_dir_all(&context.aeron_dir)?;
        std::fs::create_dir_all(context.publications_dir())?;
        std::fs::create_dir_all(context.images_dir())?;

        let cnc = Cnc::create(&context.aeron_dir.join("cnc.dat"), CNC_RING_CAPACITY)?;
        Self::spawn(context, cnc)
    }

    /// Like [`Driver::start`], but opens an existing CnC file instead of
    /// creating one. Exposed for tests that want to bootstrap a client
    /// against a known-shape file.
    pub fn start_with_existing_cnc(context: Context, cnc: Cnc) -> Result<Self> {
        let context = Arc::new(context);
        std::fs::create_dir_all(context.publications_dir())?;
        std::fs::create_dir_all(context.images_dir())?;
        Self::spawn(context, cnc)
    }

    fn spawn(context: Arc<Context>, cnc: Cnc) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        let (sender_tx, sender_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (receiver_tx, receiver_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (conductor_tx, conductor_rx) = bounded(COMMAND_QUEUE_CAPACITY);

        let runtime_knobs = Arc::new(RuntimeKnobs::default());

        let sender = Sender::new(context.clone(), sender_rx, conductor_tx.clone());
        let receiver = Receiver::new(context.clone(), receiver_rx, conductor_tx);
        let conductor = Conductor::new(
            context.clone(),
            cnc,
            sender_tx,
            receiver_tx,
            conductor_rx,
            runtime_knobs.clone(),
        );

        let threads = match context.threading_mode {
            ThreadingMode::Dedicated => {
                let (mut conductor, mut sender, mut receiver) = (conductor, sender, receiver);
                vec![
                    spawn_agent("aeron-conductor", move || conductor.do_work(), running.clone()),
                    spawn_agent("aeron-sender", move || sender.do_work(), running.clone()),
                    spawn_agent("aeron-receiver", move || receiver.do_work(), running.clone()),
                ]
            }
            ThreadingMode::Shared => {
                let mut conductor = conductor;
                vec![
                    spawn_agent("aeron-conductor", move || conductor.do_work(), running.clone()),
                    spawn_agent("aeron-network", pair(sender, receiver), running.clone()),
                ]
            }
            ThreadingMode::SharedNetwork => {
                vec![spawn_agent("aeron-driver", triple(conductor, sender, receiver), running.clone())]
            }
        };

        Ok(Self { context, runtime_knobs, running, threads })
    }

    /// The configuration this driver was started with.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The driver's runtime-adjustable knobs (currently: log verbosity),
    /// separate from the immutable [`Context`] per its own module docs.
    #[must_use]
    pub fn runtime_knobs(&self) -> &Arc<RuntimeKnobs> {
        &self.runtime_knobs
    }

    /// Clear the running flag and join every agent thread. Idempotent:
    /// calling it twice (or letting [`Drop`] call it after an explicit
    /// call) is harmless since joining an already-finished thread just
    /// returns immediately.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Round-robins two agents' `do_work()` behind a single closure, for
/// [`ThreadingMode::Shared`] where Sender and Receiver share one thread.
fn pair(mut sender: Sender, mut receiver: Receiver) -> impl FnMut() -> usize {
    move || sender.do_work() + receiver.do_work()
}

/// Round-robins all three agents' `do_work()` behind a single closure, for
/// [`ThreadingMode::SharedNetwork`].
fn triple(mut conductor: Conductor, mut sender: Sender, mut receiver: Receiver) -> impl FnMut() -> usize {
    move || conductor.do_work() + sender.do_work() + receiver.do_work()
}

fn spawn_agent<A>(name: &str, agent: A, running: Arc<AtomicBool>) -> JoinHandle<()>
where
    A: FnMut() -> usize + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            AgentRunner::new(agent, ComposedIdleStrategy::default(), running).run();
        })
        .expect("failed to spawn agent thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_starts_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = Context::default();
        context.aeron_dir = dir.path().to_path_buf();

        let mut driver = Driver::start(context).unwrap();
        assert!(driver.context().aeron_dir.join("cnc.dat").exists());
        driver.shutdown();
    }

    #[test]
    fn shared_network_threading_mode_starts_a_single_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = Context::default();
        context.aeron_dir = dir.path().to_path_buf();
        context.threading_mode = ThreadingMode::SharedNetwork;

        let mut driver = Driver::start(context).unwrap();
        assert_eq!(driver.threads.len(), 1);
        driver.shutdown();
    }
}
