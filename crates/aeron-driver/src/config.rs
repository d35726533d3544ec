// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Driver configuration - single source of truth.
//!
//! # Architecture
//!
//! - **Level 1 (static)**: compile-time defaults for every timing constant
//!   named in the spec (`PUBLICATION_SETUP_TIMEOUT_NS` and friends).
//! - **Level 2 (dynamic)**: [`Context`], built once from the defaults
//!   overlaid with a properties file, then shared read-only (`Arc`) across
//!   the Conductor, Sender, and Receiver.
//!
//! No field on [`Context`] is ever mutated after [`Context::build`] returns;
//! all three agents read it behind an `Arc`, never a lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Minimum allowed term length (64 KiB).
pub const MIN_TERM_LENGTH: u32 = 64 * 1024;
/// Maximum allowed term length (1 GiB).
pub const MAX_TERM_LENGTH: u32 = 1024 * 1024 * 1024;
/// Frame and term-offset alignment, in bytes.
pub const FRAME_ALIGNMENT: u32 = 32;

/// Default term length for a new publication log buffer.
pub const DEFAULT_TERM_LENGTH: u32 = 16 * 1024 * 1024;
/// Default MTU, chosen to fit inside a single non-fragmented Ethernet frame
/// once IP/UDP headers are accounted for.
pub const DEFAULT_MTU: u32 = 1408;
/// Default initial receiver window, in bytes.
pub const DEFAULT_INITIAL_WINDOW_LENGTH: u32 = 128 * 1024;

/// How often an unconnected publication resends SETUP.
pub const PUBLICATION_SETUP_TIMEOUT: Duration = Duration::from_millis(100);
/// How long a publication may go without transmitting before a heartbeat is due.
pub const PUBLICATION_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(100);
/// How often pending status messages are flushed.
pub const STATUS_MESSAGE_TIMEOUT: Duration = Duration::from_millis(100);
/// How long an image may go without data before it is considered inactive.
pub const IMAGE_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a stuck producer (reserved but never committed) is given before
/// the Conductor advances the tail past the stalled frame.
pub const PUBLICATION_UNBLOCK_TIMEOUT: Duration = Duration::from_secs(15);
/// How long a publication lingers after its reference count returns to zero.
pub const PUBLICATION_LINGER_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a client may go without a keepalive before being considered dead.
pub const CLIENT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of concurrent outstanding NAK entries per publication
/// before additional NAKs are dropped (see retransmit::handler).
pub const MAX_RETRANSMITS_PER_PUBLICATION: usize = 256;

/// The three supported agent-thread layouts (see SPEC_FULL §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// Conductor, Sender, and Receiver each get a dedicated OS thread.
    Dedicated,
    /// Sender and Receiver share one thread; Conductor gets its own.
    Shared,
    /// All three agents share a single thread, round-robin `do_work()`.
    SharedNetwork,
}

impl Default for ThreadingMode {
    fn default() -> Self {
        Self::Dedicated
    }
}

/// Immutable, once-built configuration shared by all three agents.
///
/// Built by [`Context::build`] from compiled-in defaults overlaid with a
/// properties file; never mutated afterwards. Agents receive it as
/// `Arc<Context>`.
#[derive(Debug, Clone)]
pub struct Context {
    pub aeron_dir: PathBuf,
    pub term_length: u32,
    pub mtu: u32,
    pub initial_window_length: u32,
    pub socket_sndbuf: Option<u32>,
    pub socket_rcvbuf: Option<u32>,
    pub threading_mode: ThreadingMode,
    pub publication_setup_timeout: Duration,
    pub publication_heartbeat_timeout: Duration,
    pub status_message_timeout: Duration,
    pub image_liveness_timeout: Duration,
    pub publication_unblock_timeout: Duration,
    pub publication_linger_timeout: Duration,
    pub client_liveness_timeout: Duration,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            aeron_dir: default_aeron_dir(),
            term_length: DEFAULT_TERM_LENGTH,
            mtu: DEFAULT_MTU,
            initial_window_length: DEFAULT_INITIAL_WINDOW_LENGTH,
            socket_sndbuf: None,
            socket_rcvbuf: None,
            threading_mode: ThreadingMode::default(),
            publication_setup_timeout: PUBLICATION_SETUP_TIMEOUT,
            publication_heartbeat_timeout: PUBLICATION_HEARTBEAT_TIMEOUT,
            status_message_timeout: STATUS_MESSAGE_TIMEOUT,
            image_liveness_timeout: IMAGE_LIVENESS_TIMEOUT,
            publication_unblock_timeout: PUBLICATION_UNBLOCK_TIMEOUT,
            publication_linger_timeout: PUBLICATION_LINGER_TIMEOUT,
            client_liveness_timeout: CLIENT_LIVENESS_TIMEOUT,
        }
    }
}

fn default_aeron_dir() -> PathBuf {
    std::env::temp_dir().join(format!("aeron-{}", std::process::id()))
}

impl Context {
    /// Build a [`Context`] from defaults, optionally overlaid with a
    /// properties file (`key=value` lines, `#` comments, blank lines
    /// ignored). Validates `term_length` is a power of two within range.
    pub fn build(properties_path: Option<&Path>) -> Result<Self> {
        let mut ctx = Self::default();

        if let Some(path) = properties_path {
            let contents = fs::read_to_string(path).map_err(Error::Io)?;
            for (lineno, line) in contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    Error::Generic(format!(
                        "{}:{}: expected key=value, got {line:?}",
                        path.display(),
                        lineno + 1
                    ))
                })?;
                ctx.apply(key.trim(), value.trim())?;
            }
        }

        ctx.validate()?;
        Ok(ctx)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse_u32(value: &str) -> Result<u32> {
            value
                .parse()
                .map_err(|_| Error::Generic(format!("expected an integer, got {value:?}")))
        }
        fn parse_ms(value: &str) -> Result<Duration> {
            parse_u32(value).map(|ms| Duration::from_millis(u64::from(ms)))
        }

        match key {
            "aeron.dir" => self.aeron_dir = PathBuf::from(value),
            "aeron.term.length" => self.term_length = parse_u32(value)?,
            "aeron.mtu.length" => self.mtu = parse_u32(value)?,
            "aeron.rcv.initial.window.length" => {
                self.initial_window_length = parse_u32(value)?;
            }
            "aeron.socket.so_sndbuf" => self.socket_sndbuf = Some(parse_u32(value)?),
            "aeron.socket.so_rcvbuf" => self.socket_rcvbuf = Some(parse_u32(value)?),
            "aeron.threading.mode" => {
                self.threading_mode = match value.to_ascii_uppercase().as_str() {
                    "DEDICATED" => ThreadingMode::Dedicated,
                    "SHARED" => ThreadingMode::Shared,
                    "SHARED_NETWORK" => ThreadingMode::SharedNetwork,
                    other => {
                        return Err(Error::Generic(format!("unknown threading mode {other:?}")))
                    }
                };
            }
            "aeron.publication.setup.timeout" => self.publication_setup_timeout = parse_ms(value)?,
            "aeron.publication.heartbeat.timeout" => {
                self.publication_heartbeat_timeout = parse_ms(value)?;
            }
            "aeron.status.message.timeout" => self.status_message_timeout = parse_ms(value)?,
            "aeron.image.liveness.timeout" => self.image_liveness_timeout = parse_ms(value)?,
            "aeron.publication.unblock.timeout" => {
                self.publication_unblock_timeout = parse_ms(value)?;
            }
            "aeron.publication.linger.timeout" => {
                self.publication_linger_timeout = parse_ms(value)?;
            }
            "aeron.client.liveness.timeout" => self.client_liveness_timeout = parse_ms(value)?,
            unknown => {
                log::warn!("ignoring unknown configuration key {unknown:?}");
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_TERM_LENGTH..=MAX_TERM_LENGTH).contains(&self.term_length)
            || !self.term_length.is_power_of_two()
        {
            return Err(Error::Generic(format!(
                "term length {} must be a power of two in [{}, {}]",
                self.term_length, MIN_TERM_LENGTH, MAX_TERM_LENGTH
            )));
        }
        if self.mtu < FRAME_ALIGNMENT {
            return Err(Error::Generic(format!(
                "mtu {} smaller than frame alignment {}",
                self.mtu, FRAME_ALIGNMENT
            )));
        }
        Ok(())
    }

    /// Directory a publication's log buffer lives under.
    #[must_use]
    pub fn publications_dir(&self) -> PathBuf {
        self.aeron_dir.join("publications")
    }

    /// Directory an image's log buffer lives under.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.aeron_dir.join("images")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_validates() {
        Context::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_term_length() {
        let mut ctx = Context::default();
        ctx.term_length = 100_000;
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn properties_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.properties");
        fs::write(
            &path,
            "# comment\n\naeron.term.length=131072\naeron.mtu.length=512\n",
        )
        .unwrap();

        let ctx = Context::build(Some(&path)).unwrap();
        assert_eq!(ctx.term_length, 131_072);
        assert_eq!(ctx.mtu, 512);
    }

    #[test]
    fn malformed_properties_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.properties");
        fs::write(&path, "not-a-key-value-line\n").unwrap();
        assert!(Context::build(Some(&path)).is_err());
    }
}
