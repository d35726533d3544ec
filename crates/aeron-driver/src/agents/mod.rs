// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The three cooperating agents - Conductor, Sender, Receiver - and the
//! idle/runner machinery that drives each one's `do_work()` loop.

pub mod commands;
pub mod conductor;
pub mod idle;
pub mod receiver;
pub mod sender;

pub use commands::{ConductorCommand, ReceiverCommand, SenderCommand, COMMAND_QUEUE_CAPACITY};
pub use conductor::Conductor;
pub use idle::{AgentRunner, ComposedIdleStrategy, IdleStrategy};
pub use receiver::Receiver;
pub use sender::Sender;
