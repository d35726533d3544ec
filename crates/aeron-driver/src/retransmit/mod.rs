// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Selective retransmission: NAK-driven resend of missing term ranges.

pub mod delay;
pub mod handler;

pub use delay::{AnyDelayGenerator, DelayGenerator, MulticastDelayGenerator, UnicastDelayGenerator};
pub use handler::{RetransmitAction, RetransmitHandler};
