// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UDP channel endpoints: one send-side and one receive-side socket per
//! distinct channel URI, shared (ref-counted) by every publication or
//! subscription registered against that channel.

pub mod multicast_select;
pub mod receive_endpoint;
pub mod send_endpoint;

pub use multicast_select::{select_interface, Interface};
pub use receive_endpoint::ReceiveChannelEndpoint;
pub use send_endpoint::SendChannelEndpoint;
