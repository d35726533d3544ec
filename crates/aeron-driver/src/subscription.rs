// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscription: a client's registration of interest in a stream-id on a
//! channel. Many subscriptions on the same channel share one
//! [`ReceiveChannelEndpoint`](crate::channel::ReceiveChannelEndpoint); an
//! image is created per distinct publisher session observed on a
//! subscribed stream.

use crate::slab::SlabIndex;

pub struct Subscription {
    pub registration_id: i64,
    pub stream_id: i32,
    pub channel: String,
    /// Images created for this subscription's stream-id, keyed by the
    /// Conductor's image table.
    pub images: Vec<SlabIndex>,
}

impl Subscription {
    #[must_use]
    pub fn new(registration_id: i64, stream_id: i32, channel: String) -> Self {
        Self { registration_id, stream_id, channel, images: Vec::new() }
    }

    pub fn attach_image(&mut self, image: SlabIndex) {
        self.images.push(image);
    }

    pub fn detach_image(&mut self, image: SlabIndex) {
        self.images.retain(|i| i.0 != image.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaching_and_detaching_images_updates_membership() {
        let mut sub = Subscription::new(1, 10, "udp://localhost:40123".into());
        let img = SlabIndex(3);
        sub.attach_image(img);
        assert_eq!(sub.images, vec![img]);
        sub.detach_image(img);
        assert!(sub.images.is_empty());
    }
}
