//! Packet id generation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Ids wrap back to 1 once they reach this bound.
pub const MAX_PACKET_ID: u32 = 1 << 30;

/// Monotonic packet id source, starting at 1.
#[derive(Debug)]
pub struct PacketIdGenerator {
    next: AtomicU32,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(id: u32) -> Self {
        Self {
            next: AtomicU32::new(id),
        }
    }

    pub fn next_id(&self) -> u32 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let id = if current == 0 || current >= MAX_PACKET_ID {
                1
            } else {
                current
            };
            match self.next.compare_exchange_weak(
                current,
                id + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return id,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
