//! Packet transfer along a path.
//!
//! A channel serialises packets one after another at the path's bottleneck
//! rate, then adds propagation delay. Packets therefore arrive in the order
//! they were sent.

use std::cell::RefCell;
use std::rc::Weak;

use homenet_core::SimError;
use homenet_core::engine::{SimTime, Simulator};

use crate::topology::PathProfile;

/// Attempts before a reliable transfer gives up on a packet.
const MAX_ATTEMPTS: u32 = 16;

/// How a channel reacts to loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delivery {
    /// Lost packets are gone
    Datagram,
    /// Lost packets are sent again after `retransmission_timeout`
    Reliable { retransmission_timeout: SimTime },
}

/// Counters of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub retransmissions: u64,
    pub bytes_sent: u64,
}

/// One direction of a path, with its own transmit queue.
#[derive(Debug, Clone)]
pub struct PathChannel {
    profile: PathProfile,
    delivery: Delivery,
    busy_until: SimTime,
    stats: ChannelStats,
}

impl PathChannel {
    pub fn new(profile: PathProfile, delivery: Delivery) -> Self {
        Self {
            profile,
            delivery,
            busy_until: SimTime::ZERO,
            stats: ChannelStats::default(),
        }
    }

    pub fn profile(&self) -> &PathProfile {
        &self.profile
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Time to put `size` bytes on the wire at the bottleneck rate.
    pub fn serialization_delay(&self, size: u32) -> SimTime {
        let bits = u64::from(size) * 8;
        let nanos =
            (u128::from(bits) * 1_000_000_000).div_ceil(u128::from(self.profile.data_rate_bps));
        SimTime::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Sends `size` bytes and returns the arrival time, or `None` if the
    /// packet was lost for good.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If the arrival time overflows simulated time
    pub fn transmit(&mut self, sim: &mut Simulator, size: u32) -> Result<Option<SimTime>, SimError> {
        let mut start = sim.now().max(self.busy_until);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let on_wire = start
                .checked_add(self.serialization_delay(size))
                .ok_or_else(|| overflow(start))?;
            self.busy_until = on_wire;
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += u64::from(size);

            let lost = sim.rng().random_bool(self.profile.loss_rate);
            if !lost {
                let arrival = on_wire
                    .checked_add(self.profile.delay)
                    .ok_or_else(|| overflow(on_wire))?;
                return Ok(Some(arrival));
            }
            self.stats.packets_lost += 1;

            match self.delivery {
                Delivery::Datagram => return Ok(None),
                Delivery::Reliable { .. } if attempts >= MAX_ATTEMPTS => {
                    tracing::warn!(size, attempts, "giving up on packet after repeated loss");
                    return Ok(None);
                }
                Delivery::Reliable {
                    retransmission_timeout,
                } => {
                    self.stats.retransmissions += 1;
                    start = on_wire
                        .checked_add(retransmission_timeout)
                        .ok_or_else(|| overflow(on_wire))?;
                }
            }
        }
    }

    /// Sends `size` bytes and, if the packet arrives, runs `on_arrival` on
    /// the receiver at the arrival time.
    ///
    /// Returns false if the packet was lost. Arrival at a receiver that has
    /// been dropped in the meantime is silently ignored.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If the arrival time overflows simulated time
    pub fn deliver<R, F>(
        &mut self,
        sim: &mut Simulator,
        size: u32,
        receiver: &Weak<RefCell<R>>,
        on_arrival: F,
    ) -> Result<bool, SimError>
    where
        R: 'static,
        F: FnOnce(&mut R, &mut Simulator) -> Result<(), SimError> + 'static,
    {
        let Some(arrival) = self.transmit(sim, size)? else {
            return Ok(false);
        };
        let receiver = Weak::clone(receiver);
        sim.schedule_at(arrival, move |sim| {
            let Some(receiver) = receiver.upgrade() else {
                return Ok(());
            };
            let mut receiver = receiver.borrow_mut();
            on_arrival(&mut *receiver, sim)
        })?;
        Ok(true)
    }
}

/// Splits `size` bytes into packets of at most `max_payload` bytes.
pub fn fragment(size: u32, max_payload: u32) -> impl Iterator<Item = u32> {
    let max_payload = max_payload.max(1);
    let full = (size / max_payload) as usize;
    let rest = size % max_payload;
    std::iter::repeat_n(max_payload, full).chain((rest > 0).then_some(rest))
}

fn overflow(from: SimTime) -> SimError {
    SimError::InvalidDelay {
        reason: format!("packet arrival after {from} overflows simulated time"),
    }
}
