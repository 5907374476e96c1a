//! Test-only lossy and delayed transport.
//!
//! The simulator holds sent packets in a delay buffer keyed by their
//! scheduled delivery time and releases them from `receive_packet` once the
//! driven clock passes that instant. Configured states inject loss,
//! one-way latency, and jitter; with more than one state the simulator
//! switches between them over time, so a test can cycle through good and
//! bad network conditions.

use std::time::{Duration, Instant};

use bitlane_core::TimeBase;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

use crate::address::Address;

/// One set of simulated network conditions.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorState {
    /// One-way delivery latency.
    pub latency: Duration,
    /// Maximum deviation applied to the latency, both directions.
    pub jitter: Duration,
    /// Probability in `[0, 1]` that a packet is dropped.
    pub packet_loss: f32,
}

impl SimulatorState {
    /// Creates a state from latency, jitter, and loss probability.
    pub fn new(latency: Duration, jitter: Duration, packet_loss: f32) -> Self {
        debug_assert!((0.0..=1.0).contains(&packet_loss));
        Self { latency, jitter, packet_loss }
    }
}

#[derive(Debug)]
struct PendingPacket {
    delivery_time: Instant,
    from: Address,
    payload: Vec<u8>,
}

const STATE_SWITCH_INTERVAL: Duration = Duration::from_secs(1);

/// Lossy, delayed, reordering in-memory transport for tests.
#[derive(Debug)]
pub struct NetworkSimulator {
    states: Vec<SimulatorState>,
    active_state: usize,
    pending: Vec<PendingPacket>,
    time: Instant,
    last_state_switch: Instant,
    rng: StdRng,
}

impl NetworkSimulator {
    /// Creates a simulator with a random seed. With no states configured it
    /// is a zero-latency, lossless pass-through.
    pub fn new(time: Instant) -> Self {
        Self::with_seed(rand::rng().random(), time)
    }

    /// Creates a simulator with an explicit seed so failures reproduce.
    pub fn with_seed(seed: u64, time: Instant) -> Self {
        Self {
            states: Vec::new(),
            active_state: 0,
            pending: Vec::new(),
            time,
            last_state_switch: time,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Adds a network condition state. The first added state becomes
    /// active.
    pub fn add_state(&mut self, state: SimulatorState) {
        self.states.push(state);
    }

    /// Returns the number of packets waiting in the delay buffer.
    pub fn pending_packets(&self) -> usize {
        self.pending.len()
    }

    /// Sends a packet through the simulated network. It is dropped with the
    /// active state's loss probability, otherwise scheduled for delivery
    /// after latency plus jitter.
    pub fn send_packet(&mut self, from: Address, payload: Vec<u8>) {
        let (latency, jitter, packet_loss) = match self.states.get(self.active_state) {
            Some(state) => (state.latency, state.jitter, state.packet_loss),
            None => (Duration::ZERO, Duration::ZERO, 0.0),
        };

        if packet_loss > 0.0 && self.rng.random::<f32>() < packet_loss {
            trace!(from = %from, bytes = payload.len(), "simulator dropped packet");
            return;
        }

        let jitter_secs = jitter.as_secs_f64();
        let offset = if jitter_secs > 0.0 {
            self.rng.random_range(-jitter_secs..=jitter_secs)
        } else {
            0.0
        };
        let delay = (latency.as_secs_f64() + offset).max(0.0);
        let delivery_time = self.time + Duration::from_secs_f64(delay);
        self.pending.push(PendingPacket { delivery_time, from, payload });
    }

    /// Advances the simulator clock and, with several states configured,
    /// periodically hops to a random one.
    pub fn update(&mut self, time_base: &TimeBase) {
        self.time = time_base.time;
        if self.states.len() > 1
            && self.time.duration_since(self.last_state_switch) >= STATE_SWITCH_INTERVAL
        {
            self.active_state = self.rng.random_range(0..self.states.len());
            self.last_state_switch = self.time;
        }
    }

    /// Releases one packet whose scheduled delivery time has passed, or
    /// `None` if nothing is due yet.
    pub fn receive_packet(&mut self) -> Option<(Address, Vec<u8>)> {
        let index = self.pending.iter().position(|packet| packet.delivery_time <= self.time)?;
        let packet = self.pending.swap_remove(index);
        Some((packet.from, packet.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> Address {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn tick(time: Instant) -> TimeBase {
        TimeBase::new(time, Duration::from_millis(10))
    }

    #[test]
    fn test_pass_through_without_states() {
        let start = Instant::now();
        let mut simulator = NetworkSimulator::with_seed(1, start);

        simulator.send_packet(test_address(), vec![1, 2, 3]);
        simulator.update(&tick(start));
        let (from, payload) = simulator.receive_packet().unwrap();
        assert_eq!(from, test_address());
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(simulator.receive_packet().is_none());
    }

    #[test]
    fn test_latency_holds_packets_until_due() {
        let start = Instant::now();
        let mut simulator = NetworkSimulator::with_seed(1, start);
        simulator.add_state(SimulatorState::new(Duration::from_millis(50), Duration::ZERO, 0.0));

        simulator.send_packet(test_address(), vec![7]);
        simulator.update(&tick(start + Duration::from_millis(10)));
        assert!(simulator.receive_packet().is_none());

        simulator.update(&tick(start + Duration::from_millis(60)));
        assert!(simulator.receive_packet().is_some());
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let start = Instant::now();
        let mut simulator = NetworkSimulator::with_seed(1, start);
        simulator.add_state(SimulatorState::new(Duration::ZERO, Duration::ZERO, 1.0));

        for index in 0..32u8 {
            simulator.send_packet(test_address(), vec![index]);
        }
        assert_eq!(simulator.pending_packets(), 0);
    }

    #[test]
    fn test_partial_loss_is_deterministic_under_seed() {
        let start = Instant::now();
        let count = |seed: u64| {
            let mut simulator = NetworkSimulator::with_seed(seed, start);
            simulator.add_state(SimulatorState::new(Duration::ZERO, Duration::ZERO, 0.5));
            for index in 0..64u8 {
                simulator.send_packet(test_address(), vec![index]);
            }
            simulator.pending_packets()
        };

        let first = count(42);
        assert_eq!(first, count(42), "same seed must drop the same packets");
        assert!(first > 0 && first < 64, "loss of 0.5 should drop some but not all");
    }
}
