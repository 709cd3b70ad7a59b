//! Snowflake-style post id allocation.
//!
//! Layout (most significant first): 41 bits of milliseconds since [`EPOCH_MS`],
//! 10 bits of node id, 12 bits of per-millisecond sequence. Ids from one node
//! are strictly increasing, which is what the recency feed orders by.

use std::sync::Mutex;

use super::entities::now_millis;

/// 2024-01-01T00:00:00Z.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
pub struct SnowflakeGenerator {
    node: i64,
    state: Mutex<(i64, i64)>,
}

impl SnowflakeGenerator {
    pub fn new(node: u16) -> Self {
        Self {
            node: i64::from(node.min(MAX_NODE)),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next_id_at(now_millis())
    }

    fn next_id_at(&self, now_ms: i64) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last_ms, sequence) = *state;

        // Clock went backwards or same millisecond: keep issuing from the last tick.
        let mut tick = now_ms.max(last_ms);
        let mut next_sequence = if tick == last_ms { sequence + 1 } else { 0 };
        if next_sequence > MAX_SEQUENCE {
            tick += 1;
            next_sequence = 0;
        }
        *state = (tick, next_sequence);

        ((tick - EPOCH_MS) << (NODE_BITS + SEQUENCE_BITS))
            | (self.node << SEQUENCE_BITS)
            | next_sequence
    }
}
