//! Key and workload generation

use rand::seq::SliceRandom;
use rand::Rng;

/// `count` distinct keys in a stable order.
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("bench-key-{:08}", i)).collect()
}

/// `count` distinct keys in random order.
pub fn shuffled_keys(count: usize) -> Vec<String> {
    let mut keys = generate_keys(count);
    keys.shuffle(&mut rand::thread_rng());
    keys
}

/// One step of a mixed workload.
#[derive(Debug, Clone)]
pub enum Op {
    Get(String),
    Put(String, u64),
    Evict(String),
}

/// Random mix of operations over `keys`, `read_percent` of them reads.
pub fn mixed_workload(keys: &[String], count: usize, read_percent: u32) -> Vec<Op> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let key = keys[rng.gen_range(0..keys.len())].clone();
            let roll = rng.gen_range(0..100);
            if roll < read_percent {
                Op::Get(key)
            } else if roll < read_percent + (100 - read_percent) * 3 / 4 {
                Op::Put(key, rng.gen())
            } else {
                Op::Evict(key)
            }
        })
        .collect()
}
