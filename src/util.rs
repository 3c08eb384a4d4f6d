use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use crate::params::StdpParams;

pub fn get_decay_factor(t: usize, last_t: usize, tau: f32) -> f32 {
    let t_diff = t - last_t;
    (-(t_diff as f32) / tau).exp()
}

pub fn compute_stdp(t_pre_minus_post: i64, stdp_params: &StdpParams) -> f32 {
    let t_pre_minus_post = t_pre_minus_post as f32;

    if t_pre_minus_post > 0.0 {
        stdp_params.factor_pre_after_post
            * (-t_pre_minus_post / stdp_params.tau_pre_after_post).exp()
    } else {
        stdp_params.factor_pre_before_post
            * (t_pre_minus_post / stdp_params.tau_pre_before_post).exp()
    }
}

pub fn get_partition_range(
    num_shards: usize,
    shard_id: usize,
    num_neurons: usize,
) -> Range<usize> {
    let min_shard_size = num_neurons / num_shards;
    let remainder = num_neurons % num_shards;

    if shard_id < remainder {
        let shard_size = min_shard_size + 1;
        let start = shard_size * shard_id;
        let end = start + shard_size;
        Range { start, end }
    } else {
        let start = (min_shard_size + 1) * remainder + min_shard_size * (shard_id - remainder);
        let end = start + min_shard_size;
        Range { start, end }
    }
}

pub fn calculate_hash<T: Hash>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}
