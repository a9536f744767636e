//! Variable-count gather (gatherv) example.
//!
//! Rank `i` contributes `(i + 1)` elements. The first test lets the group
//! negotiate the lengths; the second places each contribution at an explicit
//! offset of a fixed-size output.
//!
//! Run with: FERROGROUP_WORLD_SIZE=4 cargo run --example gatherv
//!
//! Set FERROGROUP_RECV_TIMEOUT_MS to fail instead of hanging on a lost message.

use ferrogroup::{env, LocalConfig, LocalFabric, Result};

fn main() -> Result<()> {
    env_logger::init();
    let size = env::world_size().unwrap_or(4);
    let config = LocalConfig::from_env();

    let results = LocalFabric::run_with_config(size, config, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size();

        println!("Rank {rank}/{size}: Starting gatherv example");

        // ============================================================
        // Test 1: Negotiated lengths
        // ============================================================
        {
            let send = vec![rank as f64 * 10.0; (rank + 1) as usize];
            let mut recv = Vec::new();

            let sizes = world.gatherv(&send, &mut recv, 0)?;
            assert_eq!(sizes, (1..=size).collect::<Vec<_>>());

            if rank == 0 {
                let mut start = 0;
                for (r, &count) in sizes.iter().enumerate() {
                    for value in &recv[start..start + count as usize] {
                        assert_eq!(*value, r as f64 * 10.0);
                    }
                    start += count as usize;
                }
                println!("  Gatherv test 1 passed ({} total elements gathered)", recv.len());
            }
        }

        // ============================================================
        // Test 2: Explicit layout, contributions stored in reverse rank order
        // ============================================================
        {
            let send: Vec<f64> = (0..=rank).map(|j| rank as f64 * 100.0 + j as f64).collect();

            let counts: Vec<i32> = (0..size).map(|r| r + 1).collect();
            let total: i32 = counts.iter().sum();
            let mut offsets = Vec::with_capacity(counts.len());
            let mut end = total;
            for &count in &counts {
                end -= count;
                offsets.push(end);
            }

            let mut recv = vec![-1.0f64; total as usize];
            world.gatherv_with_layout(&send, &mut recv, &counts, &offsets, 0)?;

            if rank == 0 {
                for r in 0..size as usize {
                    let start = offsets[r] as usize;
                    for j in 0..counts[r] as usize {
                        assert_eq!(recv[start + j], r as f64 * 100.0 + j as f64);
                    }
                }
                println!("  Gatherv test 2 (reversed layout) passed ({total} total elements)");
            }
        }

        world.barrier()?;

        if rank == 0 {
            println!("\n========================================");
            println!("All gatherv tests passed!");
            println!("========================================");
        }
        Ok(())
    })?;
    results.into_iter().collect()
}
