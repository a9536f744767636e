//! All-reduce example - collective reduction operations.
//!
//! Exercises broadcast, reduce and all-reduce with built-in operations.
//!
//! Run with: FERROGROUP_WORLD_SIZE=4 cargo run --example allreduce
//!
//! Set FERROGROUP_RECV_TIMEOUT_MS to fail instead of hanging on a lost message.

use ferrogroup::{env, LocalConfig, LocalFabric, ReduceOp, Result};

fn main() -> Result<()> {
    env_logger::init();
    let size = env::world_size().unwrap_or(4);
    let config = LocalConfig::from_env();

    let results = LocalFabric::run_with_config(size, config, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size();

        println!("Rank {rank}/{size}: Starting collective tests");

        // ============================================================
        // Test 1: Broadcast
        // ============================================================
        {
            let mut data = if rank == 0 {
                vec![1.0, 2.0, 3.0, 4.0, 5.0]
            } else {
                vec![0.0; 5]
            };

            world.broadcast(&mut data, 0)?;
            assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0, 5.0], "Broadcast failed on rank {rank}");

            if rank == 0 {
                println!("✓ Broadcast test passed");
            }
        }

        // ============================================================
        // Test 2: Reduce (sum)
        // ============================================================
        {
            let send = vec![rank as f64 + 1.0; 3];
            let mut recv = vec![0.0; 3];

            world.reduce(&send, &mut recv, ReduceOp::Sum, 0)?;

            if rank == 0 {
                let expected_sum: f64 = (1..=size).map(f64::from).sum();
                assert_eq!(recv, vec![expected_sum; 3], "Reduce Sum failed");
                println!("✓ Reduce Sum test passed (sum = {expected_sum})");
            }
        }

        // ============================================================
        // Test 3: Reduce (max)
        // ============================================================
        {
            let max = world.reduce_scalar(rank as f64 * 10.0, ReduceOp::Max, 0)?;

            if let Some(max) = max {
                assert_eq!(max, (size - 1) as f64 * 10.0, "Reduce Max failed");
                println!("✓ Reduce Max test passed (max = {max})");
            }
        }

        // ============================================================
        // Test 4: All-reduce (sum)
        // ============================================================
        {
            let send = vec![1.0; 4];
            let mut recv = vec![0.0; 4];

            world.all_reduce(&send, &mut recv, ReduceOp::Sum)?;
            assert_eq!(recv, vec![size as f64; 4], "All-reduce failed on rank {rank}");

            if rank == 0 {
                println!("✓ All-reduce Sum test passed");
            }
        }

        // ============================================================
        // Test 5: All-reduce in place (min)
        // ============================================================
        {
            let mut data = [rank + 5, 100 - rank];
            world.all_reduce_in_place(&mut data, ReduceOp::Min)?;
            assert_eq!(data, [5, 100 - (size - 1)]);

            if rank == 0 {
                println!("✓ All-reduce in place Min test passed");
            }
        }

        // ============================================================
        // Test 6: Scalar all-reduce (product)
        // ============================================================
        {
            let product = world.all_reduce_scalar(2i64, ReduceOp::Prod)?;
            assert_eq!(product, 1i64 << size);

            if rank == 0 {
                println!("✓ Scalar all-reduce Prod test passed (product = {product})");
            }
        }

        world.barrier()?;

        if rank == 0 {
            println!("\nAll collective tests passed!");
        }
        Ok(())
    })?;
    results.into_iter().collect()
}
