//! Prefix sum (scan) example.
//!
//! Computes inclusive prefix sums of rank values across all processes, with
//! the vector form, the scalar convenience method and a user reduction.
//!
//! Run with: FERROGROUP_WORLD_SIZE=4 cargo run --example scan
//!
//! Set FERROGROUP_RECV_TIMEOUT_MS to fail instead of hanging on a lost message.

use ferrogroup::{env, LocalConfig, LocalFabric, ReduceOp, Result, UserOp};

fn main() -> Result<()> {
    env_logger::init();
    let size = env::world_size().unwrap_or(4);
    let config = LocalConfig::from_env();

    let results = LocalFabric::run_with_config(size, config, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size();

        println!("Rank {rank}/{size}: Starting scan examples");

        // ============================================================
        // Test 1: Inclusive scan (vector)
        // ============================================================
        //
        // After the scan, rank i holds the element-wise sum of the
        // contributions of ranks 0..=i.
        {
            let send = vec![rank as f64 + 1.0; 3];
            let mut recv = vec![0.0f64; 3];

            world.scan(&send, &mut recv, ReduceOp::Sum)?;

            let expected = (rank + 1) as f64 * (rank + 2) as f64 / 2.0;
            for (j, &val) in recv.iter().enumerate() {
                assert!(
                    (val - expected).abs() < f64::EPSILON,
                    "Rank {rank}: inclusive scan mismatch at index {j}: got {val}, expected {expected}"
                );
            }

            if rank == 0 {
                println!("  Inclusive scan (vector) passed");
            }
        }

        // ============================================================
        // Test 2: Inclusive scan (scalar convenience)
        // ============================================================
        {
            let prefix_sum = world.scan_scalar(1.0f64, ReduceOp::Sum)?;
            assert!((prefix_sum - (rank + 1) as f64).abs() < f64::EPSILON);

            if rank == 0 {
                println!("  Inclusive scan (scalar) passed");
            }
        }

        // ============================================================
        // Test 3: Scan with a user reduction
        // ============================================================
        //
        // String concatenation is associative but not commutative, so the
        // result shows the rank order of the fold.
        {
            let concat = UserOp(|a: &String, b: &String| format!("{a}{b}"));
            let prefix = world.scan_scalar(rank.to_string(), &concat)?;
            let expected: String = (0..=rank).map(|r| r.to_string()).collect();
            assert_eq!(prefix, expected);

            println!("  Rank {rank}: concatenated prefix {prefix:?}");
        }

        world.barrier()?;

        if rank == 0 {
            println!("\nAll scan tests passed!");
        }
        Ok(())
    })?;
    results.into_iter().collect()
}
