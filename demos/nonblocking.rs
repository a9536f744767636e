//! Non-blocking operations example.
//!
//! Exchanges halo values with both ring neighbours using non-blocking sends
//! and receives, overlapping the exchange with local computation.
//!
//! Run with: FERROGROUP_WORLD_SIZE=4 cargo run --example nonblocking
//!
//! Set FERROGROUP_RECV_TIMEOUT_MS to fail instead of hanging on a lost message.

use ferrogroup::{env, LocalConfig, LocalFabric, Request, Result};

fn main() -> Result<()> {
    env_logger::init();
    let size = env::world_size().unwrap_or(4);
    let config = LocalConfig::from_env();

    let results = LocalFabric::run_with_config(size, config, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size();

        if size < 2 {
            eprintln!("This example requires at least 2 processes");
            return Ok(());
        }

        let left = (rank + size - 1) % size;
        let right = (rank + 1) % size;

        // ============================================================
        // Test 1: Halo exchange with wait_all
        // ============================================================
        {
            let local: Vec<f64> = (0..8).map(|i| rank as f64 * 10.0 + i as f64).collect();
            let mut from_left = [0.0f64; 1];
            let mut from_right = [0.0f64; 1];

            let timer_start = ferrogroup::wtime();
            let requests = vec![
                world.ireceive(&mut from_left, left, 0)?,
                world.ireceive(&mut from_right, right, 1)?,
                world.isend(&local[7..], right, 0)?,
                world.isend(&local[..1], left, 1)?,
            ];

            // Interior work while the halos are in flight
            let interior: f64 = local[1..7].iter().sum();

            let statuses = Request::wait_all(requests)?;
            let elapsed = ferrogroup::wtime() - timer_start;

            assert_eq!(statuses[0].source, left);
            assert_eq!(from_left[0], left as f64 * 10.0 + 7.0);
            assert_eq!(from_right[0], right as f64 * 10.0);
            println!(
                "Rank {rank}: interior sum {interior}, halos ({}, {}) in {elapsed:.6}s",
                from_left[0], from_right[0]
            );
        }

        // ============================================================
        // Test 2: Polling with test()
        // ============================================================
        {
            let mut token = 0u64;
            let mut polls = 0u64;
            {
                let mut request = world.ireceive(&mut token, left, 2)?;
                world.send(&(rank as u64), right, 2)?;
                while !request.test()? {
                    polls += 1;
                    std::thread::yield_now();
                }
            }
            assert_eq!(token, left as u64);
            println!("Rank {rank}: token from {left} after {polls} polls");
        }

        world.barrier()?;

        if rank == 0 {
            println!("\nAll nonblocking tests passed!");
        }
        Ok(())
    })?;
    results.into_iter().collect()
}
