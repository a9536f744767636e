//! Ring communication example - point-to-point communication.
//!
//! Each process sends data to the next process in a ring pattern.
//!
//! Run with: FERROGROUP_WORLD_SIZE=4 cargo run --example ring
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

        if size < 2 {
            eprintln!("This example requires at least 2 processes");
            return Ok(());
        }

        let next = (rank + 1) % size;
        let prev = (rank + size - 1) % size;

        let send_data = vec![rank as f64 * 100.0 + 1.0, rank as f64 * 100.0 + 2.0];
        let mut recv_data = vec![0.0; 2];

        println!("Rank {rank}: sending {send_data:?} to rank {next}");

        // Sends are buffered, so every rank can send before it receives
        world.send(&send_data, next, 0)?;
        let status = world.receive(&mut recv_data, prev, 0)?;
        println!(
            "Rank {rank}: received {recv_data:?} from rank {} (tag={}, count={})",
            status.source, status.tag, status.count
        );

        let expected = vec![prev as f64 * 100.0 + 1.0, prev as f64 * 100.0 + 2.0];
        assert_eq!(recv_data, expected, "Data mismatch!");

        world.barrier()?;

        if rank == 0 {
            println!("\nRing communication test passed!");
        }
        Ok(())
    })?;
    results.into_iter().collect()
}
