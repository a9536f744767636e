//! Collective operations on groups of several sizes.

use ferrogroup::{LocalFabric, ProcessGroup, ReduceOp, TransportError, UserOp, ANY_SOURCE, ANY_TAG};
use proptest::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn three_process_walkthrough() {
    init_logging();
    let results = LocalFabric::run(3, |world| {
        let value = 10 * (world.rank() + 1);

        let mut gathered = Vec::new();
        world.all_gather(&value, &mut gathered).unwrap();

        let mut total = 0;
        world.all_reduce(&value, &mut total, ReduceOp::Sum).unwrap();

        let mut prefix = 0;
        world.scan(&value, &mut prefix, ReduceOp::Sum).unwrap();

        (gathered, total, prefix)
    })
    .unwrap();

    for (gathered, total, _) in &results {
        assert_eq!(gathered, &vec![10, 20, 30]);
        assert_eq!(*total, 60);
    }
    let prefixes: Vec<i32> = results.iter().map(|r| r.2).collect();
    assert_eq!(prefixes, vec![10, 30, 60]);
}

#[test]
fn barrier_can_repeat() {
    LocalFabric::run(5, |world| {
        for _ in 0..10 {
            world.barrier().unwrap();
        }
    })
    .unwrap();
}

#[test]
fn broadcast_from_any_root() {
    for root in 0..4 {
        let data = LocalFabric::run(4, |world| {
            let mut data = if world.rank() == root {
                vec![root as f64; 3]
            } else {
                Vec::new()
            };
            world.broadcast(&mut data, root).unwrap();
            data
        })
        .unwrap();
        assert!(data.iter().all(|d| d == &vec![root as f64; 3]));
    }
}

#[test]
fn broadcast_strings() {
    let words = LocalFabric::run(3, |world| {
        let mut word = if world.rank() == 1 {
            "hello".to_string()
        } else {
            String::new()
        };
        world.broadcast(&mut word, 1).unwrap();
        word
    })
    .unwrap();
    assert_eq!(words, vec!["hello"; 3]);
}

#[test]
fn broadcast_into_small_view_fails_locally() {
    let results = LocalFabric::run(2, |world| {
        let mut data = [0u32; 2];
        if world.rank() == 0 {
            world.broadcast(&mut [1u32, 2, 3][..], 0)
        } else {
            let result = world.broadcast(&mut data[..], 0);
            assert_eq!(data, [0, 0]);
            result
        }
    })
    .unwrap();
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().unwrap_err().is_communication_failure());
}

#[test]
fn gather_at_root_only() {
    let outputs = LocalFabric::run(4, |world| {
        let mut out = vec![-1i64];
        let chunk = [i64::from(world.rank()), i64::from(world.rank()) * 2];
        world.gather(&chunk, &mut out, 1).unwrap();
        out
    })
    .unwrap();
    assert_eq!(outputs[1], vec![0, 0, 1, 2, 2, 4, 3, 6]);
    for rank in [0, 2, 3] {
        assert_eq!(outputs[rank], vec![-1]);
    }
}

#[test]
fn gather_small_view_fails_everywhere_before_moving_data() {
    let results = LocalFabric::run(3, |world| {
        let chunk = [world.rank(); 2];
        let mut out = [7i32; 5];
        let first = world.gather(&chunk, &mut out[..], 1);
        let mut all = Vec::new();
        world.gather(&chunk, &mut all, 1).unwrap();
        (first, out, all)
    })
    .unwrap();

    for (rank, (first, out, all)) in results.iter().enumerate() {
        let err = first.as_ref().unwrap_err();
        if rank == 1 {
            assert_eq!(
                err.transport_error(),
                Some(&TransportError::Capacity {
                    required: 6,
                    available: 5
                })
            );
            assert_eq!(all, &vec![0, 0, 1, 1, 2, 2]);
        } else {
            assert_eq!(err.transport_error(), Some(&TransportError::RootFailure(1)));
            assert!(all.is_empty());
        }
        assert_eq!(out, &[7; 5]);
    }
}

#[test]
fn gather_rejects_unequal_contributions() {
    let results = LocalFabric::run(3, |world| {
        let chunk = vec![1u8; world.rank() as usize + 1];
        let mut out = Vec::new();
        world.gather(&chunk, &mut out, 0)
    })
    .unwrap();
    let err = results[0].as_ref().unwrap_err();
    assert!(matches!(
        err.transport_error(),
        Some(TransportError::LengthMismatch { .. })
    ));
    assert!(results[1].is_ok() && results[2].is_ok());
}

#[test]
fn gatherv_variable_lengths() {
    let lengths = [2usize, 0, 5];
    let results = LocalFabric::run(3, |world| {
        let rank = world.rank();
        let chunk: Vec<i32> = (0..lengths[rank as usize] as i32)
            .map(|i| rank * 100 + i)
            .collect();
        let mut out = Vec::new();
        let sizes = world.gatherv(&chunk, &mut out, 0).unwrap();
        (sizes, out)
    })
    .unwrap();

    for (sizes, _) in &results {
        assert_eq!(sizes, &vec![2, 0, 5]);
    }
    assert_eq!(results[0].1, vec![0, 1, 200, 201, 202, 203, 204]);
    assert!(results[1].1.is_empty());
    assert!(results[2].1.is_empty());
}

#[test]
fn gatherv_sizes_drive_scatterv_back() {
    let lengths = [2usize, 0, 5];
    let results = LocalFabric::run(3, |world| {
        let rank = world.rank();
        let chunk: Vec<i32> = (0..lengths[rank as usize] as i32)
            .map(|i| rank * 100 + i)
            .collect();
        let mut gathered = Vec::new();
        let sizes = world.gatherv(&chunk, &mut gathered, 0).unwrap();
        let total = gathered.len();
        let mut back = vec![-1];
        world.scatterv(&gathered, &sizes, &mut back, 0).unwrap();
        (chunk, total, back)
    })
    .unwrap();

    assert_eq!(results[0].1, 7);
    for (chunk, _, back) in &results {
        assert_eq!(back, chunk);
    }
}

#[test]
fn gatherv_small_view_fails_everywhere_before_moving_data() {
    let results = LocalFabric::run(3, |world| {
        let chunk = vec![world.rank() as f32; 2];
        let mut out = [9.0f32; 5];
        let result = world.gatherv(&chunk, &mut out[..], 0);
        (result.map(|_| ()), out)
    })
    .unwrap();
    for (result, out) in &results {
        let err = result.as_ref().unwrap_err();
        assert_eq!(
            err.transport_error(),
            Some(&TransportError::Capacity {
                required: 6,
                available: 5
            })
        );
        assert_eq!(out, &[9.0; 5]);
    }
}

#[test]
fn gatherv_with_layout_places_by_offset() {
    let outputs = LocalFabric::run(3, |world| {
        let chunk = vec![world.rank() + 1; world.rank() as usize + 1];
        let mut out = vec![0; 8];
        world
            .gatherv_with_layout(&chunk, &mut out, &[1, 2, 3], &[5, 3, 0], 2)
            .unwrap();
        out
    })
    .unwrap();
    assert_eq!(outputs[2], vec![3, 3, 3, 2, 2, 1, 0, 0]);
    assert_eq!(outputs[0], vec![0; 8]);
}

#[test]
fn scatter_equal_chunks() {
    let chunks = LocalFabric::run(4, |world| {
        let input: Vec<u64> = if world.rank() == 3 {
            (0..8).collect()
        } else {
            Vec::new()
        };
        let mut out = Vec::new();
        world.scatter(&input, &mut out, 3).unwrap();
        out
    })
    .unwrap();
    assert_eq!(chunks, vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7]]);
}

#[test]
fn scatter_indivisible_input_fails_everywhere() {
    let results = LocalFabric::run(3, |world| {
        let input = vec![1i16; 4];
        let mut out = Vec::new();
        world.scatter(&input, &mut out, 0)
    })
    .unwrap();
    assert!(matches!(
        results[0].as_ref().unwrap_err().transport_error(),
        Some(TransportError::InvalidLayout(_))
    ));
    for result in &results[1..] {
        assert_eq!(
            result.as_ref().unwrap_err().transport_error(),
            Some(&TransportError::RootFailure(0))
        );
    }
}

#[test]
fn scatterv_variable_lengths() {
    let chunks = LocalFabric::run(3, |world| {
        let input: Vec<char> = "abcdefg".chars().collect();
        let mut out = vec!['z'];
        world.scatterv(&input, &[2, 0, 5], &mut out, 0).unwrap();
        out
    })
    .unwrap();
    assert_eq!(chunks[0], vec!['a', 'b']);
    assert!(chunks[1].is_empty());
    assert_eq!(chunks[2], vec!['c', 'd', 'e', 'f', 'g']);
}

#[test]
fn scatterv_sizes_only_matter_at_root() {
    let chunks = LocalFabric::run(2, |world| {
        let sizes: &[i32] = if world.rank() == 0 { &[1, 2] } else { &[] };
        let mut out = Vec::new();
        world.scatterv(&[5i8, 6, 7][..], sizes, &mut out, 0).unwrap();
        out
    })
    .unwrap();
    assert_eq!(chunks, vec![vec![5], vec![6, 7]]);
}

#[test]
fn scatterv_invalid_sizes_fail_everywhere() {
    let results = LocalFabric::run(3, |world| {
        let mut out = Vec::new();
        world.scatterv(&[1u32, 2, 3][..], &[1, 1], &mut out, 1)
    })
    .unwrap();
    for result in &results {
        assert!(result.as_ref().unwrap_err().is_communication_failure());
    }
    assert_eq!(
        results[0].as_ref().unwrap_err().transport_error(),
        Some(&TransportError::RootFailure(1))
    );
}

#[test]
fn scatterv_with_layout_truncates_to_view() {
    let chunks = LocalFabric::run(3, |world| {
        let input = [10, 11, 12, 13, 14, 15];
        let mut out = [0i32; 2];
        world
            .scatterv_with_layout(&input, &[1, 3, 2], &[5, 0, 3], &mut out[..], 0)
            .unwrap();
        out
    })
    .unwrap();
    assert_eq!(chunks, vec![[15, 0], [10, 11], [13, 14]]);
}

#[test]
fn all_to_all_transposes() {
    let outputs = LocalFabric::run(3, |world| {
        let input: Vec<i32> = (0..3).map(|j| world.rank() * 10 + j).collect();
        let mut out = Vec::new();
        world.all_to_all(&input, &mut out).unwrap();
        out
    })
    .unwrap();
    for (rank, out) in outputs.iter().enumerate() {
        let expected: Vec<i32> = (0..3).map(|j| j * 10 + rank as i32).collect();
        assert_eq!(out, &expected);
    }
}

#[test]
fn all_to_all_with_wider_chunks() {
    let outputs = LocalFabric::run(2, |world| {
        let base = world.rank() as u8 * 4;
        let input = [base, base + 1, base + 2, base + 3];
        let mut out = [0u8; 4];
        world.all_to_all(&input, &mut out).unwrap();
        out
    })
    .unwrap();
    assert_eq!(outputs, vec![[0, 1, 4, 5], [2, 3, 6, 7]]);
}

#[test]
fn failed_all_to_all_leaves_no_stale_chunks() {
    let results = LocalFabric::run(3, |world| {
        let rank = world.rank();
        let uneven = vec![rank; if rank == 1 { 4 } else { 3 }];
        let mut out = Vec::new();
        let first = world.all_to_all(&uneven, &mut out);

        let mut small = [0i32; 2];
        let input: Vec<i32> = (0..3).map(|j| rank * 100 + j).collect();
        let second = if rank == 2 {
            world.all_to_all(&input, &mut small[..])
        } else {
            world.all_to_all(&input, &mut out)
        };

        world.all_to_all(&input, &mut out).unwrap();
        (first, second, out)
    })
    .unwrap();

    for (rank, (first, second, out)) in results.iter().enumerate() {
        let first = first.as_ref().unwrap_err().transport_error();
        if rank == 1 {
            assert!(matches!(first, Some(TransportError::InvalidLayout(_))));
        } else {
            assert_eq!(first, Some(&TransportError::PeerFailure(1)));
        }

        let second = second.as_ref().unwrap_err().transport_error();
        if rank == 2 {
            assert_eq!(
                second,
                Some(&TransportError::Capacity {
                    required: 3,
                    available: 2
                })
            );
        } else {
            assert_eq!(second, Some(&TransportError::PeerFailure(2)));
        }

        let expected: Vec<i32> = (0..3).map(|j| j * 100 + rank as i32).collect();
        assert_eq!(out, &expected);
    }
}

#[test]
fn reduce_at_root_only() {
    let outputs = LocalFabric::run(4, |world| {
        let input = [world.rank() as f64, -(world.rank() as f64)];
        let mut out = [f64::NAN; 2];
        world.reduce(&input, &mut out, ReduceOp::Max, 2).unwrap();
        out
    })
    .unwrap();
    assert_eq!(outputs[2], [3.0, 0.0]);
    assert!(outputs[0][0].is_nan());
}

#[test]
fn user_reductions_fold_in_rank_order() {
    let outputs = LocalFabric::run(4, |world| {
        let letter = ((b'a' + world.rank() as u8) as char).to_string();
        let concat = UserOp(|a: &String, b: &String| format!("{a}{b}"));
        let mut all = String::new();
        world.all_reduce(&letter, &mut all, &concat).unwrap();
        let mut prefix = String::new();
        world.scan(&letter, &mut prefix, &concat).unwrap();
        (all, prefix)
    })
    .unwrap();
    let prefixes: Vec<&str> = outputs.iter().map(|(_, p)| p.as_str()).collect();
    assert_eq!(prefixes, vec!["a", "ab", "abc", "abcd"]);
    assert!(outputs.iter().all(|(all, _)| all == "abcd"));
}

#[test]
fn scalar_reductions() {
    let results = LocalFabric::run(4, |world| {
        let value = i64::from(world.rank()) + 1;
        (
            world.all_reduce_scalar(value, ReduceOp::Prod).unwrap(),
            world.reduce_scalar(value, ReduceOp::Sum, 3).unwrap(),
            world.scan_scalar(value, ReduceOp::Min).unwrap(),
        )
    })
    .unwrap();
    assert!(results.iter().all(|r| r.0 == 24));
    assert_eq!(
        results.iter().map(|r| r.1).collect::<Vec<_>>(),
        vec![None, None, None, Some(10)]
    );
    assert!(results.iter().all(|r| r.2 == 1));
}

#[test]
fn all_reduce_in_place_sums() {
    let outputs = LocalFabric::run(3, |world| {
        let mut data = vec![1u32, world.rank() as u32];
        world.all_reduce_in_place(&mut data, ReduceOp::Sum).unwrap();
        data
    })
    .unwrap();
    assert!(outputs.iter().all(|d| d == &vec![3, 3]));
}

#[test]
fn reduce_length_mismatch_reaches_everyone_in_all_reduce() {
    let results = LocalFabric::run(3, |world| {
        let input = vec![1i32; if world.rank() == 2 { 3 } else { 2 }];
        let mut out = Vec::new();
        world.all_reduce(&input, &mut out, ReduceOp::Sum)
    })
    .unwrap();
    assert!(matches!(
        results[0].as_ref().unwrap_err().transport_error(),
        Some(TransportError::LengthMismatch { .. })
    ));
    for result in &results[1..] {
        assert_eq!(
            result.as_ref().unwrap_err().transport_error(),
            Some(&TransportError::RootFailure(0))
        );
    }
}

#[test]
fn invalid_root_is_structural() {
    LocalFabric::run(2, |world| {
        let mut data = vec![0u8];
        assert!(world.broadcast(&mut data, 2).unwrap_err().is_invalid_group());
        assert!(world.gather(&1u8, &mut data, -1).unwrap_err().is_invalid_group());
        assert!(world
            .reduce(&1u8, &mut data, ReduceOp::Sum, 5)
            .unwrap_err()
            .is_invalid_group());
    })
    .unwrap();
}

#[test]
fn collectives_and_user_traffic_do_not_mix() {
    LocalFabric::run(2, |world| {
        if world.rank() == 0 {
            world.send(&7i32, 1, 0).unwrap();
        }
        let mut shared = if world.rank() == 0 { 99i32 } else { 0 };
        world.broadcast(&mut shared, 0).unwrap();
        assert_eq!(shared, 99);
        if world.rank() == 1 {
            let mut value = 0i32;
            let status = world.receive(&mut value, ANY_SOURCE, ANY_TAG).unwrap();
            assert_eq!((value, status.tag), (7, 0));
        }
    })
    .unwrap();
}

fn summary(group: &ProcessGroup) -> (i32, i32, Vec<i32>, Vec<i32>) {
    let rank = group.rank();
    let total = group.all_reduce_scalar(rank + 1, ReduceOp::Sum).unwrap();
    let prefix = group.scan_scalar(rank + 1, ReduceOp::Prod).unwrap();
    let mut gathered = Vec::new();
    group.all_gather(&[rank, rank * 2][..], &mut gathered).unwrap();
    let mut shared = [rank; 2];
    group.broadcast(&mut shared, 0).unwrap();
    (total, prefix, gathered, shared.to_vec())
}

#[test]
fn serial_group_matches_world_of_one() {
    let serial = summary(&ProcessGroup::serial());
    let world = LocalFabric::run(1, |world| summary(&world)).unwrap();
    assert_eq!(world, vec![serial.clone()]);
    assert_eq!(serial, (1, 1, vec![0, 0], vec![0, 0]));

    let four = LocalFabric::run(4, |world| summary(&world)).unwrap();
    assert_eq!(four[3], (10, 24, vec![0, 0, 1, 2, 2, 4, 3, 6], vec![0, 0]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn gatherv_then_scatterv_restores_input(
        lengths in prop::collection::vec(0usize..4, 1..5),
        root_pick in 0i32..4,
    ) {
        let size = lengths.len() as i32;
        let root = root_pick % size;
        let results = LocalFabric::run(size, |world| {
            let rank = world.rank();
            let chunk: Vec<i64> = (0..lengths[rank as usize] as i64)
                .map(|j| i64::from(rank) * 10 + j)
                .collect();
            let mut gathered = Vec::new();
            let sizes = world.gatherv(&chunk, &mut gathered, root)?;
            let mut back = Vec::new();
            world.scatterv(&gathered, &sizes, &mut back, root)?;
            Ok::<_, ferrogroup::Error>((chunk, sizes, back))
        })
        .unwrap();

        let expected: Vec<i32> = lengths.iter().map(|&len| len as i32).collect();
        for result in results {
            let (chunk, sizes, back) = result.unwrap();
            prop_assert_eq!(&sizes, &expected);
            prop_assert_eq!(back, chunk);
        }
    }

    #[test]
    fn scatter_then_gather_restores_input(
        size in 1i32..5,
        chunk in 0usize..4,
        root_pick in 0i32..4,
        seed in any::<i64>(),
    ) {
        let root = root_pick % size;
        let input: Vec<i64> = (0..size as usize * chunk)
            .map(|i| seed.wrapping_add(i as i64))
            .collect();
        let results = LocalFabric::run(size, |world| {
            let mut part = Vec::new();
            world.scatter(&input, &mut part, root)?;
            let mut back = Vec::new();
            world.gather(&part, &mut back, root)?;
            Ok::<_, ferrogroup::Error>((part.len(), back))
        })
        .unwrap();

        for (rank, result) in results.into_iter().enumerate() {
            let (part_len, back) = result.unwrap();
            prop_assert_eq!(part_len, chunk);
            if rank as i32 == root {
                prop_assert_eq!(&back, &input);
            } else {
                prop_assert!(back.is_empty());
            }
        }
    }
}
