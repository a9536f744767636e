//! Sub-groups, display strings and timers.

use ferrogroup::{LocalFabric, ProcessGroup, ReduceOp};
use std::time::Duration;

#[test]
fn split_by_parity_with_reversed_keys() {
    let results = LocalFabric::run(4, |world| {
        let group = world
            .split(world.rank() % 2, -world.rank())
            .unwrap()
            .unwrap();
        let parent_sum = group.all_reduce_scalar(world.rank(), ReduceOp::Sum).unwrap();
        (group.rank(), group.size(), parent_sum, group.to_string())
    })
    .unwrap();

    assert_eq!(results[0], (1, 2, 2, "Group (rank=1, size=2)".to_string()));
    assert_eq!(results[1], (1, 2, 4, "Group (rank=1, size=2)".to_string()));
    assert_eq!(results[2], (0, 2, 2, "Group (rank=0, size=2)".to_string()));
    assert_eq!(results[3], (0, 2, 4, "Group (rank=0, size=2)".to_string()));
}

#[test]
fn negative_color_opts_out() {
    let sizes = LocalFabric::run(3, |world| {
        let color = if world.rank() == 1 { -1 } else { 0 };
        world
            .split(color, world.rank())
            .unwrap()
            .map(|group| group.size())
    })
    .unwrap();
    assert_eq!(sizes, vec![Some(2), None, Some(2)]);
}

#[test]
fn sub_group_point_to_point_uses_group_ranks() {
    LocalFabric::run(4, |world| {
        let Some(upper) = world.split(i32::from(world.rank() >= 2), world.rank()).unwrap() else {
            unreachable!("every rank picked a color");
        };
        if upper.rank() == 0 {
            upper.send(&(world.rank() * 10), 1, 0).unwrap();
        } else {
            let mut value = 0i32;
            let status = upper.receive(&mut value, upper.any_source(), 0).unwrap();
            assert_eq!(status.source, 0);
            assert_eq!(value, (world.rank() - 1) * 10);
        }
    })
    .unwrap();
}

#[test]
fn sub_group_traffic_is_isolated() {
    LocalFabric::run(2, |world| {
        let dup = world.duplicate().unwrap();
        assert_ne!(dup.context(), world.context());
        assert_eq!(dup.to_string(), format!("Group (rank={}, size=2)", world.rank()));
        if world.rank() == 0 {
            dup.send(&1u8, 1, 0).unwrap();
            world.send(&2u8, 1, 0).unwrap();
        } else {
            let mut value = 0u8;
            world.receive(&mut value, 0, 0).unwrap();
            assert_eq!(value, 2);
            dup.receive(&mut value, 0, 0).unwrap();
            assert_eq!(value, 1);
        }
    })
    .unwrap();
}

#[test]
fn repeated_splits_get_distinct_contexts() {
    LocalFabric::run(2, |world| {
        let first = world.split(0, 0).unwrap().unwrap();
        let second = world.split(0, 0).unwrap().unwrap();
        assert_ne!(first.context(), second.context());
        first.barrier().unwrap();
        second.barrier().unwrap();
    })
    .unwrap();
}

#[test]
fn display_strings() {
    let shown = LocalFabric::run(3, |world| world.to_string()).unwrap();
    assert_eq!(
        shown,
        vec![
            "World Group (rank=0, size=3)",
            "World Group (rank=1, size=3)",
            "World Group (rank=2, size=3)",
        ]
    );
    assert_eq!(
        ProcessGroup::serial().to_string(),
        "Serial Group (rank=0, size=1)"
    );
}

#[test]
fn timer_measures_elapsed_time() {
    let group = ProcessGroup::serial();
    let mut timer = group.create_timer();
    timer.start();
    std::thread::sleep(Duration::from_millis(10));
    timer.stop();
    assert!(timer.elapsed() >= Duration::from_millis(10));
    assert!(timer.elapsed_seconds() >= 0.01);
}
