use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use cti::prelude::*;
use cti::RegistryError;

const THREADS: usize = 8;

#[derive(Debug)]
struct Endpoint {
    route: String,
    hits: AtomicUsize,
}

impl Endpoint {
    fn new(route: &str) -> Self {
        Self {
            route: route.to_string(),
            hits: AtomicUsize::new(0),
        }
    }
}

cti::declare_registry!(Endpoint, "Endpoint", Endpoint::new);

#[test]
fn test_concurrent_register_and_call() {
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let name = format!("concurrent.offset.{}", i);
                let offset = i as i64;
                PackedFunc::register(&name).set_body(move |args, ret| {
                    let value: i64 = args.arg(0)?;
                    ret.reset(value + offset)
                });
                barrier.wait();

                // Every thread calls every other thread's callable.
                (0..THREADS)
                    .map(|j| {
                        let func = PackedFunc::lookup(&format!("concurrent.offset.{}", j)).unwrap();
                        func.invoke::<i64, _>((100,)).unwrap()
                    })
                    .sum::<i64>()
            })
        })
        .collect();

    let expected: i64 = (0..THREADS as i64).map(|j| 100 + j).sum();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }

    let names = PackedFunc::list_names();
    let ours = names.iter().filter(|n| n.starts_with("concurrent.offset.")).count();
    assert_eq!(ours, THREADS);
}

#[test]
fn test_racing_registrations_have_one_winner() {
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                PackedFunc::try_register("concurrent.contested").is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    assert!(matches!(
        PackedFunc::try_register("concurrent.contested"),
        Err(RegistryError::Duplicate { registry: "PackedFunc", .. })
    ));
}

#[test]
fn test_set_body_while_calling() {
    let func = PackedFunc::register("concurrent.swapped");
    func.set_body(|_, ret| ret.reset(1i64));

    let callers: Vec<_> = (0..THREADS)
        .map(|_| {
            thread::spawn(move || {
                for _ in 0..200 {
                    let value: i64 = func.invoke(()).unwrap();
                    assert!(value == 1 || value == 2);
                }
            })
        })
        .collect();

    func.set_body(|_, ret| ret.reset(2i64));

    for caller in callers {
        caller.join().unwrap();
    }
    assert_eq!(func.invoke::<i64, _>(()).unwrap(), 2);
}

#[test]
fn test_custom_registry_type() {
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            thread::spawn(move || {
                let route = format!("/route/{}", i % 2);
                let endpoint = Endpoint::try_register(&route)
                    .ok()
                    .or_else(|| Endpoint::lookup(&route))
                    .unwrap();
                endpoint.hits.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(Endpoint::list_names(), vec!["/route/0", "/route/1"]);
    let total: usize = Endpoint::list_names()
        .iter()
        .filter_map(|route| Endpoint::lookup(route))
        .map(|endpoint| endpoint.hits.load(Ordering::SeqCst))
        .sum();
    assert_eq!(total, THREADS);

    let endpoint = Endpoint::lookup("/route/1").unwrap();
    assert_eq!(endpoint.route, "/route/1");
    assert!(Endpoint::lookup("/route/2").is_none());
    assert!(PackedFunc::lookup("/route/1").is_none());
}
