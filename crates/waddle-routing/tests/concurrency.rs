//! Concurrent Routing Table Tests
//!
//! Many threads registering and removing sessions at once must leave the
//! table consistent: every surviving registration resolvable, every removed
//! one gone, and no empty node or domain entries left behind.
//!
//! Run with: `cargo test -p waddle-routing --test concurrency`

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{create_test_table, init_test, TestSession, LOCAL_DOMAIN};
use waddle_routing::{same_handler, Address, HandlerKind, RouteHandler, RoutingTable};

const THREADS: usize = 8;
const RESOURCES_PER_THREAD: usize = 200;

/// Each thread adds its own resources under one node and removes every
/// other one. Returns the sessions still registered, keyed by resource.
fn add_and_remove_under_node(table: &Arc<RoutingTable>, node: &str) -> Vec<(String, TestSession)> {
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(table);
            let barrier = Arc::clone(&barrier);
            let node = node.to_string();
            thread::spawn(move || {
                barrier.wait();
                let mut kept = Vec::new();
                for i in 0..RESOURCES_PER_THREAD {
                    let resource = format!("t{t}-r{i}");
                    let address = Address::full(LOCAL_DOMAIN, &node, &resource);
                    let session = TestSession::new(&address);
                    table.add_route(&address, session.handler(), HandlerKind::Session);
                    if i % 2 == 0 {
                        assert!(table.remove_route(&address).is_some());
                    } else {
                        kept.push((resource, session));
                    }
                }
                kept
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn test_concurrent_add_remove_same_node() {
    init_test();
    let table = Arc::new(create_test_table());

    let kept = add_and_remove_under_node(&table, "alice");

    let routes = table.get_routes(&Address::bare(LOCAL_DOMAIN, "alice"));
    assert_eq!(routes.len(), THREADS * RESOURCES_PER_THREAD / 2);

    let expected: HashSet<String> = kept.iter().map(|(resource, _)| resource.clone()).collect();
    let actual: HashSet<String> = routes
        .iter()
        .filter_map(|handler| handler.address().resource().map(str::to_string))
        .collect();
    assert_eq!(actual, expected);

    for (resource, session) in &kept {
        let address = Address::full(LOCAL_DOMAIN, "alice", resource);
        assert!(same_handler(&table.get_route(&address).unwrap(), &session.handler()));
    }
}

#[test]
fn test_concurrent_removal_prunes_everything() {
    init_test();
    let table = Arc::new(create_test_table());

    let kept = add_and_remove_under_node(&table, "alice");

    let barrier = Arc::new(Barrier::new(THREADS));
    let chunk = kept.len().div_ceil(THREADS);
    let addresses: Vec<Address> = kept
        .iter()
        .map(|(resource, _)| Address::full(LOCAL_DOMAIN, "alice", resource))
        .collect();

    let handles: Vec<_> = addresses
        .chunks(chunk)
        .map(|chunk| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                barrier.wait();
                for address in &chunk {
                    assert!(table.remove_route(address).is_some());
                }
            })
        })
        .collect();
    assert_eq!(handles.len(), THREADS);
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(table.get_routes(&Address::bare(LOCAL_DOMAIN, "alice")).is_empty());
    assert!(table.is_empty());
}

#[test]
fn test_concurrent_first_registration_of_domain() {
    init_test();
    let table = Arc::new(create_test_table());
    let barrier = Arc::new(Barrier::new(THREADS));

    // Every thread races to create the node map for the same fresh domain.
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let address = Address::full("fresh.waddle.social", &format!("user{t}"), "phone");
                let session = TestSession::new(&address);
                barrier.wait();
                table.add_route(&address, session.handler(), HandlerKind::Session);
                session
            })
        })
        .collect();

    let sessions: Vec<TestSession> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let routes = table.get_routes(&Address::domain_only("fresh.waddle.social"));
    assert_eq!(routes.len(), THREADS);
    for test in &sessions {
        let route = table.get_route(test.session.address()).unwrap();
        assert!(same_handler(&route, &test.handler()));
    }
}

#[test]
fn test_readers_never_observe_foreign_sessions() {
    init_test();
    let table = Arc::new(create_test_table());
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..RESOURCES_PER_THREAD {
                    let address = Address::full(LOCAL_DOMAIN, "bob", &format!("t{t}-r{i}"));
                    let session = TestSession::new(&address);
                    table.add_route(&address, session.handler(), HandlerKind::Session);
                    table.remove_route(&address);
                }
            })
        })
        .collect();

    let reader = {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..RESOURCES_PER_THREAD * 4 {
                for handler in table.get_routes(&Address::bare(LOCAL_DOMAIN, "bob")) {
                    assert_eq!(handler.address().node(), Some("bob"));
                }
                // A local miss never turns into the remote placeholder.
                assert!(table
                    .get_route(&Address::full(LOCAL_DOMAIN, "bob", "missing"))
                    .is_none());
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert!(table.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_table() {
    init_test();
    let table = Arc::new(create_test_table());

    let tasks: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let address = Address::full(LOCAL_DOMAIN, "carol", &format!("task{t}"));
                let session = TestSession::available(&address, t as i8);
                table.add_route(&address, session.handler(), HandlerKind::Session);
                tokio::task::yield_now().await;
                session
            })
        })
        .collect();

    let mut sessions = Vec::new();
    for task in tasks {
        sessions.push(task.await.unwrap());
    }

    let bare = Address::bare(LOCAL_DOMAIN, "carol");
    assert_eq!(table.get_routes(&bare).len(), THREADS);

    // Highest priority wins the bare fallback.
    let best = table.get_best_route(&bare).unwrap();
    assert!(same_handler(&best, &sessions[THREADS - 1].handler()));
}
