//! End-to-end scenarios driven against the in-process fake browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use browser_cluster::test_support::{FakeBrowser, FakeBrowserStats};
use browser_cluster::{Cluster, ClusterConfig, ClusterError, FnJob, Job, JobId, JobOutcome};

fn small_cluster(pool_size: usize, time_to_live: u32) -> (Cluster, Arc<FakeBrowserStats>) {
    let stats = Arc::new(FakeBrowserStats::default());
    let config = ClusterConfig::builder()
        .pool_size(pool_size)
        .time_to_live(time_to_live)
        .spill_threshold(64)
        .build();
    let cluster = Cluster::new(config, FakeBrowser::factory(Arc::clone(&stats), 200)).unwrap();
    (cluster, stats)
}

#[test]
fn single_job_reports_single_result() {
    let (cluster, _stats) = small_cluster(2, 10);
    let results = Arc::new(std::sync::Mutex::new(Vec::new()));
    let results2 = Arc::clone(&results);

    cluster
        .explore("https://example.com", serde_json::json!({}), move |result| {
            results2.lock().unwrap().push(result);
        })
        .unwrap();
    cluster.wait().unwrap();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].payload["resource"], "https://example.com");
}

#[test]
fn three_way_fan_out_drains_before_parent_reports_done() {
    let (cluster, _stats) = small_cluster(3, 10);
    let results = Arc::new(AtomicUsize::new(0));
    let results2 = Arc::clone(&results);

    // Allocate the parent id ourselves so the root job's own body can name it
    // when spawning children that must share it.
    let parent_id = JobId::new_root();
    let root = FnJob::new_child(parent_id, move |_browser, handle| {
        for child_index in 0..3u32 {
            let child: Box<dyn Job> = Box::new(FnJob::new_child(parent_id, move |_b, _h| {
                Ok(JobOutcome::single(browser_cluster::JobResult::new(
                    parent_id,
                    serde_json::json!({ "child": child_index }),
                )))
            }));
            handle.queue_child(child).unwrap();
        }
        Ok(JobOutcome::empty())
    });

    cluster
        .queue(Box::new(root), move |_result| {
            results2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    cluster.wait().unwrap();
    assert_eq!(results.load(Ordering::SeqCst), 3);
    assert!(cluster.is_done());
}

#[test]
fn explore_follows_options_via_the_forwarder() {
    let (cluster, _stats) = small_cluster(2, 10);
    let resources = Arc::new(std::sync::Mutex::new(Vec::new()));
    let resources2 = Arc::clone(&resources);

    cluster
        .explore(
            "https://example.com",
            serde_json::json!({ "follow": ["https://example.com/a", "https://example.com/b"] }),
            move |result| {
                resources2
                    .lock()
                    .unwrap()
                    .push(result.payload["resource"].as_str().unwrap().to_string());
            },
        )
        .unwrap();
    cluster.wait().unwrap();

    let mut resources = resources.lock().unwrap();
    resources.sort();
    assert_eq!(
        *resources,
        vec![
            "https://example.com",
            "https://example.com/a",
            "https://example.com/b",
        ]
    );
}

#[test]
fn skip_registry_lets_exactly_one_racing_worker_proceed() {
    let (cluster, _stats) = small_cluster(4, 10);
    let proceeded = Arc::new(AtomicUsize::new(0));
    let shared_id = JobId::new_for_test(777);

    for _ in 0..4 {
        let proceeded = Arc::clone(&proceeded);
        cluster
            .queue_fn(
                move |_browser, handle| {
                    if handle.skip(shared_id, "click#submit") {
                        proceeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(JobOutcome::empty())
                },
                |_result| {},
            )
            .unwrap();
    }

    cluster.wait().unwrap();
    // All four workers race the same fingerprint; exactly one is allowed to
    // actually perform the action.
    assert_eq!(proceeded.load(Ordering::SeqCst), 1);
}

#[test]
fn recycling_shuts_down_the_old_browser_after_its_ttl() {
    let (cluster, stats) = small_cluster(1, 2);

    for i in 0..5 {
        cluster
            .explore(format!("https://example.com/{i}"), serde_json::json!({}), |_| {})
            .unwrap();
    }
    cluster.wait().unwrap();
    cluster.shutdown();

    // Two recycles (after page 2 and page 4) plus the final shutdown.
    assert_eq!(stats.shutdowns.load(Ordering::SeqCst), 3);
}

#[test]
fn shutdown_unblocks_a_concurrent_wait_with_an_error() {
    let (cluster, _stats) = small_cluster(1, 10);
    let cluster = Arc::new(cluster);

    // Keep the pool permanently busy so `wait` would otherwise block forever.
    cluster
        .queue_fn(
            |_browser, _handle| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(JobOutcome::empty())
            },
            |_| {},
        )
        .unwrap();

    let waiter = {
        let cluster = Arc::clone(&cluster);
        std::thread::spawn(move || cluster.wait())
    };

    std::thread::sleep(Duration::from_millis(20));
    cluster.shutdown();

    let result = waiter.join().unwrap();
    assert_eq!(result, Err(ClusterError::AlreadyShutdown));
}

#[test]
fn never_ending_provider_survives_one_hundred_resubmissions() {
    let (cluster, _stats) = small_cluster(1, 10);
    let handoffs = Arc::new(AtomicUsize::new(0));
    let handoffs2 = Arc::clone(&handoffs);

    let id = cluster
        .with_browser_provider(move |_browser| {
            handoffs2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    for _ in 0..100 {
        cluster.resubmit_provider(id).unwrap();
    }
    cluster.wait().unwrap();

    assert_eq!(handoffs.load(Ordering::SeqCst), 101);
}
