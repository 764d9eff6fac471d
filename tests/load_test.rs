//! Concurrent traffic while routing state churns.

use std::time::{Duration, Instant};

use ingress_controller::routing::{Delta, Health};

mod common;
use common::{config, MockBackend, TestProxy};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_during_snapshot_churn() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let proxy = TestProxy::start(config(&format!(
        r#"
        [[services]]
        name = "web"
        endpoints = [{{ address = "{}" }}, {{ address = "{}" }}]

        [[routes]]
        name = "all"
        host = "*"
        path_prefix = "/"
        service = "web"
        "#,
        a.addr, b.addr
    )))
    .await;

    // Flip b in and out of rotation; a stays routable throughout
    let table = proxy.table.clone();
    let b_addr = b.addr;
    let churn = tokio::spawn(async move {
        let mut version = 0;
        for i in 0..200u32 {
            let health = if i % 2 == 0 { Health::Unhealthy } else { Health::Healthy };
            version = table
                .publish(Delta::SetHealth {
                    address: b_addr,
                    health,
                    probed_at: None,
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        version
    });

    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = proxy.url("/");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                let res = client.get(&url).send().await.unwrap();
                assert_eq!(res.status(), 200);
                latencies.push(req_start.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }
    let final_version = churn.await.unwrap();

    assert_eq!(all_latencies.len(), total_requests);
    assert_eq!(a.hits() + b.hits(), total_requests);
    assert!(final_version >= 200);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];
    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", start.elapsed());
    println!("P50 Latency:    {:?}", p50);
    println!("P99 Latency:    {:?}", p99);
    println!("Snapshots:      {}", final_version);
    println!("-------------------------\n");
}
