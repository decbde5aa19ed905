//! Integration tests driving a small cluster of in-process `RaftReplica`
//! instances over real loopback TCP (design doc §2's ambient test tooling,
//! §8 scenarios S1 and S6).
//!
//! Each test picks its own `port_base` so the three clusters below never
//! collide with each other or with a real `raftkv_server` running the
//! production default.

use std::time::Duration;

use raftkv::client::KvEndpoint;
use raftkv::raft::client_addr_with_base;
use raftkv::{RaftConfig, RaftReplica};

const POPULATION: u8 = 3;

/// Timing knobs fast enough for a cluster to elect a leader and settle
/// within the sleeps below, without being so fast that ordinary scheduling
/// jitter causes spurious re-elections.
fn fast_config(port_base: u16) -> RaftConfig {
    RaftConfig {
        population: POPULATION,
        port_base,
        election_check_frequency_ms: 40,
        leader_checkin_max_wait_ms: 250,
        heartbeat_period_ms: 50,
        broadcast_timeout_ms: 150,
        settle_delay_ms: 50,
    }
}

async fn spawn_cluster(port_base: u16) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(POPULATION as usize);
    for id in 0..POPULATION {
        let replica = RaftReplica::new_and_setup(id, fast_config(port_base))
            .await
            .expect("replica should bind its peer and client ports");
        handles.push(tokio::spawn(replica.run()));
    }
    handles
}

fn client_endpoint(port_base: u16) -> KvEndpoint {
    let addrs = (0..POPULATION)
        .map(|id| client_addr_with_base(id, port_base))
        .collect();
    KvEndpoint::with_addrs(addrs)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_leader_happy_path() {
    // S1: a client SET, followed by a GET against the cluster, returns the
    // value once it has been applied.
    let port_base = 24000;
    let _replicas = spawn_cluster(port_base).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut client = client_endpoint(port_base);
    assert_eq!(client.request("SET x 100").await.unwrap(), "Ok");
    assert_eq!(client.request("GET x").await.unwrap(), "100");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_then_get_reports_not_found() {
    let port_base = 24100;
    let _replicas = spawn_cluster(port_base).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut client = client_endpoint(port_base);
    assert_eq!(client.request("SET y 1").await.unwrap(), "Ok");
    assert_eq!(client.request("DELETE y").await.unwrap(), "Ok");
    assert_eq!(client.request("GET y").await.unwrap(), "Key not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrecognized_command_reports_an_error_string() {
    let port_base = 24300;
    let _replicas = spawn_cluster(port_base).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut client = client_endpoint(port_base);
    assert_eq!(
        client.request("FROBNICATE x").await.unwrap(),
        "Request not recognized"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_reelects_after_leader_is_cut_off() {
    // S6: once the leader is removed from the cluster, a majority of the
    // remaining peers must elect a new one and keep serving commands.
    let port_base = 24200;
    let replicas = spawn_cluster(port_base).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut client = client_endpoint(port_base);
    assert_eq!(client.request("SET a 1").await.unwrap(), "Ok");

    let leader_addr = client
        .current_leader_addr()
        .expect("a leader should have been found by now");
    let leader_idx = (0..POPULATION)
        .position(|id| client_addr_with_base(id, port_base) == leader_addr)
        .expect("leader address must belong to one of this cluster's replicas");
    replicas[leader_idx].abort();

    // Give the surviving majority enough election cycles to pick a new
    // leader; the client's own redirect-following retries across the
    // remaining replicas in the meantime.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(client.request("SET b 2").await.unwrap(), "Ok");
    assert_eq!(client.request("GET b").await.unwrap(), "2");
}
