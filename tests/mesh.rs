// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! End-to-end mesh formation and routing scenarios over the in-process
//! simulator, with every protocol period shrunk so whole lives of the mesh
//! fit into a test.

use meshnode::config::{Config, Timing, BRIDGE_PORT, MAX_CHILDREN};
use meshnode::crypto::MasterKey;
use meshnode::node::NodeHandle;
use meshnode::sim::SimNet;
use meshnode::{Node, NodeId};

use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const LONG: Duration = Duration::from_secs(30);
const GRACE: Duration = Duration::from_millis(400);

fn id(byte: u8) -> NodeId {
    NodeId::from_bytes([0, 0, 0, 0, 0, byte])
}

fn test_config() -> Config {
    Config {
        credential: Some("shared mesh credential".to_string()),
        pmk: MasterKey::from_secret("test-pmk-0123456").unwrap(),
        lmk: MasterKey::from_secret("test-lmk-0123456").unwrap(),
        root: None,
        router_ssid: None,
        // every node lives on this host; each server picks its own port
        server_port: 0,
        bridge_port: BRIDGE_PORT,
        user_bridge: false,
        max_children: MAX_CHILDREN,
        emit_root_elected: false,
        timing: Timing {
            advertise_ms: 150,
            relay_ms: 400,
            sweep_ms: 50,
            settle_ms: 500,
            mps_window_ms: 4_000,
            mps_retry_ms: 100,
            beacon_ms: 300,
            propagate_ms: 150,
            claim_ms: 250,
        },
    }
}

fn spawn_node(net: &SimNet, byte: u8, config: Config) -> NodeHandle {
    let node_id = id(byte);
    let radio = net.radio(node_id, &config.pmk);
    let wifi = net.wifi(node_id);
    let (node, handle) = Node::new(node_id, config, radio, wifi).unwrap();
    let _task = tokio::spawn(node.run());
    handle
}

async fn wait_tree_size(handle: &mut NodeHandle, size: usize) {
    timeout(LONG, handle.wait_status(|s| s.tree_size() == size))
        .await
        .unwrap_or_else(|_| {
            panic!(
                "{}: tree never reached {size} nodes, status {:?}",
                handle.id(),
                handle.status()
            )
        })
        .unwrap();
}

/// Scenario: a held node hands its credential to a button-pressed requester
/// within the pairing window.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn button_pairing_transfers_the_credential() {
    let net = SimNet::new();
    let holder = spawn_node(&net, 1, test_config());

    let mut requester_config = test_config();
    requester_config.credential = None;
    let mut requester = spawn_node(&net, 2, requester_config);

    assert!(!requester.status().has_credential);

    // both ends pressed inside the pairing band
    holder.press_button(5_000).await.unwrap();
    requester.press_button(5_000).await.unwrap();

    timeout(LONG, requester.wait_status(|s| s.has_credential))
        .await
        .expect("no credential arrived within the window")
        .unwrap();
}

/// Scenario: a press outside the band must not open the window, so the
/// requester never completes an exchange.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_and_long_presses_do_not_pair() {
    let net = SimNet::new();
    let holder = spawn_node(&net, 1, test_config());

    let mut requester_config = test_config();
    requester_config.credential = None;
    let requester = spawn_node(&net, 2, requester_config);

    holder.press_button(4_000).await.unwrap(); // too short
    requester.press_button(5_000).await.unwrap();
    holder.press_button(9_000).await.unwrap(); // too long

    sleep(Duration::from_secs(2)).await;
    assert!(!requester.status().has_credential);
}

/// Scenario: with a settled neighbourhood the lowest id elects itself root
/// and claims the other node as its child.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lowest_id_becomes_root_and_claims() {
    let net = SimNet::new();
    let mut a = spawn_node(&net, 1, test_config());
    let mut b = spawn_node(&net, 2, test_config());

    let status = timeout(LONG, a.wait_status(|s| s.is_root))
        .await
        .expect("no root elected")
        .unwrap();
    assert!(status.in_tree);

    wait_tree_size(&mut a, 2).await;
    let b_status = timeout(LONG, b.wait_status(|s| s.parent.is_some()))
        .await
        .expect("b never joined")
        .unwrap();
    assert_eq!(b_status.parent, Some(id(1)));
    assert!(!b_status.is_root);
}

/// Builds a three node chain by capping the root at one child, and returns
/// the handles plus the (middle, leaf) split.
async fn build_chain(net: &SimNet) -> (BTreeMap<NodeId, NodeHandle>, NodeId, NodeId) {
    let mut config = test_config();
    config.max_children = 1;

    let mut handles = BTreeMap::new();
    for byte in 1..=3 {
        let _ = handles.insert(id(byte), spawn_node(net, byte, config.clone()));
    }
    for handle in handles.values_mut() {
        wait_tree_size(handle, 3).await;
    }

    // with one child per node the tree is a chain below the root
    let statuses: BTreeMap<NodeId, _> = handles
        .iter()
        .map(|(id, handle)| (*id, handle.status()))
        .collect();
    assert!(statuses[&id(1)].is_root);
    let middle = *statuses
        .iter()
        .find(|(_, s)| s.parent == Some(id(1)))
        .map(|(id, _)| id)
        .expect("no child of the root");
    let leaf = *statuses
        .iter()
        .find(|(_, s)| s.parent == Some(middle))
        .map(|(id, _)| id)
        .expect("no grandchild of the root");
    (handles, middle, leaf)
}

/// Scenario: an application frame injected at the chain's tail arrives at
/// the root exactly once, forwarded by the middle node.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unicast_follows_the_tree_path() {
    let net = SimNet::new();
    let (mut handles, _middle, leaf) = build_chain(&net).await;

    handles[&leaf]
        .send_to(id(1), json!({"ping": 1}))
        .await
        .unwrap();

    let root = handles.get_mut(&id(1)).unwrap();
    let event = timeout(LONG, root.next_app_event())
        .await
        .expect("frame never arrived")
        .expect("node gone");
    assert_eq!(event.src, leaf);
    assert_eq!(event.payload, json!({"ping": 1}));

    // exactly one delivery
    assert!(timeout(GRACE, root.next_app_event()).await.is_err());
}

/// Scenario: a flooded blink reaches every other node exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_reaches_the_whole_chain_once() {
    let net = SimNet::new();
    let (mut handles, middle, leaf) = build_chain(&net).await;

    handles[&id(1)]
        .send_to(NodeId::BROADCAST, json!({"blink": [5, 6, 7]}))
        .await
        .unwrap();

    for peer in [middle, leaf] {
        let handle = handles.get_mut(&peer).unwrap();
        let event = timeout(LONG, handle.next_app_event())
            .await
            .unwrap_or_else(|_| panic!("{peer}: blink never arrived"))
            .expect("node gone");
        assert_eq!(event.src, id(1));
        assert_eq!(event.payload, json!({"blink": [5, 6, 7]}));
        assert!(timeout(GRACE, handle.next_app_event()).await.is_err());
    }
}

/// Scenario: send_to_all from the root delivers once per node via routing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_to_all_delivers_once_per_node() {
    let net = SimNet::new();
    let (mut handles, middle, leaf) = build_chain(&net).await;

    handles[&id(1)]
        .send_to_all(json!({"blink": [1, 2, 3]}))
        .await
        .unwrap();

    for peer in [middle, leaf] {
        let handle = handles.get_mut(&peer).unwrap();
        let event = timeout(LONG, handle.next_app_event())
            .await
            .unwrap_or_else(|_| panic!("{peer}: blink never arrived"))
            .expect("node gone");
        assert_eq!(event.payload, json!({"blink": [1, 2, 3]}));
        assert!(timeout(GRACE, handle.next_app_event()).await.is_err());
    }
}

/// Scenario: killing the middle of the chain shrinks the root's tree to
/// itself, resets the leaf, and the mesh then re-converges around the root.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn middle_node_death_heals_around_the_root() {
    let net = SimNet::new();
    let (mut handles, middle, leaf) = build_chain(&net).await;

    net.silence(middle);
    drop(handles.remove(&middle));

    let root = handles.get_mut(&id(1)).unwrap();
    wait_tree_size(root, 1).await;

    // the leaf lost its parent, dropped its whole view and was reset; it
    // may already be rejoining by the time we look
    let leaf_handle = handles.get_mut(&leaf).unwrap();
    timeout(LONG, leaf_handle.wait_status(|s| s.parent != Some(middle)))
        .await
        .expect("leaf never reset")
        .unwrap();

    // the root still advertises its tree, so the leaf waits to be claimed
    // and comes back as a direct child
    let leaf_status = timeout(LONG, leaf_handle.wait_status(|s| s.parent == Some(id(1))))
        .await
        .expect("leaf never rejoined")
        .unwrap();
    assert!(leaf_status.in_tree);

    let root = handles.get_mut(&id(1)).unwrap();
    wait_tree_size(root, 2).await;
}

/// Scenario: four nodes, root capped at two children; the overflow node is
/// claimed by one of the children instead.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn children_cap_pushes_growth_down_a_level() {
    let net = SimNet::new();
    let mut handles = BTreeMap::new();
    for byte in 1..=4 {
        let _ = handles.insert(id(byte), spawn_node(&net, byte, test_config()));
    }
    for handle in handles.values_mut() {
        wait_tree_size(handle, 4).await;
    }

    let statuses: BTreeMap<NodeId, _> = handles
        .iter()
        .map(|(id, handle)| (*id, handle.status()))
        .collect();
    assert!(statuses[&id(1)].is_root);

    let root_children: Vec<NodeId> = statuses
        .iter()
        .filter(|(_, s)| s.parent == Some(id(1)))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(root_children.len(), 2, "root takes exactly two children");

    let grandchildren: Vec<NodeId> = statuses
        .iter()
        .filter(|(_, s)| matches!(s.parent, Some(p) if root_children.contains(&p)))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(grandchildren.len(), 1, "the overflow node sits one level down");
}

/// Scenario: the root bridges plain tree frames from a user PC under the
/// reserved id, and routing treats the bridge as a direct peer.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_bridge_floods_in_and_routes_back() {
    let net = SimNet::new();
    let mut root_config = test_config();
    root_config.user_bridge = true;
    root_config.bridge_port = 14_321;
    let mut a = spawn_node(&net, 1, root_config);
    let mut b = spawn_node(&net, 2, test_config());

    wait_tree_size(&mut a, 2).await;
    wait_tree_size(&mut b, 2).await;

    let stream = TcpStream::connect(("127.0.0.1", 14_321)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // a flooded blink from the PC reaches both nodes
    let frame = format!(
        "{}\n",
        json!({
            "src": NodeId::USER_BRIDGE.to_hex(),
            "dst": "ffffffffffff",
            "flag": 3,
            "msg": {"blink": [9, 9, 9]}
        })
    );
    write_half.write_all(frame.as_bytes()).await.unwrap();

    for handle in [&mut a, &mut b] {
        let event = timeout(LONG, handle.next_app_event())
            .await
            .expect("bridge frame never arrived")
            .expect("node gone");
        assert_eq!(event.src, NodeId::USER_BRIDGE);
        assert_eq!(event.payload, json!({"blink": [9, 9, 9]}));
    }

    // the child can address the PC by the reserved id; the root hands the
    // frame to its bridge connection
    b.send_to(NodeId::USER_BRIDGE, json!({"status": "ok"}))
        .await
        .unwrap();
    let line = timeout(LONG, lines.next_line())
        .await
        .expect("nothing reached the PC")
        .unwrap()
        .expect("bridge closed");
    assert!(line.contains("\"status\":\"ok\""));
    assert!(line.contains(&id(2).to_hex()));
}
