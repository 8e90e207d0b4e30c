use tokio::net::TcpListener;

use std::time::Duration;

use p2p_share::disk::{MemoryStore, PieceLayout, PieceStore};
use p2p_share::session::SessionStatus;
use p2p_share::{CommonConfig, Config, PeerInfo, Session, SessionOptions};

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn common(file_size: u64, piece_size: u64, num_pref_neighbors: usize) -> CommonConfig {
    CommonConfig {
        num_pref_neighbors,
        unchoking_interval: Duration::from_millis(200),
        opt_unchoking_interval: Duration::from_millis(300),
        file_name: "TheFile.dat".to_string(),
        file_size,
        piece_size,
    }
}

fn options(seed: u64) -> SessionOptions {
    SessionOptions {
        download_idle: Duration::from_millis(20),
        completion_poll_interval: Duration::from_millis(100),
        completion_linger: Duration::from_millis(300),
        connect_retries: 10,
        connect_backoff: Duration::from_millis(50),
        rng_seed: Some(seed),
        ..SessionOptions::default()
    }
}

fn file_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Binds a listener per peer first so the configured ports are known.
async fn listeners(count: usize) -> Vec<TcpListener> {
    let mut listeners = Vec::with_capacity(count);
    for _ in 0..count {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    listeners
}

fn peer_info(peer_id: u32, listener: &TcpListener, has_file: bool) -> PeerInfo {
    PeerInfo {
        peer_id,
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
        has_file,
    }
}

async fn store_contents(session: &Session) -> Vec<u8> {
    match &session.swarm().store {
        PieceStore::Memory(store) => store.contents().await,
        PieceStore::File(_) => panic!("expected a memory store"),
    }
}

#[tokio::test]
async fn test_two_peers_share_file() {
    let data = file_data(20);
    let common = common(20, 10, 1);
    let layout = PieceLayout::from_config(&common);

    let mut listeners = listeners(2).await;
    let config = Config {
        common,
        peers: vec![
            peer_info(1, &listeners[0], true),
            peer_info(2, &listeners[1], false),
        ],
    };
    assert_eq!(config.piece_count(), 2);

    let seeder = Session::new(
        &config,
        1,
        MemoryStore::with_data(layout, data.clone()).into(),
        options(1),
    )
    .unwrap();
    let leecher = Session::new(&config, 2, MemoryStore::new(layout).into(), options(2)).unwrap();

    let leecher_swarm = leecher.swarm().clone();
    let seeder_swarm = seeder.swarm().clone();

    let leecher_listener = listeners.pop().unwrap();
    let seeder_listener = listeners.pop().unwrap();

    let (seeder_status, leecher_status) = tokio::time::timeout(TEST_TIMEOUT, async {
        tokio::join!(
            seeder.run_with_listener(seeder_listener),
            leecher.run_with_listener(leecher_listener)
        )
    })
    .await
    .expect("both peers should shut down once the file is shared");

    let seeder_status: SessionStatus = seeder_status.unwrap();
    let leecher_status: SessionStatus = leecher_status.unwrap();

    assert!(seeder_status.complete);
    assert!(leecher_status.complete);
    assert_eq!(leecher_status.pieces, 2);
    assert_eq!(leecher_status.peers[0].peer_id, 1);
    assert_eq!(leecher_status.peers[0].bytes_received, 20);

    // the seeder learned about the leecher's pieces through 'have' messages
    assert_eq!(seeder_status.peers[0].pieces, 2);

    assert!(leecher_swarm.local_bitfield().await.is_complete());
    assert!(seeder_swarm.registry.peer_ids().await.is_empty());

    let contents = match &leecher_swarm.store {
        PieceStore::Memory(store) => store.contents().await,
        PieceStore::File(_) => unreachable!(),
    };
    assert_eq!(contents, data);
}

#[tokio::test]
async fn test_three_peers_with_short_last_piece() {
    let data = file_data(25);
    let common = common(25, 10, 2);
    let layout = PieceLayout::from_config(&common);

    let mut listeners = listeners(3).await;
    let config = Config {
        common,
        peers: vec![
            peer_info(1001, &listeners[0], true),
            peer_info(1002, &listeners[1], false),
            peer_info(1003, &listeners[2], false),
        ],
    };
    assert_eq!(config.piece_count(), 3);

    let seeder = Session::new(
        &config,
        1001,
        MemoryStore::with_data(layout, data.clone()).into(),
        options(11),
    )
    .unwrap();
    let first = Session::new(&config, 1002, MemoryStore::new(layout).into(), options(12)).unwrap();
    let second = Session::new(&config, 1003, MemoryStore::new(layout).into(), options(13)).unwrap();

    let first_swarm = first.swarm().clone();
    let second_swarm = second.swarm().clone();

    let third_listener = listeners.pop().unwrap();
    let second_listener = listeners.pop().unwrap();
    let first_listener = listeners.pop().unwrap();

    let (a, b, c) = tokio::time::timeout(TEST_TIMEOUT, async {
        tokio::join!(
            seeder.run_with_listener(first_listener),
            first.run_with_listener(second_listener),
            second.run_with_listener(third_listener)
        )
    })
    .await
    .expect("all peers should shut down once the file is shared");

    for status in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert!(status.complete, "peer {} incomplete", status.peer_id);
        assert_eq!(status.piece_count, 3);
        assert!(status.peers.iter().all(|peer| peer.pieces == 3));
    }

    for swarm in [first_swarm, second_swarm] {
        let contents = match &swarm.store {
            PieceStore::Memory(store) => store.contents().await,
            PieceStore::File(_) => unreachable!(),
        };
        assert_eq!(contents, data);
    }
}

#[tokio::test]
async fn test_cancel_stops_idle_session() {
    let common = common(20, 10, 1);
    let layout = PieceLayout::from_config(&common);

    let mut listeners = listeners(2).await;
    let config = Config {
        common,
        peers: vec![
            peer_info(1, &listeners[0], false),
            peer_info(2, &listeners[1], false),
        ],
    };

    // nobody has the file, so only an explicit shutdown ends the session
    let session = Session::new(&config, 1, MemoryStore::new(layout).into(), options(5)).unwrap();
    let token = session.token();
    let listener = listeners.remove(0);

    let running = tokio::spawn(session.run_with_listener(listener));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!running.is_finished());

    token.cancel();
    let status = tokio::time::timeout(TEST_TIMEOUT, running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(status.pieces, 0);
    assert!(!status.complete);
}

#[tokio::test]
async fn test_session_rejects_unknown_peer_and_bad_store() {
    let common = common(20, 10, 1);
    let layout = PieceLayout::from_config(&common);

    let listeners = listeners(1).await;
    let config = Config {
        common,
        peers: vec![peer_info(1, &listeners[0], true)],
    };

    assert!(Session::new(&config, 99, MemoryStore::new(layout).into(), options(0)).is_err());

    let wrong_layout = PieceLayout::new(5, 20);
    assert!(Session::new(&config, 1, MemoryStore::new(wrong_layout).into(), options(0)).is_err());

    let session = Session::new(&config, 1, MemoryStore::new(layout).into(), options(0)).unwrap();
    assert!(store_contents(&session).await.iter().all(|&b| b == 0));
}
