//! Integration tests for the STCP client and server engines.
//!
//! The routing layer is replaced by a relay that copies frames between two
//! in-memory pipes, swapping the destination node for the source node the
//! way SIP does. Faults are scripted so every run takes the same path.

use std::time::Duration;

use tokio::io::{duplex, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use stcp_sip::client::StcpClient;
use stcp_sip::codec::{self, DecodeOutcome, FrameOutcome};
use stcp_sip::config::TransportConfig;
use stcp_sip::error::StcpError;
use stcp_sip::segment::{Segment, SegmentType, MAX_SEG_LEN};
use stcp_sip::server::StcpServer;
use stcp_sip::simulator::{Fault, FaultRule, Simulator};
use stcp_sip::state::{ClientState, ServerState};
use stcp_sip::NodeId;

const CLIENT_NODE: NodeId = 1;
const SERVER_NODE: NodeId = 2;
const CLIENT_PORT: u32 = 87;
const SERVER_PORT: u32 = 88;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast() -> TransportConfig {
    TransportConfig {
        syn_timeout: Duration::from_millis(50),
        fin_timeout: Duration::from_millis(50),
        syn_max_retry: 5,
        fin_max_retry: 5,
        data_timeout: Duration::from_millis(30),
        sendbuf_poll_interval: Duration::from_millis(5),
        closewait_timeout: Duration::from_millis(500),
        ..TransportConfig::default()
    }
}

async fn relay(rd: ReadHalf<DuplexStream>, mut wr: WriteHalf<DuplexStream>, from: NodeId) {
    let mut rd = BufReader::new(rd);
    loop {
        match codec::read_frame(&mut rd).await {
            Ok(FrameOutcome::Frame(f)) => {
                if codec::write_frame(&mut wr, from, &f.bytes).await.is_err() {
                    break;
                }
            }
            Ok(FrameOutcome::Corrupted) => continue,
            _ => break,
        }
    }
    let _ = wr.shutdown().await;
}

/// Two transport-side pipe ends joined by a frame relay.
fn wire() -> (DuplexStream, DuplexStream) {
    let (client_end, client_sip) = duplex(1 << 16);
    let (server_end, server_sip) = duplex(1 << 16);
    let (crd, cwr) = tokio::io::split(client_sip);
    let (srd, swr) = tokio::io::split(server_sip);
    tokio::spawn(relay(crd, swr, CLIENT_NODE));
    tokio::spawn(relay(srd, cwr, SERVER_NODE));
    (client_end, server_end)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Run a full client → server transfer and return what the server read.
async fn transfer(len: usize, client_sim: Simulator, server_sim: Simulator) -> Vec<u8> {
    let (c, s) = wire();
    let server = StcpServer::start(s, fast(), server_sim);
    let client = StcpClient::start(c, fast(), client_sim);

    let receiving = tokio::spawn(async move {
        let sock = server.sock(SERVER_PORT).unwrap();
        server.accept(sock).await.unwrap();
        assert_eq!(server.peer(sock).unwrap(), (CLIENT_NODE, CLIENT_PORT));
        let data = server.recv(sock, len).await.unwrap();
        server.close(sock).await.unwrap();
        (server, data)
    });

    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    assert_eq!(client.state(sock).unwrap(), ClientState::Connected);
    client.send(sock, &payload(len)).unwrap();
    client.disconnect(sock).await.unwrap();
    assert_eq!(client.state(sock).unwrap(), ClientState::Closed);
    client.close(sock).unwrap();

    let (_server, data) = tokio::time::timeout(Duration::from_secs(10), receiving)
        .await
        .expect("server side timed out")
        .expect("server task panicked");
    data
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_transfer_delivers_every_byte() {
    let data = transfer(10_000, Simulator::passthrough(), Simulator::passthrough()).await;
    assert_eq!(data, payload(10_000));
}

#[tokio::test]
async fn dropped_data_segment_is_retransmitted() {
    let server_sim =
        Simulator::passthrough().with_rule(FaultRule::once_data(MAX_SEG_LEN as u32, Fault::Drop));
    let data = transfer(3000, Simulator::passthrough(), server_sim).await;
    assert_eq!(data, payload(3000));
}

#[tokio::test]
async fn corrupted_data_segment_is_retransmitted() {
    let server_sim = Simulator::passthrough().with_rule(FaultRule::once_data(0, Fault::Corrupt));
    let data = transfer(3000, Simulator::passthrough(), server_sim).await;
    assert_eq!(data, payload(3000));
}

#[tokio::test]
async fn lost_handshake_and_ack_segments_are_recovered() {
    let server_sim = Simulator::passthrough()
        .with_rule(FaultRule::drop_type(SegmentType::Syn, 2))
        .with_rule(FaultRule::drop_type(SegmentType::Fin, 1));
    let client_sim =
        Simulator::passthrough().with_rule(FaultRule::drop_type(SegmentType::DataAck, 3));
    let data = transfer(5000, client_sim, server_sim).await;
    assert_eq!(data, payload(5000));
}

/// The server is already in CLOSE_WAIT when the first FINACKs are lost, so
/// the retransmitted FIN has to be answered from there.
#[tokio::test]
async fn lost_finack_is_answered_again_from_close_wait() {
    let client_sim =
        Simulator::passthrough().with_rule(FaultRule::drop_type(SegmentType::FinAck, 2));
    let data = transfer(4000, client_sim, Simulator::passthrough()).await;
    assert_eq!(data, payload(4000));
}

/// Two connections on one endpoint pair, told apart only by port.
#[tokio::test]
async fn concurrent_connections_are_demultiplexed_by_port() {
    let (c, s) = wire();
    let server = StcpServer::start(s, fast(), Simulator::passthrough());
    let client = StcpClient::start(c, fast(), Simulator::passthrough());
    let small = payload(5000);
    let large: Vec<u8> = payload(7000).into_iter().rev().collect();

    let receiving = tokio::spawn(async move {
        let first = server.sock(88).unwrap();
        let second = server.sock(89).unwrap();
        let (a, b) = tokio::join!(server.accept(first), server.accept(second));
        a.unwrap();
        b.unwrap();
        assert_eq!(server.peer(first).unwrap(), (CLIENT_NODE, 87));
        assert_eq!(server.peer(second).unwrap(), (CLIENT_NODE, 90));
        let (a, b) = tokio::join!(server.recv(first, 5000), server.recv(second, 7000));
        (server, a.unwrap(), b.unwrap())
    });

    let first = client.sock(87).unwrap();
    let second = client.sock(90).unwrap();
    let (a, b) = tokio::join!(
        client.connect(first, SERVER_NODE, 88),
        client.connect(second, SERVER_NODE, 89)
    );
    a.unwrap();
    b.unwrap();
    client.send(first, &small).unwrap();
    client.send(second, &large).unwrap();
    let (a, b) = tokio::join!(client.disconnect(first), client.disconnect(second));
    a.unwrap();
    b.unwrap();

    let (_server, got_small, got_large) = tokio::time::timeout(Duration::from_secs(10), receiving)
        .await
        .expect("server side timed out")
        .expect("server task panicked");
    assert_eq!(got_small, small);
    assert_eq!(got_large, large);
}

#[tokio::test]
async fn closed_link_unblocks_recv_and_close() {
    let (c, s) = wire();
    let server = StcpServer::start(s, fast(), Simulator::passthrough());
    let client = StcpClient::start(c, fast(), Simulator::passthrough());

    let ssock = server.sock(SERVER_PORT).unwrap();
    let accepting = tokio::spawn(async move {
        server.accept(ssock).await.unwrap();
        server
    });
    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    client.send(sock, &payload(100)).unwrap();
    let server = accepting.await.unwrap();

    let receiving = tokio::spawn(async move {
        let res = server.recv(ssock, 500).await;
        (server, res)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(client);

    let (server, res) = tokio::time::timeout(Duration::from_secs(5), receiving)
        .await
        .expect("recv hung after the link closed")
        .unwrap();
    assert!(matches!(res, Err(StcpError::ChannelClosed)));
    tokio::time::timeout(Duration::from_secs(5), server.close(ssock))
        .await
        .expect("close hung after the link closed")
        .unwrap();
}

#[tokio::test]
async fn second_connect_is_refused() {
    let (c, s) = wire();
    let server = StcpServer::start(s, fast(), Simulator::passthrough());
    let client = StcpClient::start(c, fast(), Simulator::passthrough());

    let ssock = server.sock(SERVER_PORT).unwrap();
    let accepting = tokio::spawn(async move {
        server.accept(ssock).await.unwrap();
        server
    });

    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    assert!(matches!(
        client.connect(sock, SERVER_NODE, SERVER_PORT).await,
        Err(StcpError::InvalidState { op: "connect", .. })
    ));
    let server = accepting.await.unwrap();
    assert_eq!(server.state(ssock).unwrap(), ServerState::Connected);
}

#[tokio::test]
async fn recv_reports_early_close() {
    let (c, s) = wire();
    let server = StcpServer::start(s, fast(), Simulator::passthrough());
    let client = StcpClient::start(c, fast(), Simulator::passthrough());

    let receiving = tokio::spawn(async move {
        let sock = server.sock(SERVER_PORT).unwrap();
        server.accept(sock).await.unwrap();
        let first = server.recv(sock, 100).await.unwrap();
        let rest = server.recv(sock, 500).await;
        (first, rest)
    });

    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    client.send(sock, &payload(100)).unwrap();
    client.disconnect(sock).await.unwrap();

    let (first, rest) = receiving.await.unwrap();
    assert_eq!(first, payload(100));
    assert!(matches!(rest, Err(StcpError::ConnectionClosed)));
}

#[tokio::test]
async fn recv_larger_than_buffer_is_refused() {
    let (c, s) = wire();
    let cfg = TransportConfig {
        recv_buf_size: 1000,
        ..fast()
    };
    let server = StcpServer::start(s, cfg, Simulator::passthrough());
    let client = StcpClient::start(c, fast(), Simulator::passthrough());

    let ssock = server.sock(SERVER_PORT).unwrap();
    let accepting = tokio::spawn(async move {
        server.accept(ssock).await.unwrap();
        server
    });
    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    let server = accepting.await.unwrap();

    assert!(matches!(
        server.recv(ssock, 1001).await,
        Err(StcpError::BufferCapacity {
            requested: 1001,
            capacity: 1000
        })
    ));
}

/// A peer that answers SYN but never FIN: `disconnect` must give up after
/// exactly `fin_max_retry` FINs and leave the handle reusable.
#[tokio::test]
async fn unanswered_fin_exhausts_retry_budget() {
    let (c, peer) = duplex(1 << 16);
    let cfg = TransportConfig {
        fin_max_retry: 3,
        ..fast()
    };
    let client = StcpClient::start(c, cfg, Simulator::passthrough());

    let fake_server = tokio::spawn(async move {
        let (rd, mut wr) = tokio::io::split(peer);
        let mut rd = BufReader::new(rd);
        let mut fins = 0;
        loop {
            match codec::receive_and_decode(&mut rd, None).await {
                Ok(DecodeOutcome::Delivered { segment, .. }) => match segment.seg_type() {
                    SegmentType::Syn => {
                        let reply = Segment::control(SegmentType::SynAck, SERVER_PORT, CLIENT_PORT);
                        codec::encode_and_send(&mut wr, SERVER_NODE, &reply, None)
                            .await
                            .unwrap();
                    }
                    SegmentType::Fin => fins += 1,
                    _ => {}
                },
                Ok(DecodeOutcome::ChannelClosed) | Err(_) => break,
                Ok(_) => {}
            }
        }
        fins
    });

    let sock = client.sock(CLIENT_PORT).unwrap();
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    assert!(matches!(
        client.disconnect(sock).await,
        Err(StcpError::DisconnectFailed(3))
    ));
    assert_eq!(client.state(sock).unwrap(), ClientState::Closed);

    // the handle can be reused for a fresh connection
    client.connect(sock, SERVER_NODE, SERVER_PORT).await.unwrap();
    assert_eq!(client.state(sock).unwrap(), ClientState::Connected);

    drop(client);
    let fins = tokio::time::timeout(Duration::from_secs(5), fake_server)
        .await
        .expect("fake server did not see the link close")
        .unwrap();
    assert_eq!(fins, 3);
}
