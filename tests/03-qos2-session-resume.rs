// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! QoS 2 delivery across reconnects: the in-flight store survives the
//! connection, PUBLISH is replayed with DUP set and PUBREL is replayed
//! unchanged until PUBCOMP releases the packet id.

use codec::{v3, EncodePacket, GenericPacket, ProtocolVersion, QoS};
use corvid::engine::{Endpoint, EndpointConfig, StoreKind};
use corvid::stream::Stream;

mod common;

async fn connect_endpoint(addr: &str, clean_session: bool) -> Endpoint {
    let stream = Stream::connect(addr).await.unwrap();
    let mut endpoint = Endpoint::new(stream, EndpointConfig::client(ProtocolVersion::V311));
    let mut connect = v3::ConnectPacket::new("cid1").unwrap();
    connect.set_clean_session(clean_session);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Connect(connect)))
        .await
        .unwrap();
    endpoint
}

async fn expect_connack(endpoint: &mut Endpoint, session_present: bool) {
    let packet = endpoint.recv().await.unwrap().expect("closed at CONNACK");
    let GenericPacket::V3(v3::Packet::ConnectAck(ack)) = packet else {
        panic!("expected CONNACK, got {packet:?}");
    };
    assert_eq!(ack.session_present(), session_present);
    assert_eq!(ack.return_code(), v3::ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn test_qos2_resume_across_three_connections() {
    let addr = common::start_broker().await;

    // First connection: send the QoS 2 PUBLISH and drop the socket before
    // processing PUBREC.
    let mut endpoint = connect_endpoint(&addr, false).await;
    expect_connack(&mut endpoint, false).await;

    let packet_id = endpoint.acquire_unique_packet_id().unwrap();
    let mut publish = v3::PublishPacket::new("t", QoS::ExactOnce, b"p").unwrap();
    publish.set_packet_id(packet_id);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Publish(publish)))
        .await
        .unwrap();
    endpoint.close().await.unwrap();
    let state = endpoint.take_persist_state();
    assert_eq!(state.inflight.len(), 1);
    assert_eq!(state.inflight[0].kind, StoreKind::PublishQos2);
    // Let the broker observe the close before the session is reclaimed.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // Second connection: session present, the engine replays the PUBLISH
    // with DUP=1, the broker answers PUBREC and the engine sends PUBREL.
    let stream = Stream::connect(&addr).await.unwrap();
    let mut endpoint = Endpoint::new(stream, EndpointConfig::client(ProtocolVersion::V311));
    endpoint.restore_persist_state(state);
    let mut connect = v3::ConnectPacket::new("cid1").unwrap();
    connect.set_clean_session(false);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Connect(connect)))
        .await
        .unwrap();
    expect_connack(&mut endpoint, true).await;

    let packet = endpoint.recv().await.unwrap().expect("closed at PUBREC");
    let GenericPacket::V3(v3::Packet::PublishReceived(pubrec)) = packet else {
        panic!("expected PUBREC, got {packet:?}");
    };
    assert_eq!(pubrec.packet_id(), packet_id);
    endpoint.close().await.unwrap();
    let state = endpoint.take_persist_state();
    assert_eq!(state.inflight.len(), 1);
    assert_eq!(state.inflight[0].kind, StoreKind::Pubrel);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // Third connection: PUBREL is replayed unchanged, PUBCOMP releases
    // the id and empties the store.
    let stream = Stream::connect(&addr).await.unwrap();
    let mut endpoint = Endpoint::new(stream, EndpointConfig::client(ProtocolVersion::V311));
    endpoint.restore_persist_state(state);
    let mut connect = v3::ConnectPacket::new("cid1").unwrap();
    connect.set_clean_session(false);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Connect(connect)))
        .await
        .unwrap();
    expect_connack(&mut endpoint, true).await;

    let packet = endpoint.recv().await.unwrap().expect("closed at PUBCOMP");
    let GenericPacket::V3(v3::Packet::PublishComplete(pubcomp)) = packet else {
        panic!("expected PUBCOMP, got {packet:?}");
    };
    assert_eq!(pubcomp.packet_id(), packet_id);

    let state = endpoint.take_persist_state();
    assert!(state.inflight.is_empty());
    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn test_qos2_duplicate_not_delivered_twice() {
    let addr = common::start_broker().await;

    // A subscriber observes the topic the whole time.
    use corvid::client::{AsyncClient, ClientEvent, ConnectOptions};
    let mut options = ConnectOptions::new(&addr);
    options.set_client_id("dup-watch");
    let (mut subscriber, _ack) = AsyncClient::connect(options).await.unwrap();
    subscriber.subscribe("dup/t", QoS::ExactOnce).await.unwrap();

    // Publisher sends QoS 2, loses the connection after PUBREC and
    // replays the PUBLISH with DUP on the next connection.
    let stream = Stream::connect(&addr).await.unwrap();
    let mut endpoint = Endpoint::new(stream, EndpointConfig::client(ProtocolVersion::V311));
    let mut connect = v3::ConnectPacket::new("dup-pub").unwrap();
    connect.set_clean_session(false);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Connect(connect)))
        .await
        .unwrap();
    expect_connack(&mut endpoint, false).await;

    let packet_id = endpoint.acquire_unique_packet_id().unwrap();
    let mut publish = v3::PublishPacket::new("dup/t", QoS::ExactOnce, b"only-once").unwrap();
    publish.set_packet_id(packet_id);
    let mut raw = Vec::new();
    publish.encode(&mut raw).unwrap();
    endpoint
        .send(GenericPacket::V3(v3::Packet::Publish(publish)))
        .await
        .unwrap();
    // Wait for the broker's PUBREC so the message definitely arrived.
    let packet = endpoint.recv().await.unwrap().expect("closed at PUBREC");
    assert!(matches!(
        packet,
        GenericPacket::V3(v3::Packet::PublishReceived(_))
    ));
    endpoint.close().await.unwrap();
    let _state = endpoint.take_persist_state();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let stream = Stream::connect(&addr).await.unwrap();
    let mut endpoint = Endpoint::new(stream, EndpointConfig::client(ProtocolVersion::V311));
    // Pretend PUBREC was lost: restore the original publish entry so the
    // engine replays it with DUP on the same packet id.
    let mut state = corvid::engine::SessionPersistState::default();
    state.inflight.push(corvid::engine::StoredEntry {
        packet_id,
        kind: StoreKind::PublishQos2,
        packet: GenericPacket::V3(v3::Packet::parse(&raw).unwrap()),
        expire_at: None,
    });
    endpoint.restore_persist_state(state);
    let mut connect = v3::ConnectPacket::new("dup-pub").unwrap();
    connect.set_clean_session(false);
    endpoint
        .send(GenericPacket::V3(v3::Packet::Connect(connect)))
        .await
        .unwrap();
    expect_connack(&mut endpoint, true).await;

    // Drive the replayed exchange to completion.
    loop {
        match endpoint.recv().await.unwrap() {
            Some(GenericPacket::V3(v3::Packet::PublishComplete(_))) => break,
            Some(_other) => (),
            None => panic!("closed before PUBCOMP"),
        }
    }
    endpoint.close().await.unwrap();

    // Exactly one delivery reaches the subscriber.
    let event = tokio::time::timeout(std::time::Duration::from_secs(5), subscriber.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ClientEvent::Publish(publish) = event else {
        panic!("expected publish");
    };
    assert_eq!(publish.payload, b"only-once");

    let second = tokio::time::timeout(std::time::Duration::from_millis(700), subscriber.recv())
        .await;
    assert!(second.is_err(), "duplicate QoS 2 publish was delivered twice");
}
