// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Shared subscriptions: each publish reaches exactly one group member,
//! distributed round robin, and per-member ordering follows publish
//! order.

use std::time::Duration;

use codec::{ProtocolVersion, QoS};
use corvid::client::{AsyncClient, ClientEvent, ConnectOptions};
use tokio::time::timeout;

mod common;

async fn connect(addr: &str, client_id: &str) -> AsyncClient {
    let mut options = ConnectOptions::new(addr);
    options
        .set_client_id(client_id)
        .set_version(ProtocolVersion::V5);
    let (client, ack) = AsyncClient::connect(options).await.unwrap();
    assert!(ack.is_success());
    client
}

#[tokio::test]
async fn test_shared_fan_out_round_robin() {
    let addr = common::start_broker().await;

    let mut s1 = connect(&addr, "share-s1").await;
    let mut s2 = connect(&addr, "share-s2").await;
    let mut s3 = connect(&addr, "share-s3").await;
    s1.subscribe("$share/g1/topic1", QoS::AtMostOnce).await.unwrap();
    s2.subscribe("$share/g1/topic1", QoS::AtMostOnce).await.unwrap();
    s3.subscribe("$share/g1/topic1", QoS::AtMostOnce).await.unwrap();

    let mut publisher = connect(&addr, "share-pub").await;
    let payloads = [b"p1", b"p2", b"p3", b"p4", b"p5", b"p6"];
    for payload in payloads {
        publisher
            .publish("topic1", QoS::AtMostOnce, payload)
            .await
            .unwrap();
    }
    // Flush the publisher pipeline with an acknowledged packet.
    publisher
        .publish("share/sync", QoS::AtLeastOnce, b"sync")
        .await
        .unwrap();

    // Each subscriber receives exactly two publishes, in publish order.
    let mut seen = Vec::new();
    for subscriber in [&mut s1, &mut s2, &mut s3] {
        let mut mine = Vec::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_secs(5), subscriber.recv())
                .await
                .expect("missing shared delivery")
                .unwrap()
                .unwrap();
            let ClientEvent::Publish(publish) = event else {
                panic!("expected publish");
            };
            mine.push(publish.payload);
        }
        // No third message for this member.
        let extra = timeout(Duration::from_millis(500), subscriber.recv()).await;
        assert!(extra.is_err(), "a member received more than its share");

        assert!(mine[0] < mine[1], "per-member order broken: {mine:?}");
        seen.extend(mine);
    }

    seen.sort();
    let expected: Vec<Vec<u8>> = payloads.iter().map(|p| p.to_vec()).collect();
    assert_eq!(seen, expected, "every publish delivered exactly once");
}

#[tokio::test]
async fn test_shared_and_plain_subscription_both_served() {
    let addr = common::start_broker().await;

    let mut shared = connect(&addr, "mix-shared").await;
    shared
        .subscribe("$share/g2/mix/t", QoS::AtMostOnce)
        .await
        .unwrap();
    let mut plain = connect(&addr, "mix-plain").await;
    plain.subscribe("mix/t", QoS::AtMostOnce).await.unwrap();

    let mut publisher = connect(&addr, "mix-pub").await;
    publisher
        .publish("mix/t", QoS::AtMostOnce, b"both")
        .await
        .unwrap();

    for subscriber in [&mut shared, &mut plain] {
        let event = timeout(Duration::from_secs(5), subscriber.recv())
            .await
            .expect("missing delivery")
            .unwrap()
            .unwrap();
        let ClientEvent::Publish(publish) = event else {
            panic!("expected publish");
        };
        assert_eq!(publish.payload, b"both");
    }
}
