// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Shared harness: boots an in-process broker on a loopback port and
//! hands the address to the scenario tests.

use corvid::config::Config;
use corvid::server::ServerContext;

/// Start a broker with default settings on an ephemeral port; returns its
/// address.
#[allow(dead_code)]
pub async fn start_broker() -> String {
    start_broker_with(
        r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:0"
"#,
    )
    .await
}

/// Start a broker from a TOML snippet; the snippet must bind port 0.
#[allow(dead_code)]
pub async fn start_broker_with(content: &str) -> String {
    let _ret = env_logger::builder().is_test(true).try_init();
    let config = Config::parse(content).expect("invalid test config");
    let mut server = ServerContext::new(config);
    server.start().await.expect("failed to start test broker");
    server.listener_addrs()[0].to_string()
}
