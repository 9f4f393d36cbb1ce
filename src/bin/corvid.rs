// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use clap::Parser;
use std::path::PathBuf;

use corvid::config::Config;
use corvid::error::Error;
use corvid::server::ServerContext;

#[derive(Debug, Parser)]
#[command(name = "corvid", version, about = "MQTT v3.1.1 / v5.0 broker")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Parse the configuration, print the outcome and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if args.check_config {
        println!("configuration ok: {config:?}");
        return Ok(());
    }

    let server = ServerContext::new(config);
    server.run().await
}
