//! Runnable demo: one candidate running leader election against a
//! ZooKeeper ensemble, printing every leadership transition until
//! interrupted.
//!
//! ```text
//! cargo run --example candidate -- zk1:2181,zk2:2181 my-host:9001
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures::StreamExt;
use omni_election::config::{AclEntry, ClientConfig, ElectionConfig};
use omni_election::store::zk::ZkStore;
use omni_election::start_election;

fn print_banner(title: &str, color: fn(&str) -> colored::ColoredString) {
    let border = "╔═══════════════════════════════════════════════════════════════╗";
    let bottom = "╚═══════════════════════════════════════════════════════════════╝";
    println!("{}", color(border));
    println!("{}", color(&format!("║{title:^63}║")));
    println!("{}", color(bottom));
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let store_url = args.next().unwrap_or_else(|| "127.0.0.1:2181".to_string());
    let candidate_id = args.next().unwrap_or_else(|| format!("{}:9001", uuid::Uuid::new_v4()));

    print_banner(&format!("leader election: {candidate_id}"), |s| s.cyan());

    let client_config = ClientConfig { store_url, ..ClientConfig::default() };
    let election_config =
        ElectionConfig { candidate_id: candidate_id.clone(), election_path: "/omni/election".to_string() };

    let store = match ZkStore::connect(&client_config).await {
        Ok(store) => store as Arc<dyn omni_election::store::CoordinationStore>,
        Err(err) => {
            print_banner(&format!("connect failed: {err}"), |s| s.red());
            std::process::exit(1);
        }
    };

    let (cancel, mut events) =
        start_election(store, election_config, Vec::<AclEntry>::new(), Duration::from_secs(10)).await;

    let (ctrlc_tx, mut ctrlc_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrlc_tx.send(());
    });

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Ok(state)) => println!("{}", format!("[{candidate_id}] {state}").green()),
                    Some(Err(err)) => {
                        println!("{}", format!("[{candidate_id}] election failed: {err}").red());
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut ctrlc_rx => {
                cancel.cancel().await;
                while let Some(Ok(state)) = events.next().await {
                    println!("{}", format!("[{candidate_id}] {state}").green());
                }
                break;
            }
        }
    }
}
