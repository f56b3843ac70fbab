// Dispute protocol scenarios on the in-memory transport

use anyhow::{ensure, Context};
use arbiter_core::{Dispute, PayoutSuggestion, Reason, Side};
use arbiter_dispute::{DisputeConfig, DisputeError};
use arbiter_testkit::{eventually, TestNetwork, TestNode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbiter-sim")]
#[command(
    about = "Run dispute protocol scenarios between an agent and two traders",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    scenario: Scenario,

    /// Dispute service config (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the final records as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Scenario {
    /// Open, mirror, chat, resolve and publish the payout
    HappyPath,
    /// Counterparty offline while the dispute is opened
    OfflinePeer,
    /// Both traders open the same trade at once
    DuplicateOpen,
    /// Every scenario in turn
    All,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let config = match &cli.config {
        Some(path) => DisputeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DisputeConfig::default(),
    };

    let scenarios = match cli.scenario {
        Scenario::All => vec![
            Scenario::HappyPath,
            Scenario::OfflinePeer,
            Scenario::DuplicateOpen,
        ],
        one => vec![one],
    };
    for scenario in scenarios {
        let net = TestNetwork::with_config(config.clone()).await?;
        let name = match scenario {
            Scenario::HappyPath => {
                happy_path(&net).await?;
                "happy-path"
            }
            Scenario::OfflinePeer => {
                offline_peer(&net).await?;
                "offline-peer"
            }
            Scenario::DuplicateOpen => {
                duplicate_open(&net).await?;
                "duplicate-open"
            }
            Scenario::All => continue,
        };
        println!("== {name}: ok");
        report(&net, cli.json).await?;
        net.shutdown().await;
    }
    Ok(())
}

async fn record_count(node: &TestNode) -> usize {
    node.disputes().await.map(|d| d.len()).unwrap_or(0)
}

async fn is_closed(node: &TestNode, net: &TestNetwork) -> bool {
    matches!(node.own_dispute(&net.trade_id).await, Ok(Some(d)) if d.is_closed())
}

async fn happy_path(net: &TestNetwork) -> anyhow::Result<()> {
    let opened = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await?;
    ensure!(
        eventually(move || async move { record_count(&net.seller).await == 1 }).await,
        "seller never received the mirror"
    );

    net.buyer
        .handle
        .append_chat_message(&opened.id, "I paid on time, the seller never confirmed.")
        .await?;
    ensure!(
        eventually(move || async move {
            matches!(
                net.agent.dispute_of(&net.trade_id, &net.buyer.credential).await,
                Ok(Some(d)) if d.chat_thread.len() >= 2
            )
        })
        .await,
        "agent never received the buyer's message"
    );

    let outcome = net.outcome(
        PayoutSuggestion::BuyerGetsTradeAmount,
        Reason::SellerNotResponding,
    )?;
    net.agent
        .handle
        .resolve_trade(
            &net.trade_id,
            outcome,
            "Payment confirmed by bank statement.",
        )
        .await?;
    ensure!(
        eventually(move || async move {
            is_closed(&net.buyer, net).await && is_closed(&net.seller, net).await
        })
        .await,
        "resolution did not close both records"
    );
    ensure!(
        eventually(move || async move {
            matches!(
                net.seller.own_dispute(&net.trade_id).await,
                Ok(Some(d)) if d.dispute_payout_tx_ref.is_some()
            )
        })
        .await,
        "payout was never announced to the seller"
    );
    Ok(())
}

async fn offline_peer(net: &TestNetwork) -> anyhow::Result<()> {
    net.set_online(&net.seller.address, false);
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await?;
    ensure!(
        eventually(move || async move { net.network.mailbox_len(&net.seller.address) == 1 }).await,
        "mirror was not stored for the offline seller"
    );
    ensure!(record_count(&net.seller).await == 0, "offline seller got the mirror");

    let flushed = net.set_online(&net.seller.address, true);
    tracing::info!(flushed, "seller back online");
    ensure!(
        eventually(move || async move { record_count(&net.seller).await == 1 }).await,
        "seller never applied the stored mirror"
    );
    Ok(())
}

async fn duplicate_open(net: &TestNetwork) -> anyhow::Result<()> {
    let (buyer, seller) = tokio::join!(
        net.buyer.handle.open_dispute(net.open_request(Side::Buyer)),
        net.seller.handle.open_dispute(net.open_request(Side::Seller)),
    );
    // The later open may already find the mirror of the earlier one.
    for result in [buyer.map(drop), seller.map(drop)] {
        match result {
            Ok(()) | Err(DisputeError::AlreadyOpen { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    ensure!(
        eventually(move || async move { record_count(&net.agent).await == 2 }).await,
        "agent does not hold one record per trader"
    );
    // Give late mirrors a chance to land before counting again.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    ensure!(record_count(&net.agent).await == 2, "agent holds extra records");
    ensure!(record_count(&net.buyer).await == 1, "buyer holds extra records");
    ensure!(record_count(&net.seller).await == 1, "seller holds extra records");
    Ok(())
}

async fn report(net: &TestNetwork, json: bool) -> anyhow::Result<()> {
    for (role, node) in [("agent", &net.agent), ("buyer", &net.buyer), ("seller", &net.seller)] {
        let disputes = node.disputes().await?;
        if json {
            println!("{role}: {}", serde_json::to_string_pretty(&disputes)?);
            continue;
        }
        for dispute in &disputes {
            println!("{role:>6}  {}", summary(dispute));
        }
    }
    Ok(())
}

fn summary(dispute: &Dispute) -> String {
    let resolution = dispute.resolution.as_ref().map_or_else(
        || "unresolved".to_string(),
        |r| {
            format!(
                "buyer {} / seller {}",
                r.outcome.buyer_payout, r.outcome.seller_payout
            )
        },
    );
    format!(
        "{} {:?} trader={} messages={} {} payout_tx={}",
        dispute.id,
        dispute.state,
        dispute.trader_side,
        dispute.chat_thread.len(),
        resolution,
        dispute.dispute_payout_tx_ref.as_deref().unwrap_or("-"),
    )
}
