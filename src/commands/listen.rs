//! `bidwatch listen`: stay connected and print what arrives.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use crate::client::BidwatchClient;
use crate::config::Config;
use crate::dispatcher::{Alert, AlertSink, LiveUpdate};
use crate::navigation::{Navigator, RouteTracker};

/// Prints alerts to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleAlertSink;

impl AlertSink for ConsoleAlertSink {
    fn show(&self, alert: &Alert) {
        println!("{}", format_alert(alert));
    }
}

/// One-line rendering of an alert.
pub fn format_alert(alert: &Alert) -> String {
    let mut line = format!("[{}] {}", alert.kind, alert.title);
    if !alert.message.is_empty() {
        line.push_str(": ");
        line.push_str(&alert.message);
    }
    if !alert.auction_id.is_empty() {
        line.push_str(&format!(" (/auctions/{})", alert.auction_id));
    }
    line
}

/// One-line rendering of a live update.
pub fn format_live(update: &LiveUpdate) -> String {
    match update {
        LiveUpdate::NewBid(bid) => format!(
            "~ auction {}: new bid {} by {}",
            bid.auction_id, bid.bid.amount, bid.bid.user.name
        ),
        LiveUpdate::AuctionEnded(ended) => match (&ended.winner_name, &ended.final_amount) {
            (Some(winner), Some(amount)) => {
                format!("~ auction {} ended: {} won at {}", ended.auction_id, winner, amount)
            }
            _ => format!("~ auction {} ended", ended.auction_id),
        },
    }
}

/// Run until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    if !config.has_session() {
        anyhow::bail!("No session stored. Run `bidwatch save-session <cookie>` first.");
    }

    let router = Arc::new(RouteTracker::default());
    let client = BidwatchClient::from_config(
        config,
        Arc::new(ConsoleAlertSink),
        Arc::clone(&router) as Arc<dyn Navigator>,
    )?;
    client.start();

    let mut live = client.dispatcher().subscribe_live();
    let mut state = client.manager().watch_state();
    println!("Listening. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("# push channel {}", current);
            }
            update = live.recv() => match update {
                Ok(update) => println!("{}", format_live(&update)),
                Err(RecvError::Lagged(skipped)) => log::warn!("Skipped {} live update(s)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("Shutting down...");
    client.shutdown();
    Ok(())
}
