//! Rehearsal harness: replays a captured payment fixture through the
//! reconciler against a scratch in-memory ledger.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lumentip_config::Settings;
use lumentip_core::Address;
use lumentip_events::EventBus;
use lumentip_ledger::{
    Disposition, PaymentRecord, ReconcilePolicy, ReconcileSummary, Reconciler, RefundEngine,
    RefundOutcome, Store,
};
use lumentip_test_utils::{MockChain, ScriptedFeed};
use tracing::info;

/// Runs every payment in `file` through the reconciler, printing one
/// line per payment and a closing summary.
///
/// The configured database is never touched: the ledger is in-memory
/// and the chain client fabricates transaction ids, so closed-deposit
/// policies and refund behavior can be rehearsed safely.
pub async fn run(
    settings: &Settings,
    file: &Path,
    operator: Option<Address>,
    deposits_closed: bool,
) -> Result<()> {
    let payments = load_fixture(file)?;

    let chain = match operator.or_else(|| settings.chain.address.clone()) {
        Some(address) => Arc::new(MockChain::new().with_address(address)),
        None => Arc::new(MockChain::new()),
    };
    let store = Arc::new(Store::open_in_memory()?);
    let events = Arc::new(EventBus::new(64));
    let refunds = RefundEngine::new(
        store.clone(),
        chain.clone(),
        events.clone(),
        settings.service.refund_fee,
    );
    let policy = ReconcilePolicy {
        deposits_closed: deposits_closed || settings.service.deposits_closed,
        memo_adapters: settings.service.memo_adapters.clone(),
        start_cursor: settings.chain.start_cursor.clone(),
        ..ReconcilePolicy::default()
    };
    let feed = Arc::new(ScriptedFeed::new(payments.clone()));
    let reconciler = Reconciler::new(store, chain.clone(), feed, refunds, events, policy);

    let mut summary = ReconcileSummary::default();
    for payment in &payments {
        let disposition = reconciler.process_payment(payment).await?;
        summary.record(&disposition);
        println!("{}  {}", payment.hash, describe(&disposition));
    }
    for sent in chain.payments() {
        info!(
            destination = %sent.destination,
            amount = %sent.amount.to_fixed(),
            "replay submitted a payment"
        );
    }
    println!(
        "{} payments: {} credited, {} refunded, {} ignored, {} duplicate, {} failed",
        payments.len(),
        summary.credited,
        summary.refunded,
        summary.ignored,
        summary.duplicates,
        summary.failed,
    );
    Ok(())
}

fn load_fixture(path: &Path) -> Result<Vec<PaymentRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let payments: Vec<PaymentRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a payment fixture", path.display()))?;
    Ok(payments)
}

fn describe(disposition: &Disposition) -> String {
    match disposition {
        Disposition::Ignored(reason) => format!("ignored ({reason})"),
        Disposition::AlreadyProcessed => "already processed".to_string(),
        Disposition::Credited { account, amount } => {
            format!("credited {} {}", account, amount.to_fixed())
        }
        Disposition::Refunded { reason, outcome } => match outcome {
            RefundOutcome::Refunded { hash, amount } => {
                format!("refunded ({reason}) {} under {hash}", amount.to_fixed())
            }
            RefundOutcome::DustSwallowed => format!("refunded ({reason}) as dust"),
            RefundOutcome::DuplicateRefund => format!("refund already recorded ({reason})"),
            RefundOutcome::Failed { reason: failure } => format!("refund failed: {failure}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumentip_core::{AccountRef, Amount};
    use lumentip_ledger::{IgnoreReason, RefundReason};

    #[test]
    fn dispositions_read_naturally() {
        let credited = Disposition::Credited {
            account: AccountRef::new("reddit", "someuser"),
            amount: Amount::parse("5").unwrap(),
        };
        assert_eq!(describe(&credited), "credited reddit/someuser 5.0000000");

        let ignored = Disposition::Ignored(IgnoreReason::Outbound);
        assert_eq!(describe(&ignored), "ignored (outbound)");

        let dust = Disposition::Refunded {
            reason: RefundReason::MissingMemo,
            outcome: RefundOutcome::DustSwallowed,
        };
        assert_eq!(describe(&dust), "refunded (missing memo) as dust");
    }

    #[test]
    fn fixture_parses_payment_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payments.json");
        let fixture = vec![lumentip_test_utils::inbound_payment("dep-1", "100", "5")];
        std::fs::write(&path, serde_json::to_string(&fixture).unwrap()).unwrap();

        let parsed = load_fixture(&path).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].hash, "dep-1");
        assert!(load_fixture(&dir.path().join("missing.json")).is_err());
    }
}
