use lumentip_core::{AccountRef, Address, Amount};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositCreditedEvent {
    pub account: AccountRef,
    pub amount: Amount,
    pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositRefundedEvent {
    pub source: String,
    pub amount: Amount,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRecordedEvent {
    pub source: AccountRef,
    pub target: AccountRef,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalSubmittedEvent {
    pub account: AccountRef,
    pub address: Address,
    pub amount: Amount,
    pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalReversedEvent {
    pub account: AccountRef,
    pub amount: Amount,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LedgerEvent {
    DepositCredited(DepositCreditedEvent),
    DepositRefunded(DepositRefundedEvent),
    TransferRecorded(TransferRecordedEvent),
    WithdrawalSubmitted(WithdrawalSubmittedEvent),
    WithdrawalReversed(WithdrawalReversedEvent),
}

pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn publish(&self, event: LedgerEvent) {
        let _ = self.sender.send(event);
    }
}

pub struct EventStream {
    receiver: broadcast::Receiver<LedgerEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Result<LedgerEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}
