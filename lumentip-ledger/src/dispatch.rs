use std::sync::Arc;

use lumentip_core::{AccountRef, Address, Amount, Command, CommandMeta, CommandQueue};
use tracing::{debug, warn};

use crate::accounts::{Accounts, RegisterOutcome};
use crate::chain::ChainClient;
use crate::transfer::{TipOutcome, TransferEngine, WithdrawOutcome};
use crate::{LedgerError, LedgerResult};

/// What a chat adapter should tell the user who issued a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandReply {
    Register(RegisterOutcome),
    InvalidWalletAddress { raw: String },
    Balance { amount: Amount, wallet: Option<Address> },
    DepositInstructions { address: String, memo: String },
    Tip(TipOutcome),
    Withdraw(WithdrawOutcome),
    InvalidAmount { raw: String },
    DeveloperWalletUnset,
    Unrecognized,
}

/// Takes commands off the queue and applies them to the ledger.
pub struct CommandRouter {
    accounts: Accounts,
    transfer: TransferEngine,
    chain: Arc<dyn ChainClient>,
    queue: Arc<dyn CommandQueue>,
    developer_wallet: Option<Address>,
}

impl CommandRouter {
    pub fn new(
        accounts: Accounts,
        transfer: TransferEngine,
        chain: Arc<dyn ChainClient>,
        queue: Arc<dyn CommandQueue>,
        developer_wallet: Option<Address>,
    ) -> Self {
        Self {
            accounts,
            transfer,
            chain,
            queue,
            developer_wallet,
        }
    }

    pub async fn handle(&self, command: &Command) -> LedgerResult<CommandReply> {
        debug!(kind = command.kind(), hash = %command.meta().hash, "command received");
        match command {
            Command::Register {
                meta,
                wallet_public_key,
            } => match Address::parse(wallet_public_key) {
                Ok(address) => self
                    .accounts
                    .register_wallet(&account_of(meta), &address)
                    .map(CommandReply::Register),
                Err(_) => Ok(CommandReply::InvalidWalletAddress {
                    raw: wallet_public_key.clone(),
                }),
            },
            Command::Tip {
                meta,
                target_id,
                amount,
            } => {
                let parsed = match Amount::parse(amount) {
                    Ok(parsed) if !parsed.is_zero() => parsed,
                    _ => {
                        return Ok(CommandReply::InvalidAmount {
                            raw: amount.clone(),
                        })
                    }
                };
                let target = AccountRef::new(meta.adapter.as_str(), target_id.as_str());
                self.transfer
                    .tip(&account_of(meta), &target, parsed, &meta.hash)
                    .map(CommandReply::Tip)
            }
            Command::Withdraw {
                meta,
                amount,
                address,
            } => self
                .transfer
                .withdraw(&account_of(meta), amount, address.as_deref(), &meta.hash)
                .await
                .map(CommandReply::Withdraw),
            Command::Balance { meta, .. } => {
                let account = self.accounts.get_or_create(&account_of(meta))?;
                Ok(CommandReply::Balance {
                    amount: account.balance,
                    wallet: account.wallet_address,
                })
            }
            Command::Info { meta } => Ok(CommandReply::DepositInstructions {
                address: self.chain.address().to_string(),
                memo: account_of(meta).to_string(),
            }),
            Command::TipDevelopers {
                meta,
                amount,
                address,
            } => {
                let destination = address.clone().or_else(|| {
                    self.developer_wallet
                        .as_ref()
                        .map(|wallet| wallet.as_str().to_string())
                });
                let Some(destination) = destination else {
                    return Ok(CommandReply::DeveloperWalletUnset);
                };
                self.transfer
                    .withdraw(&account_of(meta), amount, Some(&destination), &meta.hash)
                    .await
                    .map(CommandReply::Withdraw)
            }
            Command::Unknown { meta } => {
                warn!(adapter = %meta.adapter, hash = %meta.hash, "unrecognized command");
                Ok(CommandReply::Unrecognized)
            }
        }
    }

    /// Pops and applies queued commands until the queue runs dry,
    /// returning each command with its reply in arrival order.
    pub async fn drain(&self) -> LedgerResult<Vec<(Command, CommandReply)>> {
        let mut handled = Vec::new();
        loop {
            let popped = self
                .queue
                .pop()
                .map_err(|err| LedgerError::Serialization(err.to_string()))?;
            let Some(command) = popped else {
                break;
            };
            let reply = self.handle(&command).await?;
            handled.push((command, reply));
        }
        Ok(handled)
    }
}

fn account_of(meta: &CommandMeta) -> AccountRef {
    AccountRef::new(meta.adapter.as_str(), meta.source_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, Store};
    use crate::testkit::{MockChain, GOOD_SOURCE, SERVICE_WALLET};
    use lumentip_core::MemoryQueue;
    use lumentip_events::EventBus;

    struct Fixture {
        store: Arc<Store>,
        chain: Arc<MockChain>,
        queue: Arc<MemoryQueue>,
        router: CommandRouter,
    }

    fn fixture(developer_wallet: Option<&str>) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let chain = Arc::new(MockChain::new());
        let queue = Arc::new(MemoryQueue::new());
        let events = Arc::new(EventBus::new(16));
        let transfer = TransferEngine::new(store.clone(), chain.clone(), events);
        let router = CommandRouter::new(
            Accounts::new(store.clone()),
            transfer,
            chain.clone(),
            queue.clone(),
            developer_wallet.map(|raw| Address::parse(raw).unwrap()),
        );
        Fixture {
            store,
            chain,
            queue,
            router,
        }
    }

    fn fund(store: &Store, adapter: &str, unique_id: &str, amount: &str) {
        let conn = store.conn();
        let row = store::get_or_create_account(&conn, adapter, unique_id).unwrap();
        store::update_balance(&conn, row.id, Amount::parse(amount).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn register_then_balance_reports_the_wallet() {
        let fx = fixture(None);

        let reply = fx
            .router
            .handle(&Command::register("reddit", "someuser", GOOD_SOURCE))
            .await
            .unwrap();
        let CommandReply::Register(RegisterOutcome::Registered { account }) = reply else {
            panic!("expected a registration, got {reply:?}");
        };
        assert_eq!(account.wallet_address.as_ref().unwrap().as_str(), GOOD_SOURCE);

        let reply = fx
            .router
            .handle(&Command::balance("reddit", "someuser", None))
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::Balance {
                amount: Amount::zero(),
                wallet: Some(Address::parse(GOOD_SOURCE).unwrap()),
            }
        );
    }

    #[tokio::test]
    async fn register_rejects_a_bad_wallet() {
        let fx = fixture(None);
        let reply = fx
            .router
            .handle(&Command::register("reddit", "someuser", "badaddress"))
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::InvalidWalletAddress {
                raw: "badaddress".into()
            }
        );
    }

    #[tokio::test]
    async fn register_rejects_a_wallet_held_by_another_account() {
        let fx = fixture(None);
        fx.router
            .handle(&Command::register("reddit", "someuser", GOOD_SOURCE))
            .await
            .unwrap();

        let reply = fx
            .router
            .handle(&Command::register("reddit", "otheruser", GOOD_SOURCE))
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::Register(RegisterOutcome::TakenByAnotherAccount)
        );
    }

    #[tokio::test]
    async fn info_spells_out_the_deposit_memo() {
        let fx = fixture(None);
        let reply = fx
            .router
            .handle(&Command::info("reddit", "someuser"))
            .await
            .unwrap();
        assert_eq!(
            reply,
            CommandReply::DepositInstructions {
                address: SERVICE_WALLET.to_string(),
                memo: "reddit/someuser".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn tip_command_validates_the_amount_first() {
        let fx = fixture(None);
        for raw in ["abc", "0", "-2"] {
            let reply = fx
                .router
                .handle(&Command::tip("reddit", "someuser", "otheruser", raw))
                .await
                .unwrap();
            assert_eq!(reply, CommandReply::InvalidAmount { raw: raw.into() });
        }
    }

    #[tokio::test]
    async fn withdraw_without_address_comes_back_unpaid() {
        let fx = fixture(None);
        let reply = fx
            .router
            .handle(&Command::withdraw("reddit", "someuser", "666", None))
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::Withdraw(WithdrawOutcome::NoAddressProvided));
    }

    #[tokio::test]
    async fn developer_tip_pays_the_configured_wallet() {
        let fx = fixture(Some(GOOD_SOURCE));
        fund(&fx.store, "reddit", "someuser", "10");

        let reply = fx
            .router
            .handle(&Command::tip_developers("reddit", "someuser", "0.5"))
            .await
            .unwrap();
        assert!(matches!(
            reply,
            CommandReply::Withdraw(WithdrawOutcome::Withdrawn { .. })
        ));
        let sent = fx.chain.payments();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination.as_str(), GOOD_SOURCE);
        assert_eq!(sent[0].amount.to_fixed(), "0.5000000");
    }

    #[tokio::test]
    async fn developer_tip_needs_a_wallet_somewhere() {
        let fx = fixture(None);
        fund(&fx.store, "reddit", "someuser", "10");
        let reply = fx
            .router
            .handle(&Command::tip_developers("reddit", "someuser", "0.5"))
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::DeveloperWalletUnset);
    }

    #[tokio::test]
    async fn unknown_commands_get_a_shrug() {
        let fx = fixture(None);
        let payload = r#"{"type":"frobnicate","adapter":"reddit","sourceId":"u","uniqueId":"u","hash":"h"}"#;
        let command = Command::from_json(payload).unwrap();
        let reply = fx.router.handle(&command).await.unwrap();
        assert_eq!(reply, CommandReply::Unrecognized);
    }

    #[tokio::test]
    async fn drain_applies_queued_commands_once_each() {
        let fx = fixture(None);
        fund(&fx.store, "reddit", "alice", "10");

        let tip = Command::tip("reddit", "alice", "bob", "1");
        fx.queue.push(&tip).unwrap();
        // The queue redelivers; the hash must not reapply.
        fx.queue.push(&tip).unwrap();
        fx.queue
            .push(&Command::balance("reddit", "bob", None))
            .unwrap();

        let handled = fx.router.drain().await.unwrap();
        assert_eq!(handled.len(), 3);
        assert!(matches!(
            handled[0].1,
            CommandReply::Tip(TipOutcome::Transferred { .. })
        ));
        assert_eq!(handled[1].1, CommandReply::Tip(TipOutcome::DuplicateTip));
        assert_eq!(
            handled[2].1,
            CommandReply::Balance {
                amount: Amount::parse("1").unwrap(),
                wallet: None,
            }
        );
        assert!(fx.queue.is_empty());
    }
}
