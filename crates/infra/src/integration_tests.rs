//! Integration tests for the full ledger pipeline.
//!
//! Tests: AccountService → TransferEngine → journal queries
//!
//! Verifies:
//! - Accounts opened through the service can transfer to each other
//! - Balances and journal listings agree after a mixed workload
//! - The persisted chain stays verifiable end to end

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cornucopia_core::DomainError;
    use cornucopia_ledger::verify_chain;

    use crate::accounts::AccountService;
    use crate::error::TransferError;
    use crate::store::InMemoryStore;
    use crate::transfer::{TransferCommand, TransferEngine};

    type Services = (
        Arc<InMemoryStore>,
        AccountService<Arc<InMemoryStore>, Arc<InMemoryStore>>,
        TransferEngine<Arc<InMemoryStore>, Arc<InMemoryStore>, Arc<InMemoryStore>>,
    );

    fn setup() -> Services {
        let store = Arc::new(InMemoryStore::new());
        let accounts = AccountService::new(store.clone(), store.clone());
        let engine = TransferEngine::new(store.clone(), store.clone(), store.clone());
        (store, accounts, engine)
    }

    fn transfer(
        from: &cornucopia_ledger::Account,
        to: &cornucopia_ledger::Account,
        amount: i64,
        key: &str,
    ) -> TransferCommand {
        TransferCommand {
            from_account_id: from.id_typed(),
            to_account_id: to.id_typed(),
            amount,
            description: format!("payout {key}"),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn overdraft_issuer_funds_members_who_then_trade() {
        let (store, accounts, engine) = setup();
        let issuer = accounts.create_account(true).await.unwrap();
        let alice = accounts.create_account(false).await.unwrap();
        let bob = accounts.create_account(false).await.unwrap();

        engine.transfer(transfer(&issuer, &alice, 700, "mint-alice")).await.unwrap();
        engine.transfer(transfer(&issuer, &bob, 300, "mint-bob")).await.unwrap();
        engine.transfer(transfer(&alice, &bob, 200, "trade-1")).await.unwrap();

        let err = engine
            .transfer(transfer(&bob, &alice, 501, "trade-2"))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Domain(DomainError::InsufficientBalance));

        let balances: Vec<i64> = accounts
            .accounts(&[issuer.id_typed(), alice.id_typed(), bob.id_typed()])
            .await
            .unwrap()
            .iter()
            .map(|a| a.balance())
            .collect();
        assert_eq!(balances, vec![-1000, 500, 500]);

        let bob_history = engine.journal_entries(bob.id_typed(), 10, 0).await.unwrap();
        let keys: Vec<_> = bob_history.iter().map(|e| e.idempotency_key()).collect();
        assert_eq!(keys, vec!["trade-1", "mint-bob"]);

        let journal = store.journal().unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(verify_chain(&journal), Ok(()));
    }

    #[tokio::test]
    async fn replayed_request_after_other_traffic_returns_original_entry() {
        let (_store, accounts, engine) = setup();
        let a = accounts.create_account(true).await.unwrap();
        let b = accounts.create_account(false).await.unwrap();

        let original = engine.transfer(transfer(&a, &b, 10, "r-1")).await.unwrap();
        engine.transfer(transfer(&a, &b, 20, "r-2")).await.unwrap();
        let replay = engine.transfer(transfer(&a, &b, 10, "r-1")).await.unwrap();

        assert_eq!(replay, original);
        assert_eq!(accounts.account(b.id_typed()).await.unwrap().balance(), 30);
    }
}
