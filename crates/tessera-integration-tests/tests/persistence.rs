//! Integration test: the relayer restarts in the middle of a fill.
//!
//! Orders, fills and issued grants live in SQLite. A relayer restarted over
//! the same database picks the order up where it stopped, the maker rebuilds
//! its order from its own secret store, and grant nonces keep counting from
//! the last one issued before the restart.

use std::sync::Arc;

use tessera_integration_tests::{order_params, Swap};
use tessera_transport::Message;
use tessera_types::order::{FillStage, OrderStatus};
use tokio::sync::Mutex;

#[tokio::test]
async fn relayer_restart_resumes_pending_fill() {
    let db = Arc::new(Mutex::new(tessera_db::open_memory().expect("relayer db")));
    let store = Arc::new(Mutex::new(tessera_db::open_memory().expect("maker store")));
    let mut swap = Swap::with_database(db.clone()).await.expect("swap");

    let mut maker = swap
        .connect_maker(swap.maker(0x61).with_store(store.clone()))
        .expect("maker");
    let mut resolver = swap
        .connect_resolver(swap.resolver(0x71, 400))
        .expect("resolver");
    let order = swap
        .open(&maker, order_params(4, 4_000, 400))
        .await
        .expect("open");

    let accepted = swap.claim(&resolver, &order, 1, 2).await.expect("claim");
    let source_escrow = swap
        .sponsor_source(&mut maker, &mut resolver, &order, &accepted)
        .await
        .expect("sponsor");
    let destination_escrow = swap
        .deploy(&resolver, &order, &accepted, 2, source_escrow)
        .await
        .expect("deploy");
    let validated = maker
        .take("DEPLOYMENT_VALIDATED", |m| match m {
            Message::DeploymentValidated(v) => Some(v),
            _ => None,
        })
        .expect("validated");

    // The relayer process goes away; the maker forgets its in-memory order.
    swap.restart(db.clone()).await.expect("restart");
    let state = swap.coordinator.order(&order.order_id).await.expect("reloaded");
    assert_eq!(state.status, OrderStatus::Open);
    assert_eq!(state.source_escrow, Some(source_escrow));
    assert_eq!(state.fills[0].stage, FillStage::AwaitingSecrets);
    let deployment = state.fills[0].deployment.as_ref().expect("deployment");
    assert_eq!(deployment.destination_escrow, destination_escrow);

    let maker = swap.maker(0x61).with_store(store.clone());
    let restored = maker.restore(order.intent.clone()).await.expect("restore");
    assert!((1..=5).all(|index| restored.secret(index) == order.secret(index)));
    let mut resolver = swap
        .connect_resolver(resolver.into_inner())
        .expect("reconnect");

    let disclosure = maker
        .disclose(&restored, &validated, swap.now())
        .await
        .expect("disclose");
    swap.request(Message::ProvideSecrets(disclosure))
        .await
        .expect("secrets accepted");
    let authorized = resolver
        .take("AUTHORIZED_SECRETS", |m| match m {
            Message::AuthorizedSecrets(a) => Some(a),
            _ => None,
        })
        .expect("authorized");
    assert_eq!(authorized.source_grant.nonce, 1);
    assert_eq!(authorized.destination_grant.nonce, 2);

    let (to_resolver, to_maker) = resolver
        .withdraw(
            swap.source.as_ref(),
            swap.destination.as_ref(),
            &authorized,
            accepted.destination_amount,
        )
        .await
        .expect("withdraw");
    assert_eq!((to_resolver, to_maker), (2_000, 200));

    // A second restart finds the fill authorized and settles it from chain.
    swap.restart(db.clone()).await.expect("second restart");
    assert_eq!(swap.coordinator.last_grant_nonce(), 2);
    assert_eq!(swap.coordinator.sweep().await, 1);
    let state = swap.coordinator.order(&order.order_id).await.expect("order");
    assert_eq!(state.status, OrderStatus::Open);
    assert_eq!(state.filled_parts, 2);
    assert_eq!(state.fills[0].stage, FillStage::Settled);

    let mut maker = swap.connect_maker(maker).expect("maker");
    let mut next = swap
        .connect_resolver(swap.resolver(0x72, 400))
        .expect("next resolver");
    let second = swap
        .complete_fill(&mut maker, &mut next, &restored, 3, 5)
        .await
        .expect("second fill");
    assert_eq!(second.source_escrow, source_escrow);
    assert_eq!(second.authorized.source_grant.nonce, 3);

    let state = swap.coordinator.order(&order.order_id).await.expect("order");
    assert_eq!(state.status, OrderStatus::Completed);
}
