//! Integration test: one resolver fills a whole order.
//!
//! 1. Maker commits 4 parts (5 secrets) and opens the order
//! 2. Resolver claims `[1, 5]`, sponsoring the gasless source escrow
//! 3. Both legs are deployed, cross-checked on chain and reported
//! 4. Maker discloses; relayer signs both grants
//! 5. Resolver withdraws destination (to the maker) and source (to itself)
//! 6. Sweeper sees the end nullifier and completes the order

use tessera_coordinator::ChainAdapter;
use tessera_integration_tests::{order_params, Swap};
use tessera_types::events::EventType;
use tessera_types::order::{FillStage, OrderStatus};

const SOURCE_AMOUNT: u128 = 1_000;
const DESTINATION_AMOUNT: u128 = 100;

#[tokio::test]
async fn single_resolver_fills_whole_order() {
    let swap = Swap::new().await.expect("swap");
    let mut events = swap.coordinator.events();
    let mut maker = swap.connect_maker(swap.maker(0x01)).expect("maker");
    let mut resolver = swap
        .connect_resolver(swap.resolver(0x21, DESTINATION_AMOUNT))
        .expect("resolver");

    let order = swap
        .open(&maker, order_params(4, SOURCE_AMOUNT, DESTINATION_AMOUNT))
        .await
        .expect("open");

    let fill = swap
        .authorize_fill(&mut maker, &mut resolver, &order, 1, 5)
        .await
        .expect("authorize");
    assert_eq!(fill.accepted.source_amount, SOURCE_AMOUNT);
    assert_eq!(fill.accepted.destination_amount, DESTINATION_AMOUNT);

    let indices: Vec<u32> = fill.authorized.secrets.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(fill.authorized.source_grant.start_index, 1);
    assert_eq!(fill.authorized.source_grant.end_index, 5);
    assert_eq!(fill.authorized.destination_grant.start_index, 1);
    assert_eq!(fill.authorized.destination_grant.end_index, 1);

    let state = swap.coordinator.order(&order.order_id).await.expect("order");
    assert_eq!(state.status, OrderStatus::Claimed);
    assert_eq!(state.fills[0].stage, FillStage::Authorized);
    assert_eq!(state.source_escrow, Some(fill.source_escrow));

    let (to_resolver, to_maker) = swap.withdraw(&resolver, &fill).await.expect("withdraw");
    assert_eq!(to_resolver, SOURCE_AMOUNT);
    assert_eq!(to_maker, DESTINATION_AMOUNT);
    assert_eq!(swap.source_balance(&resolver.address()).await, SOURCE_AMOUNT);
    assert_eq!(
        swap.destination_balance(&maker.destination_address()).await,
        DESTINATION_AMOUNT
    );
    assert_eq!(swap.source_balance(&maker.address()).await, 0);
    assert_eq!(
        swap.destination_balance(&resolver.destination_address()).await,
        0
    );

    let source_view = swap
        .source
        .escrow_view(&fill.source_escrow)
        .await
        .expect("source escrow");
    assert!(source_view.is_resolved);
    assert_eq!(source_view.filled_amount, SOURCE_AMOUNT);

    assert_eq!(swap.coordinator.sweep().await, 1);
    let state = swap.coordinator.order(&order.order_id).await.expect("order");
    assert_eq!(state.status, OrderStatus::Completed);
    assert_eq!(state.filled_parts, 4);
    assert_eq!(state.fills[0].stage, FillStage::Settled);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type);
    }
    for expected in [
        EventType::OrderCreated,
        EventType::FillRequested,
        EventType::OrderClaimed,
        EventType::MakerSigned,
        EventType::SourceEscrowCreated,
        EventType::DeploymentValidated,
        EventType::SecretsProvided,
        EventType::GrantIssued,
        EventType::SecretsAuthorized,
        EventType::FillSettled,
        EventType::OrderCompleted,
    ] {
        assert!(seen.contains(&expected), "missing {expected:?} in {seen:?}");
    }
    assert_eq!(seen.last(), Some(&EventType::OrderCompleted));
}

#[tokio::test]
async fn maker_receives_only_its_own_pushes() {
    let swap = Swap::new().await.expect("swap");
    let mut maker = swap.connect_maker(swap.maker(0x02)).expect("maker");
    let mut bystander = swap.connect_maker(swap.maker(0x03)).expect("bystander");
    let mut resolver = swap
        .connect_resolver(swap.resolver(0x22, DESTINATION_AMOUNT))
        .expect("resolver");

    let order = swap
        .open(&maker, order_params(2, SOURCE_AMOUNT, DESTINATION_AMOUNT))
        .await
        .expect("open");
    swap.complete_fill(&mut maker, &mut resolver, &order, 1, 3)
        .await
        .expect("fill");

    assert!(bystander.drain().is_empty());
    let kinds: Vec<&str> = maker.drain().iter().map(|m| m.kind()).collect();
    assert!(kinds.contains(&"SECRETS_AUTHORIZED"), "{kinds:?}");
}

#[tokio::test]
async fn grant_cannot_be_replayed_after_withdrawal() {
    let swap = Swap::new().await.expect("swap");
    let mut maker = swap.connect_maker(swap.maker(0x04)).expect("maker");
    let mut resolver = swap
        .connect_resolver(swap.resolver(0x24, DESTINATION_AMOUNT))
        .expect("resolver");
    let order = swap
        .open(&maker, order_params(4, SOURCE_AMOUNT, DESTINATION_AMOUNT))
        .await
        .expect("open");

    let fill = swap
        .complete_fill(&mut maker, &mut resolver, &order, 1, 2)
        .await
        .expect("fill");

    let request = resolver.source_withdrawal(&fill.authorized).expect("request");
    let replay = swap
        .source
        .withdraw_range(
            &resolver.address(),
            &fill.source_escrow,
            &request,
            &fill.authorized.source_grant,
        )
        .await;
    assert!(replay.is_err());
    assert_eq!(swap.source_balance(&resolver.address()).await, 500);
}
