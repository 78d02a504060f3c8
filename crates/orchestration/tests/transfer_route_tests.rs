// Integration tests for route composition and multi-hop transfers
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use orchestration::transfer::{decode_swap_args, Ratio, Settlement};
use orchestration::{
    Brand, ChainAddress, ChainAmount, InMemoryChain, OrchestrationError, Orchestrator, OrchestratorConfig,
    SwapOutput, SwapRequest,
};

fn venue() -> anyhow::Result<ChainAddress> {
    Ok(ChainAddress::from_bytes("osmosis-1", "osmo", &[0xAA; 20])?)
}

/// Helper function to create a test configuration with a swap venue on osmosis
fn create_test_config() -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::default();
    config.executor.ambiguous_timeout = Duration::from_millis(200);
    config.executor.retry.initial_delay_ms = 1;
    config.executor.retry.max_delay_ms = 5;
    config.transfer.swap_venue = Some(venue()?);
    Ok(config)
}

async fn setup() -> anyhow::Result<(Orchestrator, BTreeMap<String, Arc<InMemoryChain>>)> {
    let orchestrator = Orchestrator::with_memory_store(create_test_config()?)?;
    let ledgers = orchestrator.register_in_memory_chains().await?;
    Ok((orchestrator, ledgers))
}

fn swap_request(after: Option<ChainAddress>) -> SwapRequest {
    SwapRequest {
        amount_in: Some(ChainAmount::new("utia", 1_000)),
        brand_out: Some(Brand::new("OSMO")),
        max_slippage: Ratio::percent(3).ok(),
        after,
        ..SwapRequest::default()
    }
}

#[tokio::test]
async fn test_sequence_has_one_link_fewer_than_steps() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let composer = orchestrator.composer();
    let steps = (1..=4)
        .map(|i| Ok(composer.make_transfer_msg(ledgers["celestia"].external_address(i)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let route = composer.make_sequence(steps)?;
    assert_eq!(route.hop_count(), 4);
    assert_eq!(route.links(), 3);
    Ok(())
}

#[tokio::test]
async fn test_sequence_over_hop_bound_fails_before_submission() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let composer = orchestrator.composer();
    let steps = (1..=(composer.max_hops() as u8 + 1))
        .map(|i| Ok(composer.make_transfer_msg(ledgers["stride"].external_address(i)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let err = composer.make_sequence(steps).unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));
    assert!(celestia.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_swap_shapes_validated_eagerly() -> anyhow::Result<()> {
    let (orchestrator, _ledgers) = setup().await?;
    let composer = orchestrator.composer();

    let both = SwapRequest {
        amount_out: Some(ChainAmount::new("uosmo", 10)),
        ..swap_request(None)
    };
    let neither = SwapRequest {
        brand_out: None,
        max_slippage: None,
        ..swap_request(None)
    };
    let partial = SwapRequest {
        max_slippage: None,
        ..swap_request(None)
    };

    for request in [both, neither, partial] {
        assert!(matches!(composer.make_swap(request), Err(OrchestrationError::Validation(_))));
    }
    Ok(())
}

#[tokio::test]
async fn test_swap_args_survive_the_memo() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    celestia.fund(alice.address(), "utia", 5_000);
    let home = celestia.external_address(7)?;

    let route = orchestrator.composer().make_swap(swap_request(Some(home.clone())))?;
    let args = route.swap_args().cloned().expect("swap hop carries its args");
    assert!(matches!(args.output, SwapOutput::MaxSlippage { .. }));
    assert_eq!(route.to_account(), &venue()?);
    assert_eq!(route.next().map(|n| n.to_account()), Some(&home));

    let receipt = alice.transfer_steps(ChainAmount::new("utia", 1_000), &route).await?;
    assert_eq!(receipt.settlement, Settlement::FirstHop);
    assert_eq!(receipt.remaining_hops, 1);
    assert_eq!(decode_swap_args(&receipt.memo)?, Some(args));

    let memo: Value = serde_json::from_str(&receipt.memo)?;
    assert_eq!(memo["wasm"]["contract"], venue()?.address());
    assert_eq!(memo["wasm"]["msg"]["on_complete"]["forward"]["channel"], "channel-6994");
    Ok(())
}

#[tokio::test]
async fn test_transfer_steps_forwards_through_intermediate_chain() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    celestia.fund(alice.address(), "utia", 5_000);

    let relay = ledgers["stride"].external_address(1)?;
    let home = celestia.external_address(2)?;
    let composer = orchestrator.composer();
    let route = composer.make_sequence([
        composer.make_transfer_msg(relay.clone()),
        composer.make_transfer_msg(home.clone()),
    ])?;

    let receipt = alice.transfer_steps(ChainAmount::new("utia", 2_500), &route).await?;
    assert_eq!(receipt.first_hop, relay);
    assert_eq!(receipt.remaining_hops, 1);

    let outbound = celestia.outbound_transfers();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].source_channel, "channel-4");
    assert_eq!(outbound[0].receiver, relay.address());
    assert_eq!(outbound[0].amount, 2_500);

    let memo: Value = serde_json::from_str(&outbound[0].memo)?;
    assert_eq!(memo["forward"]["receiver"], home.address());
    assert_eq!(memo["forward"]["channel"], "channel-162");
    assert_eq!(memo["forward"]["timeout"], "10m");
    assert_eq!(alice.get_balance("utia").await?.value, 2_500);
    Ok(())
}

#[tokio::test]
async fn test_missing_channel_rejected_before_submission() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    celestia.fund(alice.address(), "utia", 5_000);

    // Stride has no channel to osmosis
    let composer = orchestrator.composer();
    let route = composer.make_sequence([
        composer.make_transfer_msg(ledgers["stride"].external_address(1)?),
        composer.make_transfer_msg(ledgers["osmosis"].external_address(1)?),
    ])?;

    let err = alice.transfer_steps(ChainAmount::new("utia", 10), &route).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));
    assert!(celestia.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expired_hop_timeout_rejected() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    celestia.fund(alice.address(), "utia", 5_000);

    let composer = orchestrator.composer();
    let past = Utc::now() - chrono::Duration::minutes(5);
    let route = composer.make_sequence([
        composer.make_transfer_msg(ledgers["stride"].external_address(1)?),
        composer.make_transfer_msg(celestia.external_address(1)?).with_timeout(past),
    ])?;

    let err = alice.transfer_steps(ChainAmount::new("utia", 10), &route).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));
    assert!(celestia.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_single_transfer_resolves_channel() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup().await?;
    let celestia = &ledgers["celestia"];
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    let carol = orchestrator.provide_account("stride", "carol").await?;
    celestia.fund(alice.address(), "utia", 100);

    alice.transfer(ChainAmount::new("utia", 60), carol.address(), Some("hello")).await?;
    let outbound = celestia.outbound_transfers();
    assert_eq!(outbound[0].source_channel, "channel-4");
    assert_eq!(outbound[0].memo, "hello");

    // Same-chain destinations fall back to a bank send
    let bob = celestia.external_address(3)?;
    alice.transfer(ChainAmount::new("utia", 40), &bob, None).await?;
    assert_eq!(celestia.balance(&bob, "utia"), 40);

    let cross = alice.send(carol.address(), ChainAmount::new("utia", 1)).await.unwrap_err();
    assert!(matches!(cross, OrchestrationError::Validation(_)));
    Ok(())
}
