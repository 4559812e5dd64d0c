//! Feed Multiplexing Integration Tests
//!
//! Tests reference-counted feeds, interest-based fan-out, and feed loss.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::sync::Arc;

use common::{Hub, drain, names, next_event, sym, wait_for};
use price_alert_hub::ServerEvent;
use price_alert_hub::application::ports::FeedStreamError;
use proptest::prelude::*;

#[tokio::test]
async fn ticks_reach_only_interested_clients() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    let (b, mut rx_b) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    hub.registry.subscribe(b, &sym("MSFT")).await.unwrap();

    assert!(hub.provider.push_price(&sym("AAPL"), 190.25));
    let ServerEvent::StockUpdate { symbol, data } = next_event(&mut rx_a).await else {
        panic!("expected stock_update");
    };
    assert_eq!(symbol, sym("AAPL"));
    assert_eq!(data.price, 190.25);

    assert!(hub.provider.push_price(&sym("MSFT"), 410.0));
    let ServerEvent::StockUpdate { symbol, .. } = next_event(&mut rx_b).await else {
        panic!("expected stock_update");
    };
    assert_eq!(symbol, sym("MSFT"));

    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn shared_symbol_uses_one_feed() {
    let hub = Hub::new();
    let mut clients = Vec::new();
    for _ in 0..5 {
        let (client, rx) = hub.connect().await;
        hub.registry.subscribe(client, &sym("TSLA")).await.unwrap();
        clients.push((client, rx));
    }

    assert_eq!(hub.provider.open_calls(&sym("TSLA")), 1);
    assert_eq!(hub.multiplexer.ref_count(&sym("TSLA")), 5);

    hub.provider.push_price(&sym("TSLA"), 250.0);
    for (_, rx) in &mut clients {
        assert_eq!(next_event(rx).await.name(), "stock_update");
    }

    for (client, _) in &clients {
        hub.gateway.disconnect(*client).await;
    }
    assert!(!hub.multiplexer.is_open(&sym("TSLA")));
    assert_eq!(hub.provider.live_count(), 0);
}

#[tokio::test]
async fn unsubscribed_client_stops_receiving() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    let (b, mut rx_b) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    hub.registry.subscribe(b, &sym("AAPL")).await.unwrap();

    assert!(hub.registry.unsubscribe(a, &sym("AAPL")).await);
    hub.provider.push_price(&sym("AAPL"), 191.0);

    assert_eq!(next_event(&mut rx_b).await.name(), "stock_update");
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn late_subscriber_gets_cached_tick() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    hub.provider.push_price(&sym("AAPL"), 189.5);
    next_event(&mut rx_a).await;

    let (b, mut rx_b) = hub.connect().await;
    hub.gateway
        .handle_text(b, r#"{"event":"subscribe","data":{"symbol":"AAPL"}}"#)
        .await;

    let events = drain(&mut rx_b);
    assert_eq!(names(&events), vec!["subscription_success", "stock_update"]);
    let ServerEvent::StockUpdate { data, .. } = &events[1] else {
        unreachable!()
    };
    assert_eq!(data.price, 189.5);
}

#[tokio::test]
async fn reopened_feed_does_not_replay_old_tick() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    hub.provider.push_price(&sym("AAPL"), 189.5);
    next_event(&mut rx_a).await;
    hub.registry.unsubscribe(a, &sym("AAPL")).await;

    hub.gateway
        .handle_text(a, r#"{"event":"subscribe","data":{"symbol":"AAPL"}}"#)
        .await;

    assert_eq!(names(&drain(&mut rx_a)), vec!["subscription_success"]);
    assert_eq!(hub.provider.open_calls(&sym("AAPL")), 2);
}

#[tokio::test]
async fn feed_loss_notifies_and_purges_interest() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    let (b, mut rx_b) = hub.connect().await;
    let (c, mut rx_c) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    hub.registry.subscribe(b, &sym("AAPL")).await.unwrap();
    hub.registry.subscribe(c, &sym("MSFT")).await.unwrap();

    hub.provider
        .fail_stream(&sym("AAPL"), FeedStreamError::Transport("reset by peer".into()));

    for rx in [&mut rx_a, &mut rx_b] {
        let ServerEvent::SubscriptionError { symbol, .. } = next_event(rx).await else {
            panic!("expected subscription_error");
        };
        assert_eq!(symbol, Some(sym("AAPL")));
    }
    assert!(drain(&mut rx_c).is_empty());
    assert!(hub.registry.client_symbols(a).is_empty());
    assert!(hub.registry.interested_clients(&sym("AAPL")).is_empty());
    assert_eq!(hub.multiplexer.ref_count(&sym("AAPL")), 0);

    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();
    assert_eq!(hub.provider.open_calls(&sym("AAPL")), 2);
    assert_eq!(hub.multiplexer.ref_count(&sym("AAPL")), 1);
}

#[tokio::test]
async fn ended_stream_is_treated_as_loss() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().await;
    hub.registry.subscribe(a, &sym("AAPL")).await.unwrap();

    hub.provider.end_stream(&sym("AAPL"));

    assert_eq!(next_event(&mut rx_a).await.name(), "subscription_error");
    wait_for(|| !hub.multiplexer.is_open(&sym("AAPL"))).await;
}

// =============================================================================
// Reference count invariant
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_subscribe_and_unsubscribe_keep_counts_consistent() {
    let hub = Hub::new();
    let symbol = sym("AMD");
    let mut clients = Vec::new();
    for _ in 0..8 {
        clients.push(hub.connect().await.0);
    }

    for round in 0..40_usize {
        let tasks = clients.iter().enumerate().map(|(i, &client)| {
            let registry = Arc::clone(&hub.registry);
            let symbol = symbol.clone();
            let turn = i + round;
            tokio::spawn(async move {
                if turn % 3 == 0 {
                    registry.unsubscribe(client, &symbol).await;
                } else {
                    registry.subscribe(client, &symbol).await.unwrap();
                    if turn % 2 == 0 {
                        registry.unsubscribe(client, &symbol).await;
                    }
                }
            })
        });
        for joined in futures::future::join_all(tasks).await {
            joined.unwrap();
        }

        let interested = hub.registry.interested_clients(&symbol).len();
        assert_eq!(hub.multiplexer.ref_count(&symbol), interested, "round {round}");
        assert_eq!(hub.multiplexer.is_open(&symbol), interested > 0, "round {round}");
        let expected_live = usize::from(interested > 0);
        wait_for(|| hub.provider.live_count() == expected_live).await;
    }

    for &client in &clients {
        hub.registry.unsubscribe(client, &symbol).await;
    }
    assert!(!hub.multiplexer.is_open(&symbol));
    wait_for(|| hub.provider.live_count() == 0).await;
}

#[derive(Debug, Clone)]
enum Op {
    Subscribe(usize, usize),
    Unsubscribe(usize, usize),
    Reconnect(usize),
}

const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "NVDA"];
const CLIENTS: usize = 3;

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..CLIENTS, 0..SYMBOLS.len()).prop_map(|(c, s)| Op::Subscribe(c, s)),
        3 => (0..CLIENTS, 0..SYMBOLS.len()).prop_map(|(c, s)| Op::Unsubscribe(c, s)),
        1 => (0..CLIENTS).prop_map(Op::Reconnect),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ref_count_matches_interested_clients(ops in prop::collection::vec(op(), 1..40)) {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let mut clients = Vec::new();
            for _ in 0..CLIENTS {
                clients.push(hub.connect().await);
            }

            for op in ops {
                match op {
                    Op::Subscribe(c, s) => {
                        hub.registry.subscribe(clients[c].0, &sym(SYMBOLS[s])).await.unwrap();
                    }
                    Op::Unsubscribe(c, s) => {
                        hub.registry.unsubscribe(clients[c].0, &sym(SYMBOLS[s])).await;
                    }
                    Op::Reconnect(c) => {
                        hub.gateway.disconnect(clients[c].0).await;
                        clients[c] = hub.connect().await;
                    }
                }

                let mut open = 0;
                for s in SYMBOLS {
                    let symbol = sym(s);
                    let interested = hub.registry.interested_clients(&symbol).len();
                    assert_eq!(hub.multiplexer.ref_count(&symbol), interested, "{s}");
                    assert_eq!(hub.multiplexer.is_open(&symbol), interested > 0, "{s}");
                    assert!(hub.provider.open_calls(&symbol) >= usize::from(interested > 0));
                    open += usize::from(interested > 0);
                }
                assert_eq!(hub.provider.live_count(), open);
                assert_eq!(hub.multiplexer.open_feed_count(), open);
            }
        });
    }
}
