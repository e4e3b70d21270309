//! End-to-end pipeline tests: messages travel the real ring into a real
//! engine, with a recording sink standing in for console and broadcast.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flowbook::feed::ResyncRequest;
use flowbook::messages::EngineMessage;
use flowbook::orderbook::BookMetrics;
use flowbook::output::{EngineSink, Telemetry};
use flowbook::parser::{AggTrade, DepthSnapshot, DepthUpdate, PriceLevel};
use flowbook::trade::{TradeAlert, TradeFlowMetrics};
use flowbook::{Config, Engine};

#[derive(Default, Clone)]
struct SharedSink {
    metrics: Arc<Mutex<Vec<(BookMetrics, TradeFlowMetrics)>>>,
    alerts: Arc<Mutex<Vec<TradeAlert>>>,
    statuses: Arc<Mutex<Vec<(bool, String)>>>,
}

impl EngineSink for SharedSink {
    fn emit_metrics(&mut self, book: &BookMetrics, flow: &TradeFlowMetrics) {
        self.metrics.lock().unwrap().push((*book, *flow));
    }
    fn emit_alert(&mut self, alert: &TradeAlert) {
        self.alerts.lock().unwrap().push(*alert);
    }
    fn emit_status(&mut self, connected: bool, state: &str) {
        self.statuses.lock().unwrap().push((connected, state.to_string()));
    }
}

struct Pipeline {
    producer: flowbook::ring::Producer<EngineMessage>,
    engine_thread: std::thread::JoinHandle<()>,
    sink: SharedSink,
    resync: Arc<ResyncRequest>,
}

fn start_pipeline() -> Pipeline {
    let mut config = Config::default();
    config.output.console_interval_ms = 100;

    let (producer, consumer) = flowbook::ring::channel(256);
    let sink = SharedSink::default();
    let resync = Arc::new(ResyncRequest::new());

    let engine = Engine::new(
        &config,
        consumer,
        sink.clone(),
        Arc::clone(&resync),
        Arc::new(AtomicBool::new(false)),
        Arc::new(Telemetry::new()),
    );
    let engine_thread = std::thread::spawn(move || engine.run());

    Pipeline {
        producer,
        engine_thread,
        sink,
        resync,
    }
}

impl Pipeline {
    fn push(&mut self, msg: EngineMessage) {
        self.producer.try_push(msg).expect("test ring overflow");
    }

    fn wait_for<F: Fn(&SharedSink) -> bool>(&self, predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if predicate(&self.sink) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("pipeline condition not reached within deadline");
    }

    fn shutdown(mut self) -> SharedSink {
        self.producer
            .try_push(EngineMessage::Shutdown)
            .expect("test ring overflow");
        self.engine_thread.join().unwrap();
        self.sink
    }
}

fn level(price: &str, qty: f64) -> PriceLevel {
    PriceLevel {
        price: price.parse().unwrap(),
        qty,
    }
}

fn snapshot() -> DepthSnapshot {
    DepthSnapshot {
        last_update_id: 1000,
        bids: vec![level("42150.50", 1.5), level("42149.00", 2.0)],
        asks: vec![level("42151.00", 1.0), level("42152.00", 1.5)],
    }
}

fn update(
    first: u64,
    last: u64,
    prev: u64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
) -> DepthUpdate {
    DepthUpdate {
        event_type: "depthUpdate".to_string(),
        event_time: 0,
        transaction_time: 0,
        symbol: "BTCUSDT".to_string(),
        first_update_id: first,
        final_update_id: last,
        prev_final_update_id: prev,
        bids,
        asks,
    }
}

fn trade(qty: f64, is_buyer_maker: bool) -> AggTrade {
    AggTrade {
        event_type: "aggTrade".to_string(),
        event_time: 0,
        symbol: "BTCUSDT".to_string(),
        agg_trade_id: 1,
        price: 42150.0,
        quantity: qty,
        first_trade_id: 1,
        last_trade_id: 1,
        trade_time: 0,
        is_buyer_maker,
    }
}

#[test]
fn snapshot_produces_top_of_book_metrics() {
    let mut pipeline = start_pipeline();
    pipeline.push(EngineMessage::Snapshot {
        snapshot: snapshot(),
        received_at: Instant::now(),
    });
    pipeline.wait_for(|sink| !sink.metrics.lock().unwrap().is_empty());

    let sink = pipeline.shutdown();
    let metrics = sink.metrics.lock().unwrap();
    let (book, _) = &metrics[0];

    let bid = book.best_bid.unwrap();
    let ask = book.best_ask.unwrap();
    assert_eq!(bid.price.to_string(), "42150.5");
    assert_eq!(bid.qty, 1.5);
    assert_eq!(ask.price.to_string(), "42151");
    assert_eq!(ask.qty, 1.0);
    assert_eq!(book.spread.to_string(), "0.5");
    assert_eq!(book.mid_price.to_string(), "42150.75");
    assert!((book.spread_bps - 0.11862).abs() < 1e-4);
    assert_eq!(book.last_update_id, 1000);
    assert!(book.is_valid());

    let statuses = sink.statuses.lock().unwrap();
    assert!(statuses.iter().any(|(up, s)| *up && s == "synchronized"));
}

#[test]
fn bridged_replay_reaches_live_book() {
    // snapshot L=1000 with a replayed bridge (U=1000,u=1001) and follower
    // (U=1002,u=1005), as the coordinator would emit them
    let mut pipeline = start_pipeline();
    pipeline.push(EngineMessage::Snapshot {
        snapshot: snapshot(),
        received_at: Instant::now(),
    });
    pipeline.push(EngineMessage::DepthUpdate {
        update: update(1000, 1001, 1000, vec![level("42150.00", 1.0)], vec![]),
        received_at: Instant::now(),
    });
    pipeline.push(EngineMessage::DepthUpdate {
        update: update(1002, 1005, 1001, vec![level("42150.50", 0.0)], vec![]),
        received_at: Instant::now(),
    });

    // idle emission after the interval reflects the fully replayed book
    pipeline.wait_for(|sink| {
        sink.metrics
            .lock()
            .unwrap()
            .iter()
            .any(|(book, _)| book.last_update_id == 1005)
    });

    let sink = pipeline.shutdown();
    let metrics = sink.metrics.lock().unwrap();
    let (book, _) = metrics.last().unwrap();
    assert_eq!(book.last_update_id, 1005);
    // the 42150.50 bid was deleted by the follower update
    assert_eq!(book.best_bid.unwrap().price.to_string(), "42150");
}

#[test]
fn sequence_gap_clears_book_and_requests_resync() {
    let mut pipeline = start_pipeline();
    pipeline.push(EngineMessage::Snapshot {
        snapshot: snapshot(),
        received_at: Instant::now(),
    });
    pipeline.push(EngineMessage::DepthUpdate {
        update: update(1001, 1002, 1000, vec![], vec![]),
        received_at: Instant::now(),
    });
    // pu=1005 does not match the book sequence 1002
    pipeline.push(EngineMessage::DepthUpdate {
        update: update(1010, 1010, 1005, vec![], vec![]),
        received_at: Instant::now(),
    });

    let resync = Arc::clone(&pipeline.resync);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !resync.take() {
        assert!(Instant::now() < deadline, "resync was never requested");
        std::thread::sleep(Duration::from_millis(10));
    }

    let sink = pipeline.shutdown();
    // after the gap the engine is out of sync; only pre-gap metrics exist
    let metrics = sink.metrics.lock().unwrap();
    assert!(metrics.iter().all(|(book, _)| book.last_update_id <= 1002));
}

#[test]
fn outlier_trade_raises_alert() {
    let mut pipeline = start_pipeline();
    for _ in 0..5 {
        pipeline.push(EngineMessage::AggTrade {
            trade: trade(1.0, false),
            received_at: Instant::now(),
        });
    }
    pipeline.push(EngineMessage::AggTrade {
        trade: trade(100.0, false),
        received_at: Instant::now(),
    });

    pipeline.wait_for(|sink| !sink.alerts.lock().unwrap().is_empty());
    let sink = pipeline.shutdown();

    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].is_buy);
    assert_eq!(alerts[0].quantity, 100.0);
    assert!(alerts[0].deviation > 2.0);
}

#[test]
fn connection_events_emit_status() {
    let mut pipeline = start_pipeline();
    pipeline.push(EngineMessage::ConnectionLost {
        reason: "read error".to_string(),
        occurred_at: Instant::now(),
    });
    pipeline.push(EngineMessage::ConnectionRestored {
        occurred_at: Instant::now(),
    });

    pipeline.wait_for(|sink| sink.statuses.lock().unwrap().len() >= 2);
    let sink = pipeline.shutdown();

    let statuses = sink.statuses.lock().unwrap();
    assert_eq!(statuses[0], (false, "disconnected".to_string()));
    assert_eq!(statuses[1], (true, "connected".to_string()));
}

#[test]
fn trades_accumulate_flow_metrics_across_sync() {
    let mut pipeline = start_pipeline();
    pipeline.push(EngineMessage::Snapshot {
        snapshot: snapshot(),
        received_at: Instant::now(),
    });
    pipeline.push(EngineMessage::AggTrade {
        trade: trade(2.0, false), // taker buy
        received_at: Instant::now(),
    });
    pipeline.push(EngineMessage::AggTrade {
        trade: trade(0.5, true), // taker sell
        received_at: Instant::now(),
    });

    pipeline.wait_for(|sink| {
        sink.metrics
            .lock()
            .unwrap()
            .iter()
            .any(|(_, flow)| flow.trade_count == 2)
    });
    let sink = pipeline.shutdown();

    let metrics = sink.metrics.lock().unwrap();
    let (_, flow) = metrics.last().unwrap();
    assert_eq!(flow.total_buy_volume, 2.0);
    assert_eq!(flow.total_sell_volume, 0.5);
    assert_eq!(flow.net_flow, 1.5);
    assert_eq!(flow.vwap, 42150.0);
}
