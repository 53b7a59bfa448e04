mod common;

use std::time::Duration;

use common::*;
use queueboard::provider::QueueSet;
use queueboard::{Discipline, Engine, EngineConfig, Stage};

fn spawn(provider: std::sync::Arc<RecordingProvider>, dead_letters: bool) -> queueboard::EngineHandle {
    let mut queues = QueueSet::new(STANDARD, FIFO);
    if dead_letters {
        queues = queues.with_dead_letters(Some(STANDARD_DLQ.into()), Some(FIFO_DLQ.into()));
    }
    let (handle, _task) = Engine::spawn(
        EngineConfig {
            policy: Default::default(),
            queues,
            seed: Some(5),
        },
        provider,
    );
    handle
}

#[tokio::test(start_paused = true)]
async fn provider_receive_count_seeds_retries() {
    init_logging();
    let provider = RecordingProvider::new();
    let engine = spawn(provider.clone(), false);
    let sub = engine.subscribe().await.unwrap();

    let mut redelivered = card("m-1", Discipline::Standard, 100);
    redelivered.retry_count = 2;
    engine.ingest(Discipline::Standard, vec![redelivered]).unwrap();

    let seen = observe_until(&sub, Duration::from_secs(10), |b| b.standard.dlq.len() == 1).await;
    let stages: Vec<Stage> = stage_path(&seen, Discipline::Standard, "m-1")
        .into_iter()
        .map(|(_, s)| s)
        .collect();
    assert_eq!(
        stages,
        vec![Stage::Received, Stage::Processing, Stage::Failed, Stage::Dlq]
    );
    let board = &seen.last().unwrap().1;
    assert_eq!(board.standard.dlq[0].retry_count, 3);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_keeps_one_card() {
    init_logging();
    let provider = RecordingProvider::new();
    let engine = spawn(provider.clone(), false);
    let sub = engine.subscribe().await.unwrap();

    engine
        .ingest(Discipline::Standard, vec![card("m-1", Discipline::Standard, 0)])
        .unwrap();
    let mut again = card("m-1", Discipline::Standard, 0);
    again.receipt_handle = "rh-second".into();
    engine.ingest(Discipline::Standard, vec![again]).unwrap();

    let seen = observe_until(&sub, Duration::from_secs(10), |b| b.standard.done.len() == 1).await;
    for (_, board) in &seen {
        assert!(all_cards(board, Discipline::Standard).len() <= 1);
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(provider.deletes(), vec!["rh-second".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn redelivered_dead_letter_is_forwarded_again() {
    init_logging();
    let provider = RecordingProvider::new();
    let engine = spawn(provider.clone(), true);
    let sub = engine.subscribe().await.unwrap();

    engine
        .ingest(Discipline::Fifo, vec![card("m-1", Discipline::Fifo, 100)])
        .unwrap();
    observe_until(&sub, Duration::from_secs(30), |b| b.fifo.dlq.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let first = provider.calls();
    assert_eq!(first.len(), 2);
    assert!(matches!(&first[0], Call::Send(q) if q.as_str() == FIFO_DLQ));
    assert!(matches!(&first[1], Call::Delete(q, h) if q.as_str() == FIFO && h == "rh-m-1"));

    let mut again = card("m-1", Discipline::Fifo, 100);
    again.receipt_handle = "rh-late".into();
    engine.ingest(Discipline::Fifo, vec![again]).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(provider.deletes(), vec!["rh-m-1".to_owned(), "rh-late".to_owned()]);
    let board = engine.snapshot().await.unwrap();
    assert_eq!(board.fifo.dlq.len(), 1);
    // Same dedup id both times, so the dead-letter queue keeps one copy.
    assert_eq!(provider.inner.depth(&FIFO_DLQ.into()).visible, 1);
}

#[tokio::test(start_paused = true)]
async fn disciplines_are_tracked_apart() {
    init_logging();
    let provider = RecordingProvider::new();
    let engine = spawn(provider, false);
    let sub = engine.subscribe().await.unwrap();

    engine
        .ingest(Discipline::Standard, vec![card("same", Discipline::Standard, 0)])
        .unwrap();
    engine
        .ingest(Discipline::Fifo, vec![card("same", Discipline::Fifo, 100)])
        .unwrap();

    let seen = observe_until(&sub, Duration::from_secs(30), |b| {
        b.standard.done.len() == 1 && b.fifo.dlq.len() == 1
    })
    .await;
    let last = &seen.last().unwrap().1;
    assert_eq!(last.locate(Discipline::Standard, "same"), Some(Stage::Done));
    assert_eq!(last.locate(Discipline::Fifo, "same"), Some(Stage::Dlq));
}

#[tokio::test(start_paused = true)]
async fn engine_stops_after_last_handle_and_timers() {
    init_logging();
    let provider = RecordingProvider::new();
    let (engine, task) = Engine::spawn(
        EngineConfig {
            policy: Default::default(),
            queues: QueueSet::new(STANDARD, FIFO),
            seed: None,
        },
        provider,
    );
    engine
        .ingest(Discipline::Standard, vec![card("m-1", Discipline::Standard, 0)])
        .unwrap();
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.pending_timers, 1);

    let started = tokio::time::Instant::now();
    drop(engine);
    task.await.unwrap();
    // processing (1) + done (3)
    assert!(started.elapsed() >= Duration::from_secs(4));
}
