use queueboard::config::{load_config, ProviderKind};
use queueboard::{Config, Discipline};

#[test]
fn load_config_matches_toml() {
    let cfg: Config = load_config("queueboard.toml").expect("failed to load config");

    assert_eq!(cfg.server.bind_addr, "127.0.0.1:3000");
    assert_eq!(cfg.provider.kind, ProviderKind::Memory);
    assert_eq!(cfg.provider.endpoint_url, None);
    assert_eq!(cfg.queues.fifo, "queueboard-orders.fifo");
    assert_eq!(cfg.consumer.visibility_timeout_secs, 30);
    assert_eq!(cfg.consumer.fifo_max_messages, 1);
    assert_eq!(cfg.lifecycle.max_attempts, 3);
    assert_eq!(cfg.lifecycle.seed, None);
    assert_eq!(cfg.memory.dedup_window_secs, 300);

    let queues = cfg.queue_set();
    assert!(queues.source(Discipline::Fifo).is_fifo());
    assert!(queues.dead_letter(Discipline::Fifo).unwrap().is_fifo());
    assert_eq!(cfg.retry_policy(), Default::default());
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_config("does-not-exist.toml").is_err());
}
