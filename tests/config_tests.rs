use tick_pairs::config::{parse_interval_ms, Config, FeedSourceKind};

#[test]
fn parse_default_toml() {
    let config = Config::from_toml_str(include_str!("../config/default.toml"))
        .expect("bundled config should parse");
    assert_eq!(config.feed.source, FeedSourceKind::Binance);
    assert_eq!(config.feed.ws_base_url, "wss://stream.binance.com:9443/ws");
    assert_eq!(
        config.feed.active_symbols(),
        vec!["btcusdt", "ethusdt", "adausdt", "solusdt"]
    );
    assert_eq!(config.store.max_ticks_per_symbol, 5000);
    assert_eq!(config.store.restore_limit, 5000);
    assert_eq!(config.delivery.batch_flush_ms, 250);
    assert_eq!(config.analytics.default_timeframe, "1m");
    assert!((config.analytics.adf_significance - 0.05).abs() < f64::EPSILON);
    assert_eq!(config.server.bind_addr, "127.0.0.1:5000");
    assert!(!config.logging.json);
}

#[test]
fn symbols_are_normalized_and_deduplicated() {
    let config = Config::from_toml_str(
        r#"
[feed]
source = "synthetic"
symbols = ["BTCUSDT", " btcusdt ", "EthUsdt"]
"#,
    )
    .expect("config should parse");
    assert_eq!(config.feed.active_symbols(), vec!["btcusdt", "ethusdt"]);
}

#[test]
fn rejects_invalid_values() {
    let cases = [
        (
            "bad symbol",
            "[feed]\nsource = \"synthetic\"\nsymbols = [\"BTC/USDT\"]\n",
        ),
        (
            "http feed url",
            "[feed]\nsource = \"binance\"\nws_base_url = \"https://stream.binance.com\"\n",
        ),
        (
            "zero window",
            "[feed]\nsource = \"synthetic\"\n[analytics]\ndefault_window = 0\n",
        ),
        (
            "bad timeframe",
            "[feed]\nsource = \"synthetic\"\n[analytics]\ndefault_timeframe = \"5x\"\n",
        ),
        (
            "significance out of range",
            "[feed]\nsource = \"synthetic\"\n[analytics]\nadf_significance = 1.5\n",
        ),
        (
            "bad bind address",
            "[feed]\nsource = \"synthetic\"\n[server]\nbind_addr = \"localhost\"\n",
        ),
        ("unknown source", "[feed]\nsource = \"kraken\"\n"),
        ("missing feed", "[logging]\nlevel = \"debug\"\n"),
    ];
    for (name, toml_str) in cases {
        assert!(Config::from_toml_str(toml_str).is_err(), "{} should be rejected", name);
    }
}

#[test]
fn synthetic_source_skips_url_check() {
    let config = Config::from_toml_str(
        "[feed]\nsource = \"synthetic\"\nws_base_url = \"not a url\"\n",
    )
    .expect("synthetic config should parse");
    assert_eq!(config.feed.source, FeedSourceKind::Synthetic);
}

#[test]
fn parse_interval_valid() {
    assert_eq!(parse_interval_ms("1s").unwrap(), 1_000);
    assert_eq!(parse_interval_ms("5m").unwrap(), 300_000);
    assert_eq!(parse_interval_ms("15min").unwrap(), 900_000);
    assert_eq!(parse_interval_ms("1h").unwrap(), 3_600_000);
    assert_eq!(parse_interval_ms("1d").unwrap(), 86_400_000);
    assert_eq!(parse_interval_ms("1w").unwrap(), 604_800_000);
}

#[test]
fn parse_interval_invalid() {
    assert!(parse_interval_ms("").is_err());
    assert!(parse_interval_ms("0s").is_err());
    assert!(parse_interval_ms("1y").is_err());
    assert!(parse_interval_ms("abc").is_err());
    assert!(parse_interval_ms("5é").is_err());
}
