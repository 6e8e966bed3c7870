use std::time::Duration;

use super::*;

#[test]
fn applies_defaults() {
    let config = Config::builder("key-1", "https://ingest.example.com/v1/events")
        .build()
        .unwrap();
    assert_eq!(config.api_key_header, "X-API-Key");
    assert_eq!(config.flush_interval, Duration::from_millis(5000));
    assert_eq!(config.max_batch_size, 10);
    assert_eq!(config.max_buffer_size, None, "buffer is unbounded by default");
    assert_eq!(config.max_retries, 3);
}

#[test]
fn overrides_defaults_when_set() {
    let config = Config::builder("key-1", "https://ingest.example.com")
        .api_key_header("Authorization")
        .flush_interval(Duration::from_secs(1))
        .max_batch_size(25)
        .max_buffer_size(100)
        .max_retries(0)
        .build()
        .unwrap();
    assert_eq!(config.api_key_header, "Authorization");
    assert_eq!(config.flush_interval, Duration::from_secs(1));
    assert_eq!(config.max_batch_size, 25);
    assert_eq!(config.max_buffer_size, Some(100));
    assert_eq!(config.max_retries, 0);
}

#[test]
fn rejects_empty_api_key() {
    let err = Config::builder("", "https://ingest.example.com")
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::ApiKeyMissing), "should require api key");
}

#[test]
fn rejects_invalid_endpoint_url() {
    let err = Config::builder("key-1", "not a url").build().unwrap_err();
    assert!(
        matches!(err, ConfigError::EndpointInvalidUrl(_)),
        "should reject unparseable endpoint"
    );
}

#[test]
fn rejects_http_endpoint() {
    let err = Config::builder("key-1", "http://ingest.example.com")
        .build()
        .unwrap_err();
    assert!(
        matches!(err, ConfigError::EndpointNotHttps(_)),
        "should enforce https"
    );
}

#[test]
fn rejects_zero_flush_interval() {
    let err = Config::builder("key-1", "https://ingest.example.com")
        .flush_interval(Duration::ZERO)
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidFlushInterval));
}

#[test]
fn rejects_zero_batch_size() {
    let err = Config::builder("key-1", "https://ingest.example.com")
        .max_batch_size(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBatchSize));
}

#[test]
fn buffer_smaller_than_batch_is_legal() {
    // Warned at init time, not rejected here.
    let config = Config::builder("key-1", "https://ingest.example.com")
        .max_batch_size(10)
        .max_buffer_size(2)
        .build()
        .unwrap();
    assert_eq!(config.max_buffer_size, Some(2));
}
