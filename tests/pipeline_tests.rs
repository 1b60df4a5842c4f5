//! Integration tests for the request pipeline (auth gate, circuit breaker, rate
//! limiting, retry) driven through the public client API.

use integrations_garmin::{
    ApiRequest, CircuitBreakerConfig, CircuitState, ClientErrorKind, GarminClient, GarminConfig,
    GarminError, HttpResponse, InMemoryTokenPersistence, MockHttpTransport, RateLimiterConfig,
    ResilienceConfig, RetryConfig, SessionCredential,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn client(resilience: ResilienceConfig, transport: Arc<MockHttpTransport>) -> GarminClient {
    let config = GarminConfig::builder().resilience(resilience).build().unwrap();

    let client = GarminClient::builder()
        .config(config)
        .transport(transport)
        .persistence(Arc::new(InMemoryTokenPersistence::new()))
        .build()
        .unwrap();
    client.store().store_session(SessionCredential::new("abc"));
    client
}

fn breaker_only(window: u32) -> ResilienceConfig {
    ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            sliding_window_size: window,
            minimum_number_of_calls: window,
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(60),
            ..Default::default()
        },
        rate_limiter: RateLimiterConfig::disabled(),
        retry: RetryConfig::disabled(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_fails_fast() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::with_status(503, "maintenance"));
    let client = client(breaker_only(4), transport.clone());

    // Act
    for _ in 0..4 {
        let error = client.executor().execute(ApiRequest::get("a")).await.unwrap_err();
        assert_eq!(error.client_kind(), Some(ClientErrorKind::ServerFault));
    }
    let rejected = client.executor().execute(ApiRequest::get("a")).await;

    // Assert
    assert!(matches!(rejected, Err(GarminError::CircuitOpen { .. })));
    assert_eq!(transport.request_count(), 4);
    assert_eq!(client.resilience_stats().circuit_state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_exactly_one_probe() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::with_status(500, "boom"));
    let client = client(breaker_only(2), transport.clone());
    for _ in 0..2 {
        let _ = client.executor().execute(ApiRequest::get("a")).await;
    }
    tokio::time::advance(Duration::from_secs(60)).await;

    transport.set_default_response(HttpResponse::ok("{}"));
    transport.set_latency(Duration::from_secs(1));

    // Act
    let (probe, concurrent) = tokio::join!(
        client.executor().execute(ApiRequest::get("probe")),
        client.executor().execute(ApiRequest::get("concurrent")),
    );

    // Assert
    assert!(probe.is_ok());
    assert!(matches!(concurrent, Err(GarminError::CircuitOpen { .. })));
    assert_eq!(transport.request_count(), 3);
    assert_eq!(client.resilience_stats().circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_is_not_a_failure() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::with_status(500, "boom"));
    let client = client(breaker_only(2), transport.clone());
    for _ in 0..2 {
        let _ = client.executor().execute(ApiRequest::get("a")).await;
    }
    tokio::time::advance(Duration::from_secs(60)).await;
    transport.set_default_response(HttpResponse::ok("{}"));
    transport.set_latency(Duration::from_secs(10));

    // Act
    let cancelled = tokio::time::timeout(
        Duration::from_secs(1),
        client.executor().execute(ApiRequest::get("slow")),
    )
    .await;
    transport.set_latency(Duration::ZERO);
    let next = client.executor().execute(ApiRequest::get("next")).await;

    // Assert
    assert!(cancelled.is_err());
    assert!(next.is_ok());
    assert_eq!(client.resilience_stats().circuit_breaker.failed_requests, 2);
    assert_eq!(client.resilience_stats().circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_excess_waits_then_fails() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::ok("{}"));
    let resilience = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig::disabled(),
        rate_limiter: RateLimiterConfig {
            enabled: true,
            limit_for_period: 2,
            limit_refresh_period: Duration::from_secs(60),
            timeout_duration: Duration::from_secs(1),
        },
        retry: RetryConfig::disabled(),
    };
    let client = client(resilience, transport.clone());

    // Act
    client.executor().execute(ApiRequest::get("a")).await.unwrap();
    client.executor().execute(ApiRequest::get("b")).await.unwrap();
    let start = Instant::now();
    let third = client.executor().execute(ApiRequest::get("c")).await;

    // Assert
    assert!(matches!(
        third,
        Err(GarminError::RateLimitExceeded { timeout }) if timeout == Duration::from_secs(1)
    ));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_failures() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport
        .queue_response(HttpResponse::with_status(503, "busy"))
        .queue_response(HttpResponse::with_status(502, "bad gateway"))
        .queue_json_response(200, &serde_json::json!({"steps": 12000}));
    let resilience = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig::disabled(),
        rate_limiter: RateLimiterConfig::disabled(),
        retry: RetryConfig {
            max_attempts: 3,
            wait_duration: Duration::from_millis(500),
            ..Default::default()
        },
    };
    let client = client(resilience, transport.clone());

    // Act
    let summary: serde_json::Value = client
        .executor()
        .get("usersummary-service/usersummary/daily")
        .await
        .unwrap();

    // Assert
    assert_eq!(summary["steps"], 12000);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(client.resilience_stats().retry.successful_retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_never_retried() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::with_status(401, "expired"));
    let client = client(ResilienceConfig::default(), transport.clone());

    // Act
    let error = client.executor().execute(ApiRequest::get("a")).await.unwrap_err();

    // Assert
    assert!(error.needs_reauth());
    assert_eq!(error.status(), Some(401));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_no_session_never_reaches_transport() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    let client = client(ResilienceConfig::default(), transport.clone());
    client.logout();

    // Act
    let error = client.executor().execute(ApiRequest::get("a")).await.unwrap_err();

    // Assert
    assert_eq!(error.to_string(), "Authentication error: no valid token");
    assert_eq!(transport.request_count(), 0);
    assert_eq!(client.resilience_stats().retry.total_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_feed_the_circuit_breaker() {
    // Arrange
    let transport = Arc::new(MockHttpTransport::new());
    transport.set_default_response(HttpResponse::with_status(500, "boom"));
    let resilience = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            sliding_window_size: 3,
            minimum_number_of_calls: 3,
            ..Default::default()
        },
        rate_limiter: RateLimiterConfig::disabled(),
        retry: RetryConfig {
            max_attempts: 5,
            wait_duration: Duration::from_millis(10),
            ..Default::default()
        },
    };
    let client = client(resilience, transport.clone());

    // Act
    let result = client.executor().execute(ApiRequest::get("a")).await;

    // Assert: three failures open the circuit and the fourth attempt is rejected
    assert!(matches!(result, Err(GarminError::CircuitOpen { .. })));
    assert_eq!(transport.request_count(), 3);
}
