use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use http::header::{COOKIE, SET_COOKIE};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use signclient_rs::{
    AccountPool, AccountRecord, AccountStatus, AttemptError, ClientError, ClientOptions,
    ClientRequest, HttpTransport, Interceptor, InterceptorError, MetricsCollector, Platform,
    ProxyPool, ProxySelectionStrategy, RequestContext, ResilientClient, TransportError,
    TransportRequest, TransportResponse,
};

type Handler =
    dyn Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Records every request and answers through a closure.
struct StubTransport {
    handler: Box<Handler>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<TransportRequest>>,
}

impl StubTransport {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_delay(Duration::ZERO, handler)
    }

    fn with_delay<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.handler)(call, &request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn respond(request: &TransportRequest, status: u16, body: &'static str) -> TransportResponse {
    TransportResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from_static(body.as_bytes()),
        url: request.url.clone(),
    }
}

fn fast_options() -> ClientOptions {
    ClientOptions {
        max_retries: 3,
        retry_delay_ms: 1,
        ..Default::default()
    }
}

fn client_with(options: ClientOptions, transport: Arc<StubTransport>) -> ResilientClient {
    ResilientClient::builder()
        .with_options(options)
        .with_transport(transport)
        .build()
        .unwrap()
}

fn cookie_of(request: &TransportRequest) -> Option<String> {
    request
        .headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

#[tokio::test]
async fn retry_exhaustion_makes_exactly_max_retries_plus_one_attempts() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 503, "busy")));
    let client = client_with(fast_options(), transport.clone());

    let err = client
        .execute(ClientRequest::get("https://api.example.com/feed"))
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 4);
    let failure = err.failure().expect("retry exhaustion");
    assert_eq!(failure.attempts, 4);
    assert_eq!(failure.last.status(), Some(503));
    assert!(matches!(&failure.last, AttemptError::Status { body, .. } if &body[..] == b"busy"));
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let transport = StubTransport::new(|call, req| match call {
        0 => Err(TransportError::Connect("refused".into())),
        1 => Err(TransportError::Timeout(Duration::from_secs(1))),
        _ => Ok(respond(req, 200, r#"{"ok":true}"#)),
    });
    let client = client_with(fast_options(), transport.clone());

    let response = client
        .execute(ClientRequest::get("https://api.example.com/feed"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.attempts(), 3);
}

#[tokio::test]
async fn fatal_attempts_are_not_retried() {
    let transport = StubTransport::new(|_, _| Err(TransportError::Invalid("bad proxy".into())));
    let client = client_with(fast_options(), transport.clone());

    let err = client
        .execute(ClientRequest::get("https://api.example.com/"))
        .await
        .unwrap_err();
    assert_eq!(transport.calls(), 1);
    assert_eq!(err.failure().unwrap().attempts, 1);
}

#[tokio::test]
async fn duplicates_are_rejected_within_the_window() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, "{}")));
    let options = ClientOptions {
        enable_request_deduplication: true,
        deduplication_cache_expiry_seconds: 1,
        ..fast_options()
    };
    let client = client_with(options, transport.clone());
    let url = "https://api.example.com/detail?id=1";

    client.execute(ClientRequest::get(url)).await.unwrap();
    let second = client.execute(ClientRequest::get(url)).await;
    assert!(matches!(second, Err(ClientError::Duplicate { .. })));
    assert_eq!(transport.calls(), 1);

    client.execute(ClientRequest::post(url)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    client.execute(ClientRequest::get(url)).await.unwrap();
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn concurrency_gate_bounds_in_flight_requests() {
    let transport =
        StubTransport::with_delay(Duration::from_millis(40), |_, req| Ok(respond(req, 200, "{}")));
    let options = ClientOptions {
        max_concurrency: 2,
        ..fast_options()
    };
    let client = Arc::new(client_with(options, transport.clone()));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .execute(ClientRequest::get(format!("https://api.example.com/item/{i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(transport.calls(), 6);
    assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(client.available_permits(), 2);
}

#[tokio::test]
async fn cancellation_aborts_and_releases_the_slot() {
    let transport =
        StubTransport::with_delay(Duration::from_secs(30), |_, req| Ok(respond(req, 200, "{}")));
    let options = ClientOptions {
        max_concurrency: 1,
        ..fast_options()
    };
    let client = client_with(options, transport);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.execute_with_cancel(ClientRequest::get("https://api.example.com/slow"), &cancel),
    )
    .await
    .expect("cancellation should be prompt");
    assert!(matches!(result, Err(ClientError::Cancelled { .. })));
    assert_eq!(client.available_permits(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 500, "")));
    let options = ClientOptions {
        retry_delay_ms: 60_000,
        ..fast_options()
    };
    let client = client_with(options, transport.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = client
        .execute_with_cancel(ClientRequest::get("https://api.example.com/"), &cancel)
        .await;
    assert!(matches!(result, Err(ClientError::Cancelled { .. })));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn set_cookie_is_replayed_to_the_same_domain() {
    let transport = StubTransport::new(|call, req| {
        let mut response = respond(req, 200, "{}");
        if call == 0 {
            response
                .headers
                .append(SET_COOKIE, "a1=from-server; Path=/; HttpOnly".parse().unwrap());
        }
        Ok(response)
    });
    let client = client_with(fast_options(), transport.clone());

    client
        .execute(ClientRequest::get("https://edith.xiaohongshu.com/api/a"))
        .await
        .unwrap();
    client
        .execute(ClientRequest::get("https://edith.xiaohongshu.com/api/b"))
        .await
        .unwrap();
    client
        .execute(ClientRequest::get("https://www.zhihu.com/api"))
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(cookie_of(&seen[0]), None);
    assert_eq!(cookie_of(&seen[1]).as_deref(), Some("a1=from-server"));
    assert_eq!(cookie_of(&seen[2]), None);
}

#[derive(Default)]
struct CountingInterceptor {
    before: AtomicUsize,
    after: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl Interceptor for CountingInterceptor {
    fn before_call(&self, _ctx: &mut RequestContext) -> Result<(), InterceptorError> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Err(InterceptorError("ignored".into()))
    }

    fn after_call(&self, ctx: &RequestContext) -> Result<(), InterceptorError> {
        self.after.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &ctx.error {
            self.errors.lock().unwrap().push(error.clone());
        }
        Ok(())
    }
}

#[tokio::test]
async fn interceptors_run_around_failures_and_errors_do_not_abort() {
    let transport = StubTransport::new(|call, req| match call {
        0 => Ok(respond(req, 200, "{}")),
        _ => Err(TransportError::Connect("down".into())),
    });
    let interceptor = Arc::new(CountingInterceptor::default());
    let metrics = MetricsCollector::new();
    let client = ResilientClient::builder()
        .with_options(ClientOptions {
            max_retries: 0,
            ..fast_options()
        })
        .with_transport(transport)
        .with_interceptor(interceptor.clone())
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    client
        .execute(ClientRequest::get("https://api.example.com/ok"))
        .await
        .unwrap();
    client
        .execute(ClientRequest::get("https://api.example.com/down"))
        .await
        .unwrap_err();

    assert_eq!(interceptor.before.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.after.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.errors.lock().unwrap().len(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.endpoint("GET api.example.com/ok").unwrap().successes, 1);
    assert_eq!(snapshot.endpoint("GET api.example.com/down").unwrap().failures, 1);
}

#[tokio::test]
async fn accounts_rotate_and_bind_proxies() {
    let proxies = Arc::new(ProxyPool::from_strings(
        ProxySelectionStrategy::RoundRobin,
        ["10.0.0.1:8080", "10.0.0.2:8080"],
    ));
    let accounts = Arc::new(AccountPool::new().with_proxy_pool(proxies));
    accounts.add_account(AccountRecord::new("a", Platform::Xhs, "a1=acct-a"));
    accounts.add_account(AccountRecord::new("b", Platform::Xhs, "a1=acct-b"));

    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, r#"{"success":true}"#)));
    let client = ResilientClient::builder()
        .with_options(fast_options())
        .with_transport(transport.clone())
        .with_account_pool(accounts)
        .build()
        .unwrap();

    for _ in 0..3 {
        let response = client
            .execute(ClientRequest::get("https://edith.xiaohongshu.com/api/sns/web/v1/feed").with_account(Platform::Xhs))
            .await
            .unwrap();
        assert!(response.is_successful());
    }

    let seen = transport.seen();
    let cookies: Vec<_> = seen.iter().map(|r| cookie_of(r).unwrap()).collect();
    assert_eq!(cookies, ["a1=acct-a", "a1=acct-b", "a1=acct-a"]);
    let proxies: Vec<_> = seen.iter().map(|r| r.proxy.clone().unwrap().url).collect();
    assert_eq!(proxies[0], "http://10.0.0.1:8080");
    assert_eq!(proxies[1], "http://10.0.0.2:8080");
    assert_eq!(proxies[2], proxies[0]);
    assert_eq!(seen[0].headers["origin"], "https://www.xiaohongshu.com");
}

#[tokio::test]
async fn account_bound_proxy_keeps_credentials() {
    let proxies = Arc::new(ProxyPool::from_strings(
        ProxySelectionStrategy::RoundRobin,
        ["10.0.0.1:8080:user:secret"],
    ));
    let accounts = Arc::new(AccountPool::new().with_proxy_pool(proxies));
    accounts.add_account(AccountRecord::new("a", Platform::Xhs, "a1=acct-a"));

    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, r#"{"success":true}"#)));
    let client = ResilientClient::builder()
        .with_options(fast_options())
        .with_transport(transport.clone())
        .with_account_pool(accounts)
        .build()
        .unwrap();

    for _ in 0..2 {
        client
            .execute(ClientRequest::get("https://edith.xiaohongshu.com/api/sns/web/v2/comment/page").with_account(Platform::Xhs))
            .await
            .unwrap();
    }

    for request in transport.seen() {
        let proxy = request.proxy.unwrap();
        assert_eq!(proxy.url, "http://10.0.0.1:8080");
        let credentials = proxy.credentials.expect("bound proxy lost its credentials");
        assert_eq!(credentials.username, "user");
        assert_eq!(credentials.password, "secret");
    }
}

#[tokio::test]
async fn rate_limited_account_leaves_rotation() {
    let accounts = Arc::new(AccountPool::new());
    accounts.add_account(AccountRecord::new("a", Platform::Douyin, "sessionid=a"));
    accounts.add_account(AccountRecord::new("b", Platform::Douyin, "sessionid=b"));

    let transport = StubTransport::new(|_, req| {
        if cookie_of(req).as_deref() == Some("sessionid=a") {
            Ok(respond(req, 429, ""))
        } else {
            Ok(respond(req, 200, r#"{"status_code":0}"#))
        }
    });
    let client = ResilientClient::builder()
        .with_options(ClientOptions {
            max_retries: 0,
            ..fast_options()
        })
        .with_transport(transport)
        .with_account_pool(accounts.clone())
        .build()
        .unwrap();

    let url = "https://www.douyin.com/aweme/v1/web/aweme/detail/";
    client
        .execute(ClientRequest::get(url).with_account(Platform::Douyin))
        .await
        .unwrap_err();

    let a = accounts
        .accounts(Platform::Douyin)
        .into_iter()
        .find(|r| r.id == "a")
        .unwrap();
    assert_eq!(a.status, AccountStatus::RateLimited);

    let response = client
        .execute(ClientRequest::get(url).with_account(Platform::Douyin))
        .await
        .unwrap();
    assert!(response.is_successful());
}

#[tokio::test]
async fn retry_after_429_moves_to_next_account() {
    let accounts = Arc::new(AccountPool::new());
    accounts.add_account(AccountRecord::new("a", Platform::Bilibili, "SESSDATA=a"));
    accounts.add_account(AccountRecord::new("b", Platform::Bilibili, "SESSDATA=b"));

    let transport = StubTransport::new(|_, req| {
        if cookie_of(req).as_deref() == Some("SESSDATA=a") {
            Ok(respond(req, 429, r#"{"code":-412}"#))
        } else {
            Ok(respond(req, 200, r#"{"code":0}"#))
        }
    });
    let client = ResilientClient::builder()
        .with_options(ClientOptions {
            max_retries: 1,
            ..fast_options()
        })
        .with_transport(transport.clone())
        .with_account_pool(accounts.clone())
        .build()
        .unwrap();

    let response = client
        .execute(
            ClientRequest::get("https://api.bilibili.com/x/space/wbi/acc/info?mid=2")
                .with_account(Platform::Bilibili),
        )
        .await
        .unwrap();
    assert!(response.is_successful());
    assert_eq!(response.attempts(), 2);

    let cookies: Vec<_> = transport.seen().iter().map(|r| cookie_of(r).unwrap()).collect();
    assert_eq!(cookies, ["SESSDATA=a", "SESSDATA=b"]);
    assert_eq!(accounts.active_count(Platform::Bilibili), 1);
}

#[tokio::test]
async fn missing_account_fails_fast() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, "{}")));
    let client = ResilientClient::builder()
        .with_options(fast_options())
        .with_transport(transport.clone())
        .with_account_pool(Arc::new(AccountPool::new()))
        .build()
        .unwrap();

    let err = client
        .execute(ClientRequest::get("https://www.zhihu.com/api/v4/me").with_account(Platform::Zhihu))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoAccountAvailable(Platform::Zhihu)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn unreachable_pool_proxy_is_removed_and_rotated() {
    let transport = StubTransport::new(|_, req| match &req.proxy {
        Some(proxy) if proxy.url == "http://10.0.0.1:8080" => {
            Err(TransportError::Connect("proxy refused".into()))
        }
        _ => Ok(respond(req, 200, "{}")),
    });
    let proxies = Arc::new(ProxyPool::from_strings(
        ProxySelectionStrategy::RoundRobin,
        ["10.0.0.1:8080", "10.0.0.2:8080"],
    ));
    let client = ResilientClient::builder()
        .with_options(fast_options())
        .with_transport(transport.clone())
        .with_proxy_pool(proxies.clone())
        .build()
        .unwrap();

    let response = client
        .execute(ClientRequest::get("https://api.example.com/"))
        .await
        .unwrap();
    assert_eq!(response.attempts(), 2);
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies.get_next().unwrap().url, "http://10.0.0.2:8080");
}

#[tokio::test]
async fn empty_proxy_pool_is_reported() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, "{}")));
    let client = ResilientClient::builder()
        .with_options(fast_options())
        .with_transport(transport)
        .with_proxy_pool(Arc::new(ProxyPool::default()))
        .build()
        .unwrap();

    let err = client
        .execute(ClientRequest::get("https://api.example.com/"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoProxyAvailable));
}

#[tokio::test]
async fn platform_predicate_and_json_decoding() {
    let transport = StubTransport::new(|_, req| {
        Ok(respond(req, 200, r#"{"code":-412,"message":"request was banned"}"#))
    });
    let client = client_with(fast_options(), transport);

    let response = client
        .execute(ClientRequest::get("https://api.bilibili.com/x/web-interface/nav").for_platform(Platform::Bilibili))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(!response.is_successful());

    let value: Value = client
        .execute_as_json(ClientRequest::get("https://api.bilibili.com/x/other"))
        .await
        .unwrap();
    assert_eq!(value["code"], -412);
}

#[tokio::test]
async fn json_payload_is_sent_with_content_type() {
    let transport = StubTransport::new(|_, req| Ok(respond(req, 200, "{}")));
    let client = client_with(fast_options(), transport.clone());

    client
        .execute(
            ClientRequest::post("https://edith.xiaohongshu.com/api/sns/web/v1/feed")
                .with_json(&serde_json::json!({"source_note_id": "abc"}))
                .unwrap(),
        )
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(seen[0].body.as_deref(), Some(br#"{"source_note_id":"abc"}"#.as_slice()));
    assert!(seen[0].headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
}
