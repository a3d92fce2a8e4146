//! Engine-level retrieval tests against mock mirrors: size gates, content
//! sniffing, candidate failover, link resolution, and progress reporting.

mod support;

use bookfetch_core::retrieve::RejectReason;
use bookfetch_core::{
    DownloadCandidateSet, DownloadLink, Engine, LinkType, MirrorRole, ResolveError,
    RetrievalConstraints, RetrieveError, SniffedKind, progress_channel,
};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::pages;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

const MD5: &str = "0123456789abcdef0123456789abcdef";

fn engine_for(server: &MockServer) -> Engine {
    Engine::new(pages::engine_config(&[server.uri()], &[server.uri()])).unwrap()
}

fn direct_link(server: &MockServer, route: &str) -> DownloadLink {
    let url = Url::parse(&format!("{}{route}", server.uri())).unwrap();
    DownloadLink::new(url, &pages::mirror_name(server), LinkType::DirectCdn)
}

fn direct_candidate(server: &MockServer, route: &str) -> DownloadCandidateSet {
    DownloadCandidateSet::new(MD5.to_string(), vec![direct_link(server, route)])
}

#[tokio::test]
async fn test_retrieve_validates_and_names_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let body = pages::pdf_bytes(256);
    Mock::given(method("HEAD"))
        .and(path("/get.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", body.len().to_string().as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    "attachment; filename=\"fluent-python.pdf\"",
                )
                .set_body_bytes(body.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let candidates = direct_candidate(&server, "/get.php?md5=abc&key=1");
    let blob = engine.retrieve_file(&candidates).await.unwrap();

    assert_eq!(blob.bytes, body);
    assert_eq!(blob.filename, "fluent-python.pdf");
    assert_eq!(blob.sniffed, SniffedKind::Pdf);
    assert_eq!(blob.declared_size, Some(body.len() as u64));
    assert_eq!(blob.source.url.path(), "/get.php");

    let snap = engine.performance_snapshot();
    assert_eq!(snap.downloads_total, 1);
    assert_eq!(snap.bytes_downloaded, body.len() as u64);
    assert!(snap.avg_download_speed > 0.0);
}

#[tokio::test]
async fn test_declared_oversize_never_fetches_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    // 200 MiB declared against the 8 MiB test ceiling. The GET mock must
    // never fire: the probe alone is enough to rule the candidate out.
    Mock::given(method("HEAD"))
        .and(path("/big.pdf"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "209715200"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/big.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let err = engine
        .retrieve_file(&direct_candidate(&server, "/big.pdf"))
        .await
        .unwrap_err();

    match &err {
        RetrieveError::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(
                attempts[0].reason,
                RejectReason::DeclaredTooLarge {
                    declared: 209_715_200,
                    limit: 8 * 1024 * 1024,
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.performance_snapshot().bytes_downloaded, 0);
}

#[tokio::test]
async fn test_probe_failure_advances_to_next_candidate() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/dead"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dead"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;
    let body = pages::pdf_bytes(64);
    pages::mount_file(&server, "/alive.pdf", &body).await;

    let engine = engine_for(&server);
    let candidates = DownloadCandidateSet::new(
        MD5.to_string(),
        vec![
            direct_link(&server, "/dead"),
            direct_link(&server, "/alive.pdf"),
        ],
    );
    let blob = engine.retrieve_file(&candidates).await.unwrap();

    assert_eq!(blob.source.url.path(), "/alive.pdf");
    // No Content-Disposition on the fallback, so the name comes from the URL.
    assert_eq!(blob.filename, "alive.pdf");
    assert_eq!(blob.bytes, body);
}

#[tokio::test]
async fn test_html_body_is_rejected_as_wrong_type() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    pages::mount_file(&server, "/get.php", pages::outage_page().as_bytes()).await;

    let engine = engine_for(&server);
    let err = engine
        .retrieve_file(&direct_candidate(&server, "/get.php"))
        .await
        .unwrap_err();

    match &err {
        RetrieveError::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(
                attempts[0].reason,
                RejectReason::WrongContentType {
                    sniffed: SniffedKind::Html,
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lying_content_length_aborts_midstream() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    // The probe declares 64 bytes, which passes the declared gates; the
    // body then keeps going past the ceiling and must be cut off.
    let body = pages::pdf_bytes(4096);
    Mock::given(method("HEAD"))
        .and(path("/liar.pdf"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "64"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/liar.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let constraints = RetrievalConstraints {
        min_size: 8,
        max_size: 1024,
        allowed_extensions: vec!["pdf".to_string()],
    };
    let err = engine
        .retrieve_file_with(&direct_candidate(&server, "/liar.pdf"), &constraints, None)
        .await
        .unwrap_err();

    match &err {
        RetrieveError::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 1);
            match &attempts[0].reason {
                RejectReason::ObservedTooLarge { received, limit } => {
                    assert!(*received > 1024, "abort happened at {received} bytes");
                    assert_eq!(*limit, 1024);
                }
                other => panic!("unexpected reject reason: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The partial transfer still counts toward the byte ledger.
    let snap = engine.performance_snapshot();
    assert_eq!(snap.downloads_total, 1);
    assert!(snap.bytes_downloaded > 0);
}

#[tokio::test]
async fn test_short_body_under_floor_is_rejected() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let body = pages::pdf_bytes(8);
    Mock::given(method("HEAD"))
        .and(path("/stub.pdf"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "2048"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stub.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let constraints = RetrievalConstraints {
        min_size: 1024,
        max_size: 8 * 1024 * 1024,
        allowed_extensions: vec!["pdf".to_string()],
    };
    let err = engine
        .retrieve_file_with(&direct_candidate(&server, "/stub.pdf"), &constraints, None)
        .await
        .unwrap_err();

    match &err {
        RetrieveError::Exhausted { attempts } => {
            assert_eq!(
                attempts[0].reason,
                RejectReason::ObservedTooSmall {
                    observed: body.len() as u64,
                    limit: 1024,
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_exhaustion_reports_each_candidate_in_order() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/second"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let candidates = DownloadCandidateSet::new(
        MD5.to_string(),
        vec![
            direct_link(&server, "/first"),
            direct_link(&server, "/second"),
        ],
    );
    let err = engine.retrieve_file(&candidates).await.unwrap_err();

    match &err {
        RetrieveError::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert!(attempts[0].url.contains("/first"));
            assert_eq!(attempts[0].reason, RejectReason::Status(404));
            assert!(attempts[1].url.contains("/second"));
            assert_eq!(attempts[1].reason, RejectReason::Status(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_candidate_set_short_circuits() {
    let mirrors = vec!["http://127.0.0.1:1".to_string()];
    let engine = Engine::new(pages::engine_config(&mirrors, &mirrors)).unwrap();
    let candidates = DownloadCandidateSet::new(MD5.to_string(), Vec::new());
    let err = engine.retrieve_file(&candidates).await.unwrap_err();
    assert!(matches!(err, RetrieveError::NoCandidates));
}

#[tokio::test]
async fn test_invalid_identifier_rejected_before_any_lookup() {
    let mirrors = vec!["http://127.0.0.1:1".to_string()];
    let engine = Engine::new(pages::engine_config(&mirrors, &mirrors)).unwrap();
    let err = engine
        .resolve_download_links("not-a-hash")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::InvalidIdentifier { .. }));
}

#[tokio::test]
async fn test_unreachable_download_mirror_reports_attempt() {
    // Port 1 refuses connections immediately, so resolution fails on
    // transport rather than content.
    let mirrors = vec!["http://127.0.0.1:1".to_string()];
    let engine = Engine::new(pages::engine_config(&mirrors, &mirrors)).unwrap();
    let err = engine.resolve_download_links(MD5).await.unwrap_err();

    match &err {
        ResolveError::NoCandidates {
            identifier,
            attempts,
        } => {
            assert_eq!(identifier, MD5);
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].mirror, "127.0.0.1:1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_resolve_then_retrieve_full_chain() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path(format!("/main/{MD5}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(pages::landing_page(MD5)))
        .expect(1)
        .mount(&server)
        .await;
    let body = pages::pdf_bytes(512);
    Mock::given(method("HEAD"))
        .and(path("/get.php"))
        .and(query_param("md5", MD5))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", body.len().to_string().as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get.php"))
        .and(query_param("key", "TESTKEY"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Content-Disposition",
                    "attachment; filename=\"deep-learning.pdf\"",
                )
                .set_body_bytes(body.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let candidates = engine.resolve_download_links(MD5).await.unwrap();
    assert_eq!(candidates.len(), 1);
    let link = candidates.iter().next().unwrap();
    assert_eq!(link.link_type, LinkType::DirectCdn);

    let blob = engine.retrieve_file(&candidates).await.unwrap();
    assert_eq!(blob.filename, "deep-learning.pdf");
    assert_eq!(blob.bytes, body);

    let reports = engine.mirror_reports();
    let download = reports
        .iter()
        .find(|r| r.role == MirrorRole::Download && r.name == pages::mirror_name(&server))
        .unwrap();
    assert_eq!(download.successes, 1);
    assert_eq!(download.failures, 0);
    assert_eq!(engine.performance_snapshot().downloads_total, 1);
}

#[tokio::test]
async fn test_resolver_falls_back_to_detail_pattern() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path(format!("/main/{MD5}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let detail = r#"<html><body><h1>Detail</h1><a href="/files/book.pdf">GET</a></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/book/index.php"))
        .and(query_param("md5", MD5))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail))
        .expect(1)
        .mount(&server)
        .await;
    let body = pages::pdf_bytes(128);
    pages::mount_file(&server, "/files/book.pdf", &body).await;

    let engine = engine_for(&server);
    let candidates = engine.resolve_download_links(MD5).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates.iter().next().unwrap().url.path(), "/files/book.pdf");

    let blob = engine.retrieve_file(&candidates).await.unwrap();
    assert_eq!(blob.filename, "book.pdf");
    assert_eq!(blob.bytes, body);
}

#[tokio::test]
async fn test_progress_events_track_the_transfer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let body = pages::pdf_bytes(4096);
    pages::mount_file(&server, "/cdn/file.pdf", &body).await;

    let engine = engine_for(&server);
    let constraints = RetrievalConstraints {
        min_size: 8,
        max_size: 8 * 1024 * 1024,
        allowed_extensions: vec!["pdf".to_string()],
    };
    let (sender, mut receiver) = progress_channel(64);
    let blob = engine
        .retrieve_file_with(
            &direct_candidate(&server, "/cdn/file.pdf"),
            &constraints,
            Some(&sender),
        )
        .await
        .unwrap();
    drop(sender);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    assert!(!events.is_empty());
    assert!(events[0].url.contains("/cdn/file.pdf"));
    for pair in events.windows(2) {
        assert!(pair[0].bytes_received <= pair[1].bytes_received);
    }
    let last = events.last().unwrap();
    assert_eq!(last.bytes_received, body.len() as u64);
    assert_eq!(last.total_bytes, Some(body.len() as u64));
    assert_eq!(blob.bytes, body);
}
