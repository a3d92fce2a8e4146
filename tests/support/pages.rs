//! Canned mirror pages, file bodies, and engine configs for the
//! wiremock-backed integration tests.
#![allow(dead_code)] // shared by several test binaries; each uses a subset

use std::time::Duration;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bookfetch_core::EngineConfig;

/// One well-formed row in the classic desktop results table. The identifier
/// link sits in the trailing mirrors cell, where the live mirrors put it.
pub fn result_row(author: &str, title: &str, size: &str, ext: &str, md5: &str) -> String {
    format!(
        "<tr><td>7</td><td>{author}</td><td>{title}</td><td>Acme Press</td><td>2015</td>\
         <td>288</td><td>English</td><td>{size}</td><td>{ext}</td>\
         <td><a href=\"book/index.php?md5={md5}\">[1]</a></td></tr>"
    )
}

/// Wraps rows in the table-and-header scaffolding search mirrors serve.
pub fn results_page(rows: &str) -> String {
    format!(
        "<html><body><table rules=\"cols\"><tr><th>ID</th><th>Author</th><th>Title</th>\
         <th>Publisher</th><th>Year</th><th>Pages</th><th>Language</th><th>Size</th>\
         <th>Extension</th><th>Mirrors</th></tr>{rows}</table></body></html>"
    )
}

/// A landing page whose download box points at this server's `get.php`.
pub fn landing_page(identifier: &str) -> String {
    format!(
        "<html><body><div id=\"download\">\
         <h2><a href=\"/get.php?md5={identifier}&amp;key=TESTKEY\">GET</a></h2>\
         </div></body></html>"
    )
}

/// An error page served with status 200, the way overloaded mirrors do it.
/// Carries no results table, so it must read as a parse failure.
pub fn outage_page() -> String {
    "<html><body><h1>Mirror temporarily unavailable</h1></body></html>".to_string()
}

/// A minimal but recognizable PDF body, padded to the requested extra size.
pub fn pdf_bytes(padding: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.4\n% test fixture\n".to_vec();
    body.resize(body.len() + padding, b'x');
    body.extend_from_slice(b"\n%%EOF\n");
    body
}

/// Mounts the HEAD-then-GET pair a healthy content endpoint answers with:
/// the probe sees the true Content-Length, the GET streams the body.
pub async fn mount_file(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", body.len().to_string().as_str()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// The name the registry gives a mock server: host plus its ephemeral port.
pub fn mirror_name(server: &MockServer) -> String {
    server.address().to_string()
}

/// Engine configuration aimed at mock servers. Timeouts are generous enough
/// for loopback, retries are off so failures advance immediately, and the
/// size floor admits small fixture bodies.
pub fn engine_config(search: &[String], download: &[String]) -> EngineConfig {
    EngineConfig {
        search_mirrors: parse_urls(search),
        download_mirrors: parse_urls(download),
        cache_ttl: Duration::from_secs(300),
        per_attempt_timeout: Duration::from_secs(5),
        search_budget: Duration::from_secs(10),
        retries_per_mirror: 0,
        probe_timeout: Duration::from_secs(5),
        transfer_timeout: Duration::from_secs(10),
        min_file_size: 8,
        max_file_size: 8 * 1024 * 1024,
        ..EngineConfig::default()
    }
}

fn parse_urls(urls: &[String]) -> Vec<Url> {
    urls.iter()
        .map(|u| Url::parse(u).unwrap_or_else(|e| panic!("bad test URL {u}: {e}")))
        .collect()
}
