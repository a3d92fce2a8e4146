//! Per-mirror-family behavior: query URL construction, result-table layout,
//! and the download redirect chain.
//!
//! Mirror families differ in page structure but not in spirit. Each family
//! gets one [`MirrorProfile`] implementation; the [`ProfileSet`] picks the
//! first profile claiming a mirror and falls back to a generic profile that
//! handles the common layout. Adding a mirror family means adding a profile
//! here plus a URL in configuration, nothing else.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::http::{HttpError, HttpTransport};
use crate::mirror::Mirror;
use crate::parse::{LIBGEN_TABLE_LAYOUT, ResultTableLayout, compile_static_selector};
use crate::record::SearchQuery;
use crate::resolve::{DownloadLink, LinkType};

/// Mirrors cap result counts per request; asking for more is ignored.
const MAX_RESULTS_PER_REQUEST: usize = 100;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));
static DOWNLOAD_BOX_SEL: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("#download a[href]"));

/// File extensions that mark a URL as pointing straight at content.
const DIRECT_FILE_EXTENSIONS: [&str; 6] = [".pdf", ".epub", ".mobi", ".azw3", ".djvu", ".djv"];

/// Strategy object for one mirror family.
///
/// Implementations are stateless; everything they need arrives per call.
/// `resolve_chain` performs the family's lookup-page fetch(es) and link
/// extraction; any key-bearing redirect behind an extracted URL is followed
/// later, at retrieval time.
#[async_trait]
pub trait MirrorProfile: Send + Sync {
    /// Family name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this profile handles the given mirror.
    fn matches(&self, mirror: &Mirror) -> bool;

    /// Builds the search URL for a query against this mirror.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the mirror base URL cannot absorb the
    /// search path, which indicates a misconfigured base.
    fn search_url(&self, mirror: &Mirror, query: &SearchQuery) -> Result<Url, url::ParseError> {
        let mut url = mirror.base_url.join("search.php")?;
        let capped = query.max_results.min(MAX_RESULTS_PER_REQUEST);
        url.query_pairs_mut()
            .append_pair("req", &query.text)
            .append_pair("lg_topic", "libgen")
            .append_pair("open", "0")
            .append_pair("view", "simple")
            .append_pair("res", &capped.to_string())
            .append_pair("phrase", "1")
            .append_pair("column", "def");
        Ok(url)
    }

    /// Layout of this family's results table.
    fn result_layout(&self) -> &ResultTableLayout {
        &LIBGEN_TABLE_LAYOUT
    }

    /// Walks the family's lookup chain for one identifier and returns every
    /// candidate link found on this mirror. An empty vector means the mirror
    /// answered but offered nothing; transport and status failures bubble up
    /// so the caller can record a per-mirror reason.
    async fn resolve_chain(
        &self,
        http: &HttpTransport,
        mirror: &Mirror,
        identifier: &str,
        timeout: Duration,
    ) -> Result<Vec<DownloadLink>, HttpError>;
}

/// Classifies an extracted link. Key-bearing content endpoints and CDN
/// gateways count as direct; detail and landing pages need another hop and
/// rank below them. Links that look like neither are dropped.
fn classify_link(url: &Url, text: &str) -> Option<LinkType> {
    let path = url.path().to_lowercase();
    let host = url.host_str().unwrap_or("").to_lowercase();

    if path.contains("get.php")
        || host.contains("ipfs")
        || host.contains("cloudflare")
        || DIRECT_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    {
        return Some(LinkType::DirectCdn);
    }
    if path.contains("ads.php")
        || path.contains("/main/")
        || path.contains("/book/")
        || path.contains("index.php")
    {
        return Some(LinkType::MirrorPage);
    }

    // Fall back on the anchor text mirrors put on their download buttons.
    let text = text.trim().to_lowercase();
    if text == "get" || text.contains("download") || text.contains("mirror") {
        return Some(LinkType::DirectCdn);
    }
    None
}

/// Scans a fetched page for candidate links with the given selector,
/// absolutizing relative hrefs against the page URL.
fn extract_links(
    html: &str,
    page_url: &Url,
    mirror: &Mirror,
    selector: &Selector,
) -> Vec<DownloadLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    for anchor in document.select(selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = page_url.join(href) else {
            debug!(mirror = %mirror.name, href, "skipping unjoinable link");
            continue;
        };
        let text: String = anchor.text().collect::<Vec<_>>().join(" ");
        if let Some(link_type) = classify_link(&absolute, &text) {
            links.push(DownloadLink::new(absolute, &mirror.name, link_type));
        }
    }
    links
}

/// Classic desktop mirror family (libgen.*): `search.php` queries and
/// `book/index.php?md5=` detail pages listing gateway mirrors.
#[derive(Debug, Default)]
pub struct LibgenProfile;

#[async_trait]
impl MirrorProfile for LibgenProfile {
    fn name(&self) -> &'static str {
        "libgen"
    }

    fn matches(&self, mirror: &Mirror) -> bool {
        let host = mirror.base_url.host_str().unwrap_or("");
        host.contains("libgen") || host.contains("gen.lib")
    }

    async fn resolve_chain(
        &self,
        http: &HttpTransport,
        mirror: &Mirror,
        identifier: &str,
        timeout: Duration,
    ) -> Result<Vec<DownloadLink>, HttpError> {
        let Some(lookup) = join_lookup(mirror, &format!("book/index.php?md5={identifier}")) else {
            return Ok(Vec::new());
        };
        let page = http.get_text(&lookup, timeout).await?;
        let links = extract_links(&page, &lookup, mirror, &ANCHOR_SEL);
        debug!(
            mirror = %mirror.name,
            identifier,
            links = links.len(),
            "resolved detail page"
        );
        Ok(dedupe_by_url(links))
    }
}

/// Landing-page mirror family (library.lol style): one `main/<hash>` page
/// with a download box holding the direct GET link plus gateway alternates.
#[derive(Debug, Default)]
pub struct LandingProfile;

#[async_trait]
impl MirrorProfile for LandingProfile {
    fn name(&self) -> &'static str {
        "landing"
    }

    fn matches(&self, mirror: &Mirror) -> bool {
        let host = mirror.base_url.host_str().unwrap_or("");
        host.contains("library.lol") || host.contains("books.ms")
    }

    async fn resolve_chain(
        &self,
        http: &HttpTransport,
        mirror: &Mirror,
        identifier: &str,
        timeout: Duration,
    ) -> Result<Vec<DownloadLink>, HttpError> {
        let Some(lookup) = join_lookup(mirror, &format!("main/{identifier}")) else {
            return Ok(Vec::new());
        };
        let page = http.get_text(&lookup, timeout).await?;

        // The download box is authoritative when present; a full-page scan
        // on these mirrors picks up navigation junk.
        let mut links = extract_links(&page, &lookup, mirror, &DOWNLOAD_BOX_SEL);
        if links.is_empty() {
            links = extract_links(&page, &lookup, mirror, &ANCHOR_SEL);
        }
        debug!(
            mirror = %mirror.name,
            identifier,
            links = links.len(),
            "resolved landing page"
        );
        Ok(dedupe_by_url(links))
    }
}

/// Fallback for mirrors no specific profile claims. Tries the landing-page
/// pattern first, then the detail-page pattern, taking the first page that
/// yields links.
#[derive(Debug, Default)]
pub struct GenericProfile;

#[async_trait]
impl MirrorProfile for GenericProfile {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn matches(&self, _mirror: &Mirror) -> bool {
        true
    }

    async fn resolve_chain(
        &self,
        http: &HttpTransport,
        mirror: &Mirror,
        identifier: &str,
        timeout: Duration,
    ) -> Result<Vec<DownloadLink>, HttpError> {
        let patterns = [
            format!("main/{identifier}"),
            format!("book/index.php?md5={identifier}"),
        ];

        let mut last_error = None;
        for pattern in patterns {
            let Some(lookup) = join_lookup(mirror, &pattern) else {
                continue;
            };
            match http.get_text(&lookup, timeout).await {
                Ok(page) => {
                    let links = extract_links(&page, &lookup, mirror, &ANCHOR_SEL);
                    if !links.is_empty() {
                        return Ok(dedupe_by_url(links));
                    }
                    debug!(mirror = %mirror.name, url = %lookup, "page had no candidate links");
                }
                Err(e) => {
                    debug!(mirror = %mirror.name, url = %lookup, error = %e, "lookup pattern failed");
                    last_error = Some(e);
                }
            }
        }

        // Every pattern errored: surface the last transport failure. If any
        // page loaded but held no links, that is an empty (not failed) chain.
        match last_error {
            Some(error) => Err(error),
            None => Ok(Vec::new()),
        }
    }
}

/// Joins a lookup path onto a mirror base. Bases are validated at config
/// time, so a failure here means a degenerate URL; the mirror then simply
/// contributes no candidates.
fn join_lookup(mirror: &Mirror, path: &str) -> Option<Url> {
    match mirror.base_url.join(path) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(mirror = %mirror.name, path, error = %e, "mirror base cannot absorb lookup path");
            None
        }
    }
}

fn dedupe_by_url(links: Vec<DownloadLink>) -> Vec<DownloadLink> {
    let mut seen = std::collections::HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}

/// Ordered set of known profiles with a guaranteed fallback.
pub struct ProfileSet {
    profiles: Vec<Arc<dyn MirrorProfile>>,
    fallback: Arc<dyn MirrorProfile>,
}

impl ProfileSet {
    /// Registry with every built-in family, specific families first.
    #[must_use]
    pub fn with_default_profiles() -> Self {
        Self {
            profiles: vec![Arc::new(LibgenProfile), Arc::new(LandingProfile)],
            fallback: Arc::new(GenericProfile),
        }
    }

    /// Picks the profile for a mirror: first specific match, else generic.
    #[must_use]
    pub fn select(&self, mirror: &Mirror) -> Arc<dyn MirrorProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.matches(mirror))
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }
}

impl std::fmt::Debug for ProfileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.profiles.iter().map(|p| p.name()).collect();
        f.debug_struct("ProfileSet")
            .field("profiles", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::with_default_profiles()
    }
}
