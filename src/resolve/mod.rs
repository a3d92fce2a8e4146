//! Download-link resolution: one identifier in, a ranked candidate list out.
//!
//! Resolution fans out across every download mirror concurrently, walks each
//! mirror's redirect chain through its [`MirrorProfile`], and merges the
//! results into a single [`DownloadCandidateSet`] ordered by link quality.
//! Collecting from all mirrors before ranking means a slow-but-direct link
//! still beats a fast landing page.
//!
//! [`MirrorProfile`]: crate::mirror::profile::MirrorProfile

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::http::{HttpError, HttpTransport};
use crate::mirror::profile::ProfileSet;
use crate::mirror::{Mirror, MirrorRegistry, MirrorRole};
use crate::parse::compile_static_regex;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex("^[a-fA-F0-9]{32}$"));

/// How a candidate URL relates to the actual file bytes.
///
/// Ranking is by variant: direct links skip a page fetch and a redirect
/// round-trip, so they are always tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Serves file bytes directly (content endpoint or CDN gateway).
    DirectCdn,
    /// An intermediate page or redirect that still needs following.
    MirrorPage,
}

impl LinkType {
    /// Rank for candidate ordering; lower tries first.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::DirectCdn => 1,
            Self::MirrorPage => 5,
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectCdn => write!(f, "direct"),
            Self::MirrorPage => write!(f, "mirror-page"),
        }
    }
}

/// One candidate URL for a file, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink {
    /// Absolute candidate URL.
    pub url: Url,
    /// Host name of the mirror that offered it.
    pub mirror: String,
    pub link_type: LinkType,
    /// Copied from the link type at construction; kept on the struct so a
    /// caller can re-rank a set without consulting the enum.
    pub priority: u8,
}

impl DownloadLink {
    #[must_use]
    pub fn new(url: Url, mirror: &str, link_type: LinkType) -> Self {
        Self {
            url,
            mirror: mirror.to_string(),
            link_type,
            priority: link_type.priority(),
        }
    }
}

impl std::fmt::Display for DownloadLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, via {})", self.url, self.link_type, self.mirror)
    }
}

/// Ranked, deduplicated candidates for one identifier. Immutable once built;
/// retrieval walks it front to back.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadCandidateSet {
    /// Normalized (lowercase) identifier the set was resolved for.
    pub identifier: String,
    candidates: Vec<DownloadLink>,
}

impl DownloadCandidateSet {
    #[must_use]
    pub fn new(identifier: String, candidates: Vec<DownloadLink>) -> Self {
        Self {
            identifier,
            candidates,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DownloadLink> {
        self.candidates.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<DownloadLink> {
        self.candidates
    }
}

/// What one download mirror contributed to a resolution pass.
#[derive(Debug, Clone)]
pub struct ResolveAttempt {
    /// Mirror host name.
    pub mirror: String,
    /// Links it offered, or why it offered none.
    pub detail: String,
}

impl std::fmt::Display for ResolveAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.mirror, self.detail)
    }
}

/// Resolution failure. Per-mirror problems never surface individually;
/// only the whole-pass outcome does, carrying every mirror's story.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("identifier {input:?} is not a 32-character hex digest")]
    InvalidIdentifier { input: String },

    #[error("no download candidates for {identifier} ({} mirrors tried)", attempts.len())]
    NoCandidates {
        identifier: String,
        attempts: Vec<ResolveAttempt>,
    },
}

impl ResolveError {
    #[must_use]
    pub fn invalid_identifier(input: &str) -> Self {
        Self::InvalidIdentifier {
            input: input.to_string(),
        }
    }

    #[must_use]
    pub fn no_candidates(identifier: &str, attempts: Vec<ResolveAttempt>) -> Self {
        Self::NoCandidates {
            identifier: identifier.to_string(),
            attempts,
        }
    }
}

/// Fans resolution out over the download mirrors and merges the results.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    http: HttpTransport,
    registry: Arc<MirrorRegistry>,
    profiles: Arc<ProfileSet>,
    timeout: Duration,
}

impl LinkResolver {
    #[must_use]
    pub fn new(
        http: HttpTransport,
        registry: Arc<MirrorRegistry>,
        profiles: Arc<ProfileSet>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            registry,
            profiles,
            timeout,
        }
    }

    /// Resolves every download mirror's candidates for one identifier.
    ///
    /// All mirrors are queried concurrently; each mirror's health stats are
    /// updated from its own outcome. Candidates are merged, deduplicated by
    /// URL, and ranked direct links first. Within a rank, mirrors keep their
    /// health ordering from the registry.
    ///
    /// # Errors
    ///
    /// [`ResolveError::InvalidIdentifier`] if the input is not a 32-char hex
    /// digest; [`ResolveError::NoCandidates`] when every mirror came up
    /// empty, carrying one [`ResolveAttempt`] per mirror.
    #[tracing::instrument(skip(self), fields(identifier = %identifier))]
    pub async fn resolve(&self, identifier: &str) -> Result<DownloadCandidateSet, ResolveError> {
        let identifier = identifier.trim();
        if !IDENTIFIER_RE.is_match(identifier) {
            return Err(ResolveError::invalid_identifier(identifier));
        }
        let identifier = identifier.to_lowercase();

        let mirrors = self.registry.ordered_mirrors(MirrorRole::Download);
        let chains = mirrors
            .iter()
            .map(|mirror| self.resolve_one(mirror, &identifier));
        let outcomes = join_all(chains).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut attempts = Vec::with_capacity(outcomes.len());
        for (mirror, outcome) in mirrors.iter().zip(outcomes) {
            match outcome {
                Ok(links) => {
                    attempts.push(ResolveAttempt {
                        mirror: mirror.name.clone(),
                        detail: if links.is_empty() {
                            "no candidate links".to_string()
                        } else {
                            format!("{} candidate(s)", links.len())
                        },
                    });
                    candidates.extend(
                        links
                            .into_iter()
                            .filter(|link| seen.insert(link.url.clone())),
                    );
                }
                Err(e) => attempts.push(ResolveAttempt {
                    mirror: mirror.name.clone(),
                    detail: e.to_string(),
                }),
            }
        }

        if candidates.is_empty() {
            return Err(ResolveError::no_candidates(&identifier, attempts));
        }

        // Stable sort keeps the registry's mirror-health order within a rank.
        candidates.sort_by_key(|link| link.priority);
        info!(
            identifier = %identifier,
            candidates = candidates.len(),
            mirrors = mirrors.len(),
            "download links resolved"
        );
        Ok(DownloadCandidateSet::new(identifier, candidates))
    }

    /// One mirror's chain walk, with its outcome folded into mirror stats.
    /// Transport success counts as mirror success even when the mirror holds
    /// no copy; the stats track availability, not inventory.
    async fn resolve_one(
        &self,
        mirror: &Mirror,
        identifier: &str,
    ) -> Result<Vec<DownloadLink>, HttpError> {
        let profile = self.profiles.select(mirror);
        debug!(mirror = %mirror.name, profile = profile.name(), "walking download chain");

        let started = Instant::now();
        let outcome = profile
            .resolve_chain(&self.http, mirror, identifier, self.timeout)
            .await;
        self.registry
            .record_outcome(MirrorRole::Download, &mirror.name, outcome.is_ok(), started.elapsed());
        outcome
    }
}
