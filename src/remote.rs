//! Discovery of published patches on an HTML listing page.
//!
//! Patch files are found by matching link file names against a pattern with `from`
//! and `to` captures. Consecutive patches (each `from` equal to the previous `to`)
//! form a group; a client at version V upgrades by applying the group keyed by V.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{Error, IoResultExt, Result};
use crate::version::Version;

/// Matches `patch-<from>-<to>.patch`.
pub const DEFAULT_LINK_PATTERN: &str =
    r"^patch-(?P<from>r?[0-9a-zA-Z_.-]+?)-(?P<to>r?[0-9a-zA-Z_.-]+?)\.patch$";

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid link selector"));

/// One published patch upgrading `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLink {
    pub from: Version,
    pub to: Version,
    pub url: Url,
}

/// Continuous patch chains keyed by the version they start from.
pub type PatchGroups = BTreeMap<Version, Vec<PatchLink>>;

/// The chain to apply from `current`; empty when no update is available.
pub fn chain_for<'a>(groups: &'a PatchGroups, current: &Version) -> &'a [PatchLink] {
    groups.get(current).map(Vec::as_slice).unwrap_or(&[])
}

/// Compile a link pattern, checking it defines the `from` and `to` captures.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern(e.to_string()))?;
    for name in ["from", "to"] {
        if !regex.capture_names().flatten().any(|n| n == name) {
            return Err(Error::InvalidPattern(format!(
                "pattern must define a named group '{name}': {pattern}"
            )));
        }
    }
    Ok(regex)
}

/// Treat the index URL as a directory so relative links resolve below it.
pub fn normalize_index_url(index_url: &str) -> Result<Url> {
    let mut url = Url::parse(index_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Absolute targets of every `<a href>` in `html`. Hrefs that do not form a valid URL
/// are dropped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| match base.join(href) {
            Ok(url) => Some(url),
            Err(err) => {
                debug!("ignoring link {href:?}: {err}");
                None
            }
        })
        .collect()
}

/// Keep links whose file name matches `pattern` from its first character.
pub fn match_links(links: Vec<Url>, pattern: &Regex) -> Result<Vec<PatchLink>> {
    let mut matched = Vec::new();
    for url in links {
        let Some(filename) = file_name(&url) else {
            continue;
        };
        let Some(caps) = pattern.captures(filename) else {
            continue;
        };
        if caps.get(0).is_some_and(|m| m.start() != 0) {
            continue;
        }
        let (Some(from), Some(to)) = (caps.name("from"), caps.name("to")) else {
            continue;
        };
        let from = Version::parse(from.as_str())?;
        let to = Version::parse(to.as_str())?;
        matched.push(PatchLink { from, to, url });
    }
    Ok(matched)
}

/// Sort links by starting version and split them into unbroken chains.
pub fn group_patches(mut links: Vec<PatchLink>) -> PatchGroups {
    links.sort_by(|a, b| a.from.cmp(&b.from));

    let mut groups = PatchGroups::new();
    let mut current: Vec<PatchLink> = Vec::new();
    for link in links {
        if current.last().is_some_and(|last| last.to != link.from) {
            flush_group(&mut groups, &mut current);
        }
        current.push(link);
    }
    flush_group(&mut groups, &mut current);
    groups
}

fn flush_group(groups: &mut PatchGroups, current: &mut Vec<PatchLink>) {
    if let Some(first) = current.first() {
        let key = first.from.clone();
        groups.insert(key, std::mem::take(current));
    }
}

fn file_name(url: &Url) -> Option<&str> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
}

fn local_path(url: &Url) -> Result<PathBuf> {
    url.to_file_path().map_err(|()| Error::Io {
        path: PathBuf::from(url.path()),
        source: io::Error::new(io::ErrorKind::InvalidInput, "not a local file URL"),
    })
}

/// Client for a server publishing patch archives. `file://` URLs are served from disk.
#[derive(Clone, Default)]
pub struct PatchServer {
    client: Client,
}

impl PatchServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the listing at `index_url` and group the patches it links to.
    pub async fn find_patch_groups(&self, index_url: &str, pattern: &str) -> Result<PatchGroups> {
        let pattern = compile_pattern(pattern)?;
        let base = normalize_index_url(index_url)?;
        let html = self.fetch_text(&base).await?;
        let links = match_links(extract_links(&html, &base), &pattern)?;
        info!("found {} patches at {base}", links.len());
        Ok(group_patches(links))
    }

    async fn fetch_text(&self, url: &Url) -> Result<String> {
        if url.scheme() == "file" {
            let mut path = local_path(url)?;
            if path.is_dir() {
                path.push("index.html");
            }
            return tokio::fs::read_to_string(&path).await.at(&path);
        }
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Stream the resource at `url` into `dest`.
    pub async fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        if url.scheme() == "file" {
            let source = local_path(url)?;
            tokio::fs::copy(&source, dest).await.at(&source)?;
            return Ok(());
        }

        let mut response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(dest).await.at(dest)?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.at(dest)?;
        }
        file.flush().await.at(dest)
    }

    /// Download every archive of a chain into `dir`, returning local paths in chain order.
    pub async fn download_patches(&self, links: &[PatchLink], dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir).await.at(dir)?;
        let mut paths = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            let name = file_name(&link.url)
                .map(str::to_string)
                .unwrap_or_else(|| format!("patch-{i}"));
            let dest = dir.join(name);
            info!("downloading {} -> {}", link.url, dest.display());
            self.download(&link.url, &dest).await?;
            paths.push(dest);
        }
        Ok(paths)
    }
}

/// Fetch `index_url` with a default client and group the patches it links to.
pub async fn find_patch_groups(index_url: &str, pattern: &str) -> Result<PatchGroups> {
    PatchServer::new().find_patch_groups(index_url, pattern).await
}

/// Download a chain with a default client. See [`PatchServer::download_patches`].
pub async fn download_patches(links: &[PatchLink], dir: &Path) -> Result<Vec<PathBuf>> {
    PatchServer::new().download_patches(links, dir).await
}
