// src/ingest/collectors/feed.rs
//! Syndication feed collector: fetches and parses RSS 2.0 and Atom.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

/// One parsed feed entry, normalized across RSS and Atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Epoch ms; 0 when the feed omits or mangles the date.
    pub published_at: i64,
    /// guid (RSS) or id (Atom); falls back to the link.
    pub guid: String,
}

impl FeedEntry {
    /// The ingestable text shape: title, description, link.
    pub fn raw_text(&self) -> String {
        format!("{}\n\n{}\n\n{}", self.title, self.description, self.link)
    }
}

// ---- RSS 2.0 ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<String>,
}

// ---- Atom -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    #[serde(default)]
    link: Vec<AtomLink>,
    summary: Option<String>,
    content: Option<String>,
    updated: Option<String>,
    published: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

fn parse_rfc2822_ms(ts: &str) -> i64 {
    time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc2822)
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
        .unwrap_or(0)
}

fn parse_rfc3339_ms(ts: &str) -> i64 {
    time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339)
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
        .unwrap_or(0)
}

/// Parse a syndication document, trying RSS first, then Atom.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    if let Ok(rss) = from_str::<Rss>(xml) {
        let entries = rss
            .channel
            .item
            .into_iter()
            .map(|it| {
                let link = it.link.unwrap_or_default();
                FeedEntry {
                    title: it.title.unwrap_or_default(),
                    description: it.description.unwrap_or_default(),
                    published_at: it.pub_date.as_deref().map(parse_rfc2822_ms).unwrap_or(0),
                    guid: it.guid.filter(|g| !g.is_empty()).unwrap_or_else(|| link.clone()),
                    link,
                }
            })
            .collect();
        return Ok(entries);
    }
    // The Atom struct is all-optional, so gate on the root element to keep
    // arbitrary XML from parsing as an empty feed.
    if xml.contains("<feed") {
        if let Ok(atom) = from_str::<AtomFeed>(xml) {
            let entries = atom
                .entry
                .into_iter()
                .map(|it| {
                    let link = it
                        .link
                        .iter()
                        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                        .or(it.link.first())
                        .and_then(|l| l.href.clone())
                        .unwrap_or_default();
                    let ts = it.published.as_deref().or(it.updated.as_deref());
                    FeedEntry {
                        title: it.title.unwrap_or_default(),
                        description: it.summary.or(it.content).unwrap_or_default(),
                        published_at: ts.map(parse_rfc3339_ms).unwrap_or(0),
                        guid: it.id.filter(|g| !g.is_empty()).unwrap_or_else(|| link.clone()),
                        link,
                    }
                })
                .collect();
            return Ok(entries);
        }
    }
    Err(anyhow!("document is neither RSS nor Atom"))
}

/// Fetches feed documents under the 15-second polling timeout.
pub struct FeedCollector {
    http: reqwest::Client,
}

impl FeedCollector {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("signal-refinery/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("build feed http client")?;
        Ok(Self { http })
    }

    pub async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let body = self
            .http
            .get(url)
            .send()
            .await
            .context("feed fetch")?
            .error_for_status()
            .context("feed non-2xx")?
            .text()
            .await
            .context("feed body")?;
        parse_feed(&body)
    }
}
