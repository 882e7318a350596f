// src/ingest/providers/rss.rs
//! RSS 2.0 feed shapes shared by the XML providers.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::{IngestError, Result};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
pub struct RssItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator")]
    pub creator: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    pub content_encoded: Option<String>,
    #[serde(rename = "category", default)]
    pub categories: Vec<String>,
}

impl RssItem {
    /// Stable key for id hashing: guid, then link, then title.
    pub fn key(&self) -> Option<&str> {
        self.guid
            .as_deref()
            .or(self.link.as_deref())
            .or(self.title.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.pub_date
            .as_deref()
            .and_then(parse_rfc2822)
            .unwrap_or_else(Utc::now)
    }
}

/// Parse an RSS document into its items, in feed order.
pub fn parse_feed(source: &str, xml: &str) -> Result<Vec<RssItem>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).map_err(|e| IngestError::parse(source, e))?;
    Ok(rss.channel.item)
}

pub fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    let secs = odt.to_offset(UtcOffset::UTC).unix_timestamp();
    DateTime::<Utc>::from_timestamp(secs, 0)
}

// Feeds routinely leak HTML entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
