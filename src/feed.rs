use feed_rs::model::{Entry, Feed};

use crate::error::{Error, Result};

/// Normalized view of one fetched feed at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    /// Source URL the document was fetched from
    pub source: String,
    /// Feed-level title; the identity key for stored state
    pub title: String,
    pub latest_item_title: String,
    /// Change-detection key
    pub latest_item_link: String,
}

/// Extract the feed title and the first entry's title and link.
///
/// The first entry in document order is taken as the most recent one.
/// Missing pieces are structural problems with the feed, so they are
/// reported as [`Error::MalformedFeed`] instead of being skipped.
pub fn normalize(source: &str, feed: &Feed) -> Result<FeedSnapshot> {
    let title = feed
        .title
        .as_ref()
        .map(|t| t.content.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::malformed(source, "feed has no channel title"))?;

    let entry = feed
        .entries
        .first()
        .ok_or_else(|| Error::malformed(source, "feed has no entries"))?;

    let latest_item_title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::malformed(source, "latest entry has no title"))?;

    let latest_item_link = primary_link(entry)
        .map(|href| href.trim())
        .filter(|href| !href.is_empty())
        .ok_or_else(|| Error::malformed(source, "latest entry has no link"))?;

    Ok(FeedSnapshot {
        source: source.to_string(),
        title: title.to_string(),
        latest_item_title: latest_item_title.to_string(),
        latest_item_link: latest_item_link.to_string(),
    })
}

/// The entry's own page: the first link without a `rel` or with
/// `rel="alternate"`, else whatever link comes first. Atom entries often
/// list `replies`/`edit` links ahead of the alternate one.
fn primary_link(entry: &Entry) -> Option<&str> {
    entry
        .links
        .iter()
        .find(|link| {
            link.rel
                .as_deref()
                .map_or(true, |rel| rel.eq_ignore_ascii_case("alternate"))
        })
        .or_else(|| entry.links.first())
        .map(|link| link.href.as_str())
}
