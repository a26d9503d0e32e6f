use std::time::Duration;

use feed_rs::{model::Feed, parser};
use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{Error, FetchError, Result};

/// Outcome of fetching one source, tagged with the source it came from.
#[derive(Debug)]
pub struct FetchOutcome {
    pub url: String,
    pub result: std::result::Result<Feed, FetchError>,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("RssUpdateNotifier/1.0 (Feed Watcher)")
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch every source concurrently and wait for all of them.
    ///
    /// Returns exactly one outcome per source, in the same order as `urls`.
    /// A failing source never cancels the others.
    pub async fn fetch_all(&self, urls: &[&str]) -> Vec<FetchOutcome> {
        info!("Fetching {} feeds", urls.len());

        let outcomes = join_all(urls.iter().map(|url| async move {
            let result = self.fetch_one(url).await;
            if let Err(e) = &result {
                warn!("Failed to fetch feed {}: {}", url, e);
            }
            FetchOutcome {
                url: url.to_string(),
                result,
            }
        }))
        .await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            "Fetch phase complete: {} succeeded, {} failed",
            outcomes.len() - failed,
            failed
        );
        outcomes
    }

    async fn fetch_one(&self, url: &str) -> std::result::Result<Feed, FetchError> {
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        parser::parse(&bytes[..]).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(title: &str, item_title: &str, link: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0">
                <channel>
                    <title>{title}</title>
                    <link>https://example.com</link>
                    <description>test</description>
                    <item>
                        <title>{item_title}</title>
                        <link>{link}</link>
                    </item>
                </channel>
            </rss>"#
        )
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn title_of(outcome: &FetchOutcome) -> String {
        outcome
            .result
            .as_ref()
            .unwrap()
            .title
            .as_ref()
            .unwrap()
            .content
            .clone()
    }

    #[tokio::test]
    async fn test_outcomes_follow_input_order() {
        let server = MockServer::start().await;
        // The first source answers last; order must still match the input.
        mount(
            &server,
            "/slow.xml",
            ResponseTemplate::new(200)
                .set_body_string(rss("Slow", "Ep1", "https://slow/1"))
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        mount(
            &server,
            "/fast.xml",
            ResponseTemplate::new(200).set_body_string(rss("Fast", "Ep1", "https://fast/1")),
        )
        .await;

        let slow = format!("{}/slow.xml", server.uri());
        let fast = format!("{}/fast.xml", server.uri());
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();

        let outcomes = fetcher.fetch_all(&[&slow, &fast]).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].url, slow);
        assert_eq!(title_of(&outcomes[0]), "Slow");
        assert_eq!(outcomes[1].url, fast);
        assert_eq!(title_of(&outcomes[1]), "Fast");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_others() {
        let server = MockServer::start().await;
        mount(&server, "/broken.xml", ResponseTemplate::new(503)).await;
        mount(
            &server,
            "/ok.xml",
            ResponseTemplate::new(200).set_body_string(rss("Ok", "Ep1", "https://ok/1")),
        )
        .await;

        let broken = format!("{}/broken.xml", server.uri());
        let ok = format!("{}/ok.xml", server.uri());
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();

        let outcomes = fetcher.fetch_all(&[&broken, &ok]).await;

        assert!(matches!(
            outcomes[0].result,
            Err(FetchError::HttpStatus(503))
        ));
        assert_eq!(title_of(&outcomes[1]), "Ok");
    }

    #[tokio::test]
    async fn test_unparsable_body_is_parse_error() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/junk",
            ResponseTemplate::new(200).set_body_string("this is not a feed"),
        )
        .await;

        let url = format!("{}/junk", server.uri());
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();

        let outcomes = fetcher.fetch_all(&[&url]).await;
        assert!(matches!(outcomes[0].result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/stalled.xml",
            ResponseTemplate::new(200)
                .set_body_string(rss("Stalled", "Ep1", "https://stalled/1"))
                .set_delay(Duration::from_secs(5)),
        )
        .await;

        let url = format!("{}/stalled.xml", server.uri());
        let fetcher = Fetcher::new(Duration::from_millis(200)).unwrap();

        let outcomes = fetcher.fetch_all(&[&url]).await;
        assert!(matches!(outcomes[0].result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_network_error() {
        let fetcher = Fetcher::new(Duration::from_secs(2)).unwrap();

        let outcomes = fetcher.fetch_all(&["http://127.0.0.1:1/feed.xml"]).await;
        assert!(matches!(outcomes[0].result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn test_no_sources() {
        let fetcher = Fetcher::new(Duration::from_secs(2)).unwrap();
        assert!(fetcher.fetch_all(&[]).await.is_empty());
    }
}
