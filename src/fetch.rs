//! Page retrieval.
//!
//! The pipeline talks to the network only through [`PageFetcher`], so the
//! transport can be swapped (a headless browser, a test stub) without
//! touching the scraping stages.
//!
//! # Rendering
//!
//! Some listings only show their content after scripts run. Instead of
//! sleeping a fixed delay, [`PageFetcher::render`] waits for a target
//! selector via [`wait_until`], polling until it appears or the request's
//! timeout elapses. The plain HTTP fetcher polls by re-fetching; it cannot
//! operate dropdowns and reports so through [`RenderedPage::option_selected`].

use crate::error::FetchError;
use reqwest::Client;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, instrument};
use url::Url;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// What a rendered load must wait for before its markup is read.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Poll until this selector matches.
    pub wait_for: Option<Selector>,
    /// Visible text of a dropdown option to pick once loaded.
    pub select_option: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            wait_for: None,
            select_option: None,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub body: String,
    /// Whether the requested dropdown option was selected.
    pub option_selected: bool,
}

/// Source of page bodies.
pub trait PageFetcher {
    /// Fetch `url`, returning the body of a 2xx response.
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;

    /// Load `url` and wait for `request.wait_for` to appear.
    ///
    /// Fails with [`FetchError::Timeout`] if the selector never matches.
    async fn render(&self, url: &Url, request: &RenderRequest) -> Result<RenderedPage, FetchError> {
        let body = match &request.wait_for {
            None => self.fetch(url).await?,
            Some(selector) => wait_until(request.timeout, request.poll_interval, move || async move {
                let body = self.fetch(url).await?;
                let ready = Html::parse_document(&body).select(selector).next().is_some();
                Ok::<_, FetchError>(ready.then_some(body))
            })
            .await?
            .ok_or(FetchError::Timeout)?,
        };
        Ok(RenderedPage {
            body,
            option_selected: false,
        })
    }
}

/// Poll `check` every `interval` until it yields a value or `timeout` elapses.
///
/// The check always runs at least once. A check still pending at the
/// deadline is dropped. Check errors end the wait immediately; `Ok(None)`
/// means the deadline passed without a value.
pub async fn wait_until<T, E, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match timeout_at(deadline, check()).await {
            Ok(result) => {
                if let Some(value) = result? {
                    return Ok(Some(value));
                }
            }
            Err(_) => {
                debug!(attempts, ?timeout, "Check still pending at deadline");
                return Ok(None);
            }
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(attempts, ?timeout, "Condition not met before deadline");
            return Ok(None);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// [`PageFetcher`] backed by a plain `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    browser_headers: bool,
}

impl HttpFetcher {
    /// Build a fetcher whose every request is bounded by `timeout`.
    ///
    /// With `browser_headers`, requests present a desktop browser
    /// `User-Agent`; some news sites refuse the default one.
    pub fn new(timeout: Duration, browser_headers: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            browser_headers,
        })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let mut request = self.client.get(url.clone());
        if self.browser_headers {
            request = request
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(ACCEPT_LANGUAGE, "zh-HK,zh;q=0.9,en;q=0.8");
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let body = response.text().await.map_err(classify)?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forumdisplay.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>listing</html>"))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), false).unwrap();
        let url = Url::parse(&format!("{}/forumdisplay.php?fid=57", mock_server.uri())).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap(), "<html>listing</html>");
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_http_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), false).unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_browser_headers_are_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&mock_server.uri()).unwrap();
        let browser = HttpFetcher::new(Duration::from_secs(5), true).unwrap();
        assert_eq!(browser.fetch(&url).await.unwrap(), "ok");

        let requests = mock_server.received_requests().await.unwrap();
        let agent = requests[0].headers.get("user-agent").unwrap();
        assert_eq!(agent.to_str().unwrap(), BROWSER_USER_AGENT);

        let plain = HttpFetcher::new(Duration::from_secs(5), false).unwrap();
        assert!(matches!(
            plain.fetch(&url).await.unwrap_err(),
            FetchError::HttpStatus(404)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_polls_until_ready() {
        let calls = Cell::new(0);
        let result = wait_until(Duration::from_secs(10), Duration::from_secs(1), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok::<_, FetchError>((n >= 3).then_some(n)) }
        })
        .await
        .unwrap();
        assert_eq!(result, Some(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gives_up_at_deadline() {
        let calls = Cell::new(0);
        let start = Instant::now();
        let result: Option<()> = wait_until(Duration::from_secs(3), Duration::from_secs(1), || {
            calls.set(calls.get() + 1);
            async { Ok::<_, FetchError>(None) }
        })
        .await
        .unwrap();
        assert!(result.is_none());
        assert_eq!(calls.get(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_cuts_off_slow_check() {
        let calls = Cell::new(0);
        let start = Instant::now();
        let result: Option<()> = wait_until(Duration::from_secs(3), Duration::from_secs(1), || {
            calls.set(calls.get() + 1);
            async {
                sleep(Duration::from_secs(10)).await;
                Ok::<_, FetchError>(Some(()))
            }
        })
        .await
        .unwrap();
        assert!(result.is_none());
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    struct Flaky {
        calls: Cell<u32>,
    }

    impl PageFetcher for Flaky {
        async fn fetch(&self, _url: &Url) -> Result<String, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() < 2 {
                Ok("<html><body>loading</body></html>".to_string())
            } else {
                Ok("<html><body><div class='thread'>ready</div></body></html>".to_string())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_waits_for_selector() {
        let fetcher = Flaky { calls: Cell::new(0) };
        let request = RenderRequest {
            wait_for: Some(Selector::parse("div.thread").unwrap()),
            select_option: Some("最後回覆".to_string()),
            ..RenderRequest::default()
        };
        let url = Url::parse("https://www.hongkongcard.com/forum").unwrap();
        let page = fetcher.render(&url, &request).await.unwrap();
        assert!(page.body.contains("ready"));
        assert!(!page.option_selected);
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_times_out() {
        let fetcher = Flaky { calls: Cell::new(0) };
        let request = RenderRequest {
            wait_for: Some(Selector::parse("div.never").unwrap()),
            timeout: Duration::from_secs(2),
            ..RenderRequest::default()
        };
        let url = Url::parse("https://www.hongkongcard.com/forum").unwrap();
        let err = fetcher.render(&url, &request).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }
}
