use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use regex::Regex;
use reqwest::header::USER_AGENT;
use scraper::{Html, Node};
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// DNS, connect, timeout or malformed url
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("unreadable content: {0}")]
    Parse(String),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Downloads the page and returns its visible text
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| FetchError::Network(format!("invalid url '{}': {}", url, e)))?;

        let mut request = self.client.get(parsed);
        if let Some(agent) = &self.settings.user_agent {
            request = request.header(USER_AGENT, agent.as_str());
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.settings.max_bytes {
                return Err(FetchError::Parse(format!(
                    "response of {} bytes exceeds limit of {}",
                    len, self.settings.max_bytes
                )));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::Parse(format!(
                    "response exceeds limit of {} bytes",
                    self.settings.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let byte_len = bytes.len();
        let html = String::from_utf8(bytes)
            .map_err(|e| FetchError::Parse(format!("body is not valid utf-8: {}", e)))?;

        let text = extract_text(&html);
        debug!("Fetched {} ({} bytes, {} chars of text)", url, byte_len, text.len());
        Ok(text)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Network(format!("timeout: {}", err));
    }
    if err.is_decode() || err.is_body() {
        return FetchError::Parse(err.to_string());
    }
    FetchError::Network(err.to_string())
}

const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

const BLOCK_ELEMENTS: [&str; 33] = [
    "address", "article", "aside", "blockquote", "body", "br", "dd", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "head", "header", "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "title",
];

/// Visible text of an HTML document, tags stripped and whitespace collapsed
pub fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    collect_text(doc.tree.root(), &mut out);
    normalize_whitespace(&out)
}

fn collect_text(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => {
            let name = element.name();
            if HIDDEN_ELEMENTS.contains(&name) {
                return;
            }
            // Table cells and rows read as separate words too
            let block = BLOCK_ELEMENTS.contains(&name) || matches!(name, "td" | "th" | "tr");
            if block {
                out.push(' ');
            }
            for child in node.children() {
                collect_text(child, out);
            }
            if block {
                out.push(' ');
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_text_strips_markup() {
        let html = r#"<html><head><title>Tour dates</title>
            <style>body { color: red }</style>
            <script>var release = "hidden";</script></head>
            <body><h1>News</h1><p>No <b>release</b>
            yet,&nbsp;sorry.</p><ul><li>one</li><li>two</li></ul>
            <noscript>enable js</noscript></body></html>"#;

        assert_eq!(extract_text(html), "Tour dates News No release yet, sorry. one two");
    }

    #[test]
    fn test_extract_text_keeps_inline_words_whole() {
        assert_eq!(extract_text("<p>re<em>lease</em>d</p>"), "released");
        assert_eq!(extract_text("<table><tr><td>a</td><td>b</td></tr></table>"), "a b");
        assert_eq!(extract_text(""), "");
        assert_eq!(extract_text("plain text   only"), "plain text only");
    }

    #[tokio::test]
    async fn test_fetch_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", "keyword-watch-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><p>no release yet</p></body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetchSettings {
            user_agent: Some("keyword-watch-test".to_string()),
            ..FetchSettings::default()
        })
        .unwrap();

        let text = fetcher.fetch(&format!("{}/page", server.uri())).await.unwrap();
        assert_eq!(text, "no release yet");
    }

    #[tokio::test]
    async fn test_fetch_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
        let err = fetcher.fetch(&format!("{}/broken", server.uri())).await.unwrap_err();
        assert_eq!(err, FetchError::HttpStatus(500));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_string("slow"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetchSettings {
            timeout: Duration::from_millis(50),
            ..FetchSettings::default()
        })
        .unwrap();
        let err = fetcher.fetch(&format!("{}/slow", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_utf8_and_oversized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/binary"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00, 0x80]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/large"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0123456789abcdef"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetchSettings {
            max_bytes: 10,
            ..FetchSettings::default()
        })
        .unwrap();

        let err = fetcher.fetch(&format!("{}/binary", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)), "{:?}", err);

        let err = fetcher.fetch(&format!("{}/large", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)), "{:?}", err);
    }

    /// Serves one chunked response, without Content-Length, that never ends
    async fn endless_chunked_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let mut chunk = b"400\r\n".to_vec();
            chunk.extend_from_slice(&[b'a'; 1024]);
            chunk.extend_from_slice(b"\r\n");
            while socket.write_all(&chunk).await.is_ok() {}
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_fetch_stops_reading_at_limit_without_content_length() {
        let url = endless_chunked_server().await;
        let fetcher = HttpFetcher::new(FetchSettings {
            timeout: Duration::from_secs(5),
            max_bytes: 8 * 1024,
            ..FetchSettings::default()
        })
        .unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_and_malformed_urls() {
        let fetcher = HttpFetcher::new(FetchSettings {
            timeout: Duration::from_secs(2),
            ..FetchSettings::default()
        })
        .unwrap();

        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));

        // Port 9 (discard) on localhost is not expected to accept connections
        let err = fetcher.fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{:?}", err);
    }
}
