//! Direct retrieval of a report over HTTP using the browser's session.

use async_trait::async_trait;
use futures::StreamExt;
use kestrel_browser::SessionCookie;
use kestrel_core::{Error, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGES: &str = "es-ES,es;q=0.9";

/// Everything needed to fetch a report as the logged-in user
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub cookies: Vec<SessionCookie>,
    /// URL of the tab the report is listed in
    pub referer: String,
    pub destination: PathBuf,
}

impl FetchRequest {
    /// `name=value` pairs joined the way a browser sends them
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Write the report to `request.destination`, returning its size in bytes
    async fn fetch(&self, request: &FetchRequest) -> Result<u64>;
}

/// Streams the report with reqwest, writing through a `.part` file
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn headers(request: &FetchRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(DOCUMENT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGES));

        let invalid = |what: &str| Error::Http(format!("{} is not a valid header value", what));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&request.cookie_header()).map_err(|_| invalid("Cookie"))?,
        );
        if !request.referer.is_empty() {
            headers.insert(
                REFERER,
                HeaderValue::from_str(&request.referer).map_err(|_| invalid("Referer"))?,
            );
        }
        Ok(headers)
    }
}

/// In-progress name for `destination`
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl ReportFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<u64> {
        tracing::debug!("GET {} (referer {})", request.url, request.referer);

        let response = self
            .client
            .get(request.url.clone())
            .headers(Self::headers(request)?)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request to {} failed: {}", request.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("{} returned {}", request.url, status)));
        }

        let partial = partial_path(&request.destination);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(Error::Http(format!("Download interrupted: {}", e)));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &request.destination).await?;

        tracing::info!("Fetched {} bytes into {}", written, request.destination.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cookies: &[(&str, &str)]) -> FetchRequest {
        FetchRequest {
            url: Url::parse("https://erp.example/descarga?id=7").unwrap(),
            cookies: cookies
                .iter()
                .map(|(n, v)| SessionCookie {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            referer: "https://erp.example/buzon".to_string(),
            destination: PathBuf::from("/tmp/report_1.xlsx"),
        }
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let req = request(&[("JSESSIONID", "abc"), ("lang", "gl")]);
        assert_eq!(req.cookie_header(), "JSESSIONID=abc; lang=gl");
    }

    #[test]
    fn test_headers_carry_session_and_referer() {
        let headers = HttpFetcher::headers(&request(&[("JSESSIONID", "abc")])).unwrap();

        assert_eq!(headers[COOKIE], "JSESSIONID=abc");
        assert_eq!(headers[REFERER], "https://erp.example/buzon");
        assert_eq!(headers[ACCEPT_LANGUAGE], "es-ES,es;q=0.9");
        assert!(headers[USER_AGENT].to_str().unwrap().starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_header_with_newline_is_rejected() {
        let mut req = request(&[]);
        req.referer = "https://erp.example/\nX-Injected: 1".to_string();

        let err = HttpFetcher::headers(&req).unwrap_err();
        assert!(err.to_string().contains("Referer"));
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/report_1.xlsx")),
            PathBuf::from("/tmp/report_1.xlsx.part")
        );
    }
}
