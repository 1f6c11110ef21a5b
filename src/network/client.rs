//! The production network: HTTP(S) via `reqwest`.

use bytes::BytesMut;
use futures::future::BoxFuture;
use reqwest::{Client, redirect};
use tracing::debug;

use super::{Fetch, FetchError};
use crate::http::{Headers, Method, Origin, Request, Response, StatusCode};

/// Largest upstream response we will buffer (64 MiB).
const DEFAULT_MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// Fetches resources over HTTP or HTTPS.
///
/// Root-relative requests are sent to the *home* origin (the upstream web
/// application); absolute requests go to their own origin. Redirects are not
/// followed: a `3xx` is a response like any other and is handed back as is.
///
/// # Examples
///
/// ```rust,no_run
/// use offcache::http::Request;
/// use offcache::network::{Fetch, HttpFetcher};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new("http://127.0.0.1:5000".parse()?)?;
/// let response = fetcher.fetch(&Request::get("/static/custom.css")?).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    home: Origin,
    max_response_size: usize,
}

impl HttpFetcher {
    /// Creates a fetcher with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend cannot be initialized.
    pub fn new(home: Origin) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(client, home))
    }

    /// Wraps an existing client, sharing its connection pool.
    pub fn with_client(client: Client, home: Origin) -> Self {
        Self {
            client,
            home,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Caps the number of body bytes buffered per response.
    #[must_use]
    pub fn max_response_size(mut self, max_bytes: usize) -> Self {
        self.max_response_size = max_bytes;
        self
    }

    pub fn home(&self) -> &Origin {
        &self.home
    }

    fn url_for(&self, request: &Request) -> String {
        let origin = request.origin().unwrap_or(&self.home);
        format!("{origin}{}", request.path_and_query())
    }

    async fn exchange(&self, request: &Request, url: &str) -> Result<Response, FetchError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method().to_string()))?;

        let mut builder = self.client.request(method, url);
        // Host comes from the URL; framing is regenerated by reqwest.
        for (name, value) in request.headers().without_hop_by_hop().iter() {
            if !name.eq_ignore_ascii_case("host") {
                builder = builder.header(name, value);
            }
        }
        if !request.body().is_empty()
            || matches!(request.method(), Method::Post | Method::Put | Method::Patch)
        {
            builder = builder.body(request.body().clone());
        }

        let mut upstream = builder.send().await.map_err(|e| classify(url, e))?;

        let too_large = || FetchError::ResponseTooLarge {
            url: url.to_owned(),
            max_bytes: self.max_response_size,
        };
        if upstream
            .content_length()
            .is_some_and(|len| len > self.max_response_size as u64)
        {
            return Err(too_large());
        }

        let code = upstream.status().as_u16();
        // reqwest only yields three-digit codes, all of which map.
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::Other(code));

        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            match value.to_str() {
                Ok(value) => headers.insert(name.as_str(), value),
                Err(_) => debug!(url = %url, header = %name, "dropping non-UTF-8 header value"),
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = upstream.chunk().await.map_err(|e| classify(url, e))? {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Response::new(status)
            .with_headers(headers)
            .body_bytes(body.freeze()))
    }
}

fn classify(url: &str, source: reqwest::Error) -> FetchError {
    if source.is_connect() {
        FetchError::Connect {
            url: url.to_owned(),
            source: Box::new(source),
        }
    } else {
        FetchError::Request {
            url: url.to_owned(),
            source,
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
        Box::pin(async move {
            let url = self.url_for(request);
            let response = self.exchange(request, &url).await?;
            debug!(
                method = %request.method(),
                url = %url,
                status = response.status().as_u16(),
                bytes = response.content().len(),
                "network fetch complete"
            );
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned response and returns the raw request it received.
    async fn one_shot(response: &'static [u8]) -> (Origin, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap())
            .parse()
            .unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let declared = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + declared || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });

        (origin, handle)
    }

    #[tokio::test]
    async fn fetches_from_home_origin() {
        let (home, upstream) = one_shot(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 6\r\n\r\nbody{}",
        )
        .await;
        let authority = home.authority();

        let fetcher = HttpFetcher::new(home).unwrap();
        let request = Request::get("/static/custom.css?v=2")
            .unwrap()
            .header("Host", "proxy.local")
            .header("X-Trace", "abc")
            .header("Connection", "keep-alive, X-Trace");
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("text/css"));
        assert_eq!(response.content().as_ref(), b"body{}");

        let head = upstream.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /static/custom.css?v=2 http/1.1\r\n"));
        assert!(head.contains(&format!("host: {authority}\r\n")));
        assert!(!head.contains("proxy.local"));
        assert!(!head.contains("x-trace"));
    }

    #[tokio::test]
    async fn absolute_request_goes_to_its_own_origin() {
        let (cdn, upstream) =
            one_shot(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let fetcher = HttpFetcher::new("http://127.0.0.1:1".parse().unwrap()).unwrap();

        let request = Request::get(&format!("{cdn}/lib.js")).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.content().as_ref(), b"ok");
        assert!(upstream.await.unwrap().starts_with("GET /lib.js HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn forwards_request_body() {
        let (home, upstream) =
            one_shot(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
        let fetcher = HttpFetcher::new(home).unwrap();

        let request = Request::new(Method::Post, "/add").unwrap().with_body("reg=AB12");
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status(), StatusCode::Created);
        let raw = upstream.await.unwrap();
        assert!(raw.starts_with("POST /add HTTP/1.1\r\n"));
        assert!(raw.to_ascii_lowercase().contains("content-length: 8\r\n"));
        assert!(raw.ends_with("\r\n\r\nreg=AB12"));
    }

    #[tokio::test]
    async fn less_common_statuses_are_responses() {
        let (home, _) =
            one_shot(b"HTTP/1.1 207 Multi-Status\r\nContent-Length: 2\r\n\r\n{}").await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/dav").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MultiStatus);
        assert!(response.status().is_success());

        let (home, _) = one_shot(
            b"HTTP/1.1 451 Unavailable For Legal Reasons\r\nContent-Length: 7\r\n\r\nblocked",
        )
        .await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/banned").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UnavailableForLegalReasons);
        assert_eq!(response.content().as_ref(), b"blocked");

        let (home, _) = one_shot(b"HTTP/1.1 299 Custom\r\nContent-Length: 0\r\n\r\n").await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/odd").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::Other(299));
    }

    #[tokio::test]
    async fn chunked_and_unframed_bodies_are_decoded() {
        let (home, _) = one_shot(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        )
        .await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/chunked").unwrap())
            .await
            .unwrap();
        assert_eq!(response.content().as_ref(), b"Wikipedia");
        assert!(response.headers().without_hop_by_hop().get("transfer-encoding").is_none());

        let (home, _) = one_shot(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\nmissing").await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/gone").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.content().as_ref(), b"missing");
    }

    #[tokio::test]
    async fn redirects_are_returned_not_followed() {
        let (home, _) = one_shot(
            b"HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:1/elsewhere\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/moved").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::Found);
        assert_eq!(
            response.headers().get("location"),
            Some("http://127.0.0.1:1/elsewhere")
        );
    }

    #[tokio::test]
    async fn non_utf8_header_is_dropped_and_the_rest_kept() {
        let (home, _) = one_shot(
            b"HTTP/1.1 200 OK\r\nX-Binary: caf\xe9\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok",
        )
        .await;
        let response = HttpFetcher::new(home)
            .unwrap()
            .fetch(&Request::get("/latin1").unwrap())
            .await
            .unwrap();

        assert!(response.headers().get("x-binary").is_none());
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(response.content().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn oversized_response_is_rejected() {
        let (home, _) =
            one_shot(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789").await;
        let fetcher = HttpFetcher::new(home).unwrap().max_response_size(4);

        assert!(matches!(
            fetcher.fetch(&Request::get("/big").unwrap()).await,
            Err(FetchError::ResponseTooLarge { max_bytes: 4, .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_a_connect_error() {
        // Bind then drop to obtain a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher =
            HttpFetcher::new(format!("http://127.0.0.1:{port}").parse().unwrap()).unwrap();
        assert!(matches!(
            fetcher.fetch(&Request::get("/").unwrap()).await,
            Err(FetchError::Connect { .. })
        ));
    }
}
