//! Port-number service labels, plus a one-shot `Server` header read for
//! HTTP-family ports.
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{header, redirect, Client};

use crate::pool::WorkerPool;
use crate::store::ResultStore;
use crate::tui::{Event, Reporter};

/// Hard limit on the banner request, connect included.
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(5);

/// Label for ports missing from the table.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Well-known service name for `port`.
pub fn service_name(port: u16) -> Option<&'static str> {
    Some(match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        135 => "rpc",
        139 => "netbios",
        143 => "imap",
        443 => "https",
        993 => "imaps",
        995 => "pop3s",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        8080 => "http-alt",
        8443 => "https-alt",
        _ => return None,
    })
}

/// Root URL to request for an HTTP-family service, `None` otherwise.
///
/// ```rust
/// # use netdive::service::banner_url;
/// assert_eq!(banner_url("10.0.0.5", 80, "http").as_deref(), Some("http://10.0.0.5/"));
/// assert_eq!(banner_url("::1", 8443, "https-alt").as_deref(), Some("https://[::1]:8443/"));
/// assert_eq!(banner_url("10.0.0.5", 22, "ssh"), None);
/// ```
pub fn banner_url(host: &str, port: u16, service: &str) -> Option<String> {
    let scheme = match service {
        "http" | "http-alt" => "http",
        "https" | "https-alt" => "https",
        _ => return None,
    };
    let host = if Ipv6Addr::from_str(host).is_ok() {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    let port = match port {
        80 | 443 => String::new(),
        other => format!(":{other}"),
    };
    Some(format!("{scheme}://{host}{port}/"))
}

/// Reads the server identification of a web service.
#[async_trait]
pub trait BannerProbe: Send + Sync {
    /// The `Server` header returned for `url`, if the request succeeds and
    /// carries one. Exactly one attempt.
    async fn server_header(&self, url: &str) -> Option<String>;
}

/// [`BannerProbe`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpBanner {
    client: Client,
}

impl HttpBanner {
    /// A client whose whole request is bounded by `timeout`. Requests go
    /// straight to the target, never through a proxy, and redirects are
    /// not followed.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BannerProbe for HttpBanner {
    async fn server_header(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Banner request to {url} failed: {e}");
                return None;
            }
        };
        response
            .headers()
            .get(header::SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }
}

/// The label for one open port: the table name, decorated with the server
/// banner for web services.
pub async fn label_port(host: &str, port: u16, banner: &dyn BannerProbe) -> String {
    let Some(service) = service_name(port) else {
        return UNKNOWN_SERVICE.to_owned();
    };
    match banner_url(host, port, service) {
        Some(url) => match banner.server_header(&url).await {
            Some(server) => format!("{service} ({server})"),
            None => service.to_owned(),
        },
        None => service.to_owned(),
    }
}

/// Labels every open port of the given hosts in place.
pub struct ServiceIdentifier {
    store: ResultStore,
    reporter: Arc<dyn Reporter>,
    banner: Arc<dyn BannerProbe>,
    threads: usize,
}

impl ServiceIdentifier {
    /// An identifier probing with `banner` on `threads` workers.
    pub fn new(
        store: ResultStore,
        reporter: Arc<dyn Reporter>,
        banner: Arc<dyn BannerProbe>,
        threads: usize,
    ) -> Self {
        Self {
            store,
            reporter,
            banner,
            threads,
        }
    }

    /// Labels the ports. The store is read first and written after each
    /// probe; no lock is held while a request is in flight.
    pub async fn identify(&self, hosts: &[String]) {
        let work = hosts
            .iter()
            .flat_map(|host| {
                self.store
                    .ports(host)
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |p| (host.clone(), p.port))
            })
            .collect::<Vec<_>>();

        let (store, reporter, banner) = (
            self.store.clone(),
            Arc::clone(&self.reporter),
            Arc::clone(&self.banner),
        );
        WorkerPool::new(self.threads)
            .run(work, move |(host, port)| {
                let (store, reporter, banner) =
                    (store.clone(), Arc::clone(&reporter), Arc::clone(&banner));
                async move {
                    let service = label_port(&host, port, banner.as_ref()).await;
                    store.set_service(&host, port, service.clone());
                    reporter.emit(Event::ServiceIdentified {
                        host,
                        port,
                        service,
                    });
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PortRecord, ScanInfo, ScanMode};
    use crate::tui::NullReporter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct CannedBanner {
        server: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl CannedBanner {
        fn new(server: Option<&'static str>) -> Self {
            Self {
                server,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BannerProbe for CannedBanner {
        async fn server_header(&self, _url: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.server.map(str::to_owned)
        }
    }

    fn store_with(host: &str, ports: &[u16]) -> ResultStore {
        let store = ResultStore::new(ScanInfo::new(vec![], ScanMode::Active));
        store.merge_ports(host, ports.iter().map(|&p| PortRecord::open(p)));
        store
    }

    async fn identify(store: &ResultStore, banner: Arc<CannedBanner>, host: &str) {
        ServiceIdentifier::new(store.clone(), Arc::new(NullReporter), banner, 4)
            .identify(&[host.to_owned()])
            .await;
    }

    fn service_of(store: &ResultStore, host: &str, port: u16) -> String {
        store
            .ports(host)
            .unwrap()
            .into_iter()
            .find(|p| p.port == port)
            .unwrap()
            .service
    }

    #[tokio::test]
    async fn ssh_is_labelled_without_network() {
        let store = store_with("10.0.0.5", &[22]);
        let banner = Arc::new(CannedBanner::new(Some("nginx")));

        identify(&store, banner.clone(), "10.0.0.5").await;

        assert_eq!(service_of(&store, "10.0.0.5", 22), "ssh");
        assert_eq!(banner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn http_gets_server_banner() {
        let store = store_with("10.0.0.5", &[80]);
        let banner = Arc::new(CannedBanner::new(Some("nginx")));

        identify(&store, banner.clone(), "10.0.0.5").await;

        assert_eq!(service_of(&store, "10.0.0.5", 80), "http (nginx)");
        assert_eq!(banner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_banner_keeps_bare_label() {
        let store = store_with("10.0.0.5", &[80, 8443]);
        let banner = Arc::new(CannedBanner::new(None));

        identify(&store, banner.clone(), "10.0.0.5").await;

        assert_eq!(service_of(&store, "10.0.0.5", 80), "http");
        assert_eq!(service_of(&store, "10.0.0.5", 8443), "https-alt");
        assert_eq!(banner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unmapped_port_is_unknown() {
        let store = store_with("10.0.0.5", &[31337]);
        identify(&store, Arc::new(CannedBanner::new(None)), "10.0.0.5").await;
        assert_eq!(service_of(&store, "10.0.0.5", 31337), UNKNOWN_SERVICE);
    }

    async fn serve_once(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn http_banner_reads_server_header() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let banner = HttpBanner::new(Duration::from_secs(2)).unwrap();

        let server = banner
            .server_header(&format!("http://127.0.0.1:{port}/"))
            .await;
        assert_eq!(server.as_deref(), Some("nginx"));
    }

    #[tokio::test]
    async fn http_banner_reports_the_redirecting_server() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();
        let contacted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&contacted);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = target.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nServer: redirected-target\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 301 Moved Permanently\r\nServer: nginx\r\nLocation: http://127.0.0.1:{target_port}/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .into_boxed_str(),
        );
        let port = serve_once(response).await;
        let banner = HttpBanner::new(Duration::from_secs(2)).unwrap();

        let server = banner
            .server_header(&format!("http://127.0.0.1:{port}/"))
            .await;

        assert_eq!(server.as_deref(), Some("nginx"));
        assert_eq!(contacted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn http_banner_without_header_is_none() {
        let port = serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        let banner = HttpBanner::new(Duration::from_secs(2)).unwrap();

        assert_eq!(
            banner
                .server_header(&format!("http://127.0.0.1:{port}/"))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn http_banner_connection_failure_is_none() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let banner = HttpBanner::new(Duration::from_secs(2)).unwrap();

        assert_eq!(
            banner
                .server_header(&format!("http://127.0.0.1:{port}/"))
                .await,
            None
        );
    }
}
