// Container fixture lifecycle
// Launch an image via the docker CLI, discover its published ports, and
// wait for the contained service to accept traffic

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::process::Command;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::errors::{DocktestError, Result};
use crate::host;
use crate::ports::PortMap;

/// Delay between readiness attempts. Fixed cadence, no backoff.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to one externally running container and its published ports.
///
/// Identity (`id`, `image`, `host`, port table) is fixed at launch and
/// never changes; only the external container's runtime state does. The
/// handle does not tear the container down on drop: the external process
/// outlives it unless [`Container::close`] is called.
pub struct Container {
    id: String,
    image: String,
    host: String,
    ports: PortMap,
    clock: Box<dyn Clock>,
}

impl Container {
    /// Launch `image` detached with all declared ports published to
    /// ephemeral host ports (`docker run -P -d`), appending `extra_args`
    /// verbatim. Panics on any launch failure: fixture code aborts the
    /// test run rather than handing back an error the test might ignore.
    ///
    /// Use [`Container::try_run`] to handle the failure instead.
    pub fn run(image: &str, extra_args: &[&str]) -> Container {
        match Container::try_run(image, extra_args) {
            Ok(container) => container,
            Err(err) => panic!("failed to run image {image} with args {extra_args:?}: {err}"),
        }
    }

    /// Fallible variant of [`Container::run`].
    pub fn try_run(image: &str, extra_args: &[&str]) -> Result<Container> {
        let mut args = vec!["run", "-P", "-d", image];
        args.extend_from_slice(extra_args);
        let id = docker(&args)?;

        let listing = docker(&["port", &id])?;

        Ok(Container {
            id,
            image: image.to_string(),
            host: host::resolve_host(),
            ports: PortMap::parse(&listing),
            clock: Box::new(SystemClock),
        })
    }

    /// Container identifier assigned by the docker daemon.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Image reference this container was launched from.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Host on which the published ports are reachable.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Externally reachable port for a container-internal port, without
    /// waiting. `None` means the port was never published.
    pub fn port(&self, internal: u16) -> Option<u16> {
        self.ports.external(internal)
    }

    /// Dialable `host:port` address for a container-internal port.
    pub fn addr(&self, internal: u16) -> Option<String> {
        self.port(internal)
            .map(|external| format!("{}:{}", self.host, external))
    }

    /// Wait until a raw connection to the published counterpart of
    /// `internal` succeeds, then return the external port. Panics if the
    /// port was never published or the timeout elapses first.
    pub fn wait_port(&self, internal: u16, timeout: Duration) -> u16 {
        match self.try_wait_port(internal, timeout) {
            Ok(external) => external,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible variant of [`Container::wait_port`].
    ///
    /// Attempts one connection of the published protocol per iteration
    /// (TCP connect, or a UDP socket connect for udp ports), sleeping
    /// one second between attempts until the deadline passes.
    pub fn try_wait_port(&self, internal: u16, timeout: Duration) -> Result<u16> {
        let (external, protocol) = self.resolve(internal)?;
        let addr = format!("{}:{}", self.host, external);
        eprintln!(
            "Waiting for {}:{} ({} {}, timeout {}s)...",
            self.host,
            external,
            self.image,
            protocol,
            timeout.as_secs()
        );

        let use_udp = if protocol.starts_with("tcp") {
            false
        } else if protocol.starts_with("udp") {
            true
        } else {
            return Err(DocktestError::UnsupportedProtocol {
                protocol,
                port: internal,
            });
        };

        let start = self.clock.now();
        let deadline = start + timeout;

        loop {
            let attempt = if use_udp {
                dial_udp(&addr)
            } else {
                // Never dial past the overall deadline.
                let remaining = deadline.saturating_duration_since(self.clock.now());
                dial_tcp(&addr, remaining)
            };

            let failure = match attempt {
                Ok(()) => return Ok(external),
                Err(err) => err,
            };

            let now = self.clock.now();
            if now >= deadline {
                return Err(DocktestError::WaitTimeout {
                    port: internal,
                    image: self.image.clone(),
                    elapsed: now - start,
                    detail: failure.to_string(),
                });
            }
            self.clock.sleep(RETRY_INTERVAL);
        }
    }

    /// Wait until `GET http://host:external<path>` answers with a 2xx
    /// status, then return the external port. Panics if the port was
    /// never published or the timeout elapses first.
    pub fn wait_http(&self, internal: u16, path: &str, timeout: Duration) -> u16 {
        match self.try_wait_http(internal, path, timeout) {
            Ok(external) => external,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible variant of [`Container::wait_http`].
    ///
    /// Each attempt uses the overall timeout as its own request timeout.
    /// A transport error or a status outside [200, 300) counts as a
    /// failed attempt; the response is dropped before the retry sleep so
    /// its connection is released.
    pub fn try_wait_http(&self, internal: u16, path: &str, timeout: Duration) -> Result<u16> {
        let (external, _) = self.resolve(internal)?;
        let url = format!("http://{}:{}{}", self.host, external, path);
        eprintln!(
            "Waiting for {} ({}, timeout {}s)...",
            url,
            self.image,
            timeout.as_secs()
        );

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        let start = self.clock.now();
        let deadline = start + timeout;

        loop {
            let failure = match client.get(&url).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(external);
                    }
                    drop(response);
                    format!("status {status}")
                }
                Err(err) => err.to_string(),
            };

            let now = self.clock.now();
            if now >= deadline {
                return Err(DocktestError::WaitTimeout {
                    port: internal,
                    image: self.image.clone(),
                    elapsed: now - start,
                    detail: failure,
                });
            }
            self.clock.sleep(RETRY_INTERVAL);
        }
    }

    /// Stop, wait out, and remove the external container, in that order.
    ///
    /// Every step is best-effort: teardown must never replace the test's
    /// own pass/fail signal with an infrastructure error.
    pub fn close(&self) {
        docker_quiet(&["stop", &self.id]);
        docker_quiet(&["wait", &self.id]);
        docker_quiet(&["rm", &self.id]);
    }

    fn resolve(&self, internal: u16) -> Result<(u16, String)> {
        match (self.ports.external(internal), self.ports.protocol(internal)) {
            (Some(external), Some(protocol)) => Ok((external, protocol.to_string())),
            _ => Err(DocktestError::PortNotPublished {
                port: internal,
                image: self.image.clone(),
            }),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("image", &self.image)
            .field("host", &self.host)
            .field("ports", &self.ports)
            .finish()
    }
}

/// Run a docker subcommand and return its trimmed stdout.
fn docker(args: &[&str]) -> Result<String> {
    let output = Command::new("docker").args(args).output()?;

    if !output.status.success() {
        return Err(DocktestError::CommandFailed {
            command: format!("docker {}", args.join(" ")),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a docker subcommand for its side effect only, swallowing failure.
fn docker_quiet(args: &[&str]) {
    let _ = Command::new("docker").args(args).output();
}

fn dial_tcp(addr: &str, timeout: Duration) -> io::Result<()> {
    let addr = lookup(addr)?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    drop(stream);
    Ok(())
}

// A UDP "connect" only binds the remote address; it cannot probe the
// service, which matches dialing semantics for udp ports.
fn dial_udp(addr: &str) -> io::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(addr)?;
    Ok(())
}

fn lookup(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn fixture(listing: &str) -> Container {
        Container {
            id: "a1b2c3".to_string(),
            image: "test-image".to_string(),
            host: "127.0.0.1".to_string(),
            ports: PortMap::parse(listing),
            clock: Box::new(FakeClock::new()),
        }
    }

    /// Accepts connections forever, answering each with a fixed response.
    fn stub_http_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let port = listener.local_addr().expect("local addr").port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    /// A loopback port that nothing is listening on.
    fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);
        port
    }

    #[test]
    fn addr_joins_host_and_external_port() {
        let container = fixture("6379/tcp -> 0.0.0.0:32815");
        assert_eq!(container.addr(6379), Some("127.0.0.1:32815".to_string()));
    }

    #[test]
    fn addr_of_unpublished_port_is_none() {
        let container = fixture("6379/tcp -> 0.0.0.0:32815");
        assert_eq!(container.addr(9999), None);
        assert_eq!(container.port(9999), None);
    }

    #[test]
    fn wait_port_succeeds_against_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let external = listener.local_addr().expect("local addr").port();
        let container = fixture(&format!("6379/tcp -> 0.0.0.0:{external}"));

        let resolved = container
            .try_wait_port(6379, Duration::from_secs(5))
            .expect("listener is up");
        assert_eq!(resolved, external);
    }

    #[test]
    fn wait_port_on_unpublished_port_fails_without_polling() {
        let container = fixture("");
        let err = container
            .try_wait_port(6379, Duration::from_secs(5))
            .expect_err("nothing published");
        match err {
            DocktestError::PortNotPublished { port, image } => {
                assert_eq!(port, 6379);
                assert_eq!(image, "test-image");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wait_port_times_out_within_one_interval_of_deadline() {
        let container = fixture(&format!("6379/tcp -> 0.0.0.0:{}", refused_port()));

        let err = container
            .try_wait_port(6379, Duration::from_secs(3))
            .expect_err("nothing listening");
        match err {
            DocktestError::WaitTimeout { elapsed, .. } => {
                assert!(elapsed >= Duration::from_secs(3), "gave up early: {elapsed:?}");
                assert!(elapsed <= Duration::from_secs(4), "gave up late: {elapsed:?}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wait_port_rejects_unknown_protocol() {
        let container = fixture("132/sctp -> 0.0.0.0:32815");
        let err = container
            .try_wait_port(132, Duration::from_secs(1))
            .expect_err("sctp is not dialable");
        match err {
            DocktestError::UnsupportedProtocol { protocol, port } => {
                assert_eq!(protocol, "sctp");
                assert_eq!(port, 132);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wait_port_handles_udp_mappings() {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind udp");
        let external = socket.local_addr().expect("local addr").port();
        let container = fixture(&format!("53/udp -> 0.0.0.0:{external}"));

        let resolved = container
            .try_wait_port(53, Duration::from_secs(5))
            .expect("udp dial cannot fail here");
        assert_eq!(resolved, external);
    }

    #[test]
    fn wait_http_succeeds_on_2xx() {
        let external =
            stub_http_server("HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n");
        let container = fixture(&format!("80/tcp -> 0.0.0.0:{external}"));

        let resolved = container
            .try_wait_http(80, "/health", Duration::from_secs(5))
            .expect("stub answers 204");
        assert_eq!(resolved, external);
    }

    #[test]
    fn wait_http_retries_non_2xx_until_timeout() {
        let external = stub_http_server(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        );
        let container = fixture(&format!("80/tcp -> 0.0.0.0:{external}"));

        let err = container
            .try_wait_http(80, "/", Duration::from_secs(2))
            .expect_err("404 never becomes ready");
        match err {
            DocktestError::WaitTimeout { elapsed, detail, .. } => {
                assert!(elapsed >= Duration::from_secs(2));
                assert!(detail.contains("404"), "detail: {detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wait_http_treats_5xx_as_not_ready() {
        let external = stub_http_server(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        );
        let container = fixture(&format!("80/tcp -> 0.0.0.0:{external}"));

        let err = container
            .try_wait_http(80, "/", Duration::from_secs(1))
            .expect_err("500 never becomes ready");
        match err {
            DocktestError::WaitTimeout { detail, .. } => {
                assert!(detail.contains("500"), "detail: {detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wait_http_on_unpublished_port_fails_without_polling() {
        let container = fixture("6379/tcp -> 0.0.0.0:32815");
        let err = container
            .try_wait_http(80, "/", Duration::from_secs(1))
            .expect_err("port 80 not published");
        assert!(matches!(err, DocktestError::PortNotPublished { port: 80, .. }));
    }
}
