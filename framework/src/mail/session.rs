//! SMTP sessions over a socket that fails on inactivity rather than on total duration.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use lettre::transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS};
use lettre::transport::smtp::client::{AsyncSmtpConnection, AsyncTokioStream, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::Error as SmtpError;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};
use tokio_rustls::TlsConnector;

use super::{Endpoint, MailError, TlsMode};
use crate::config::Timeouts;

/// Raised through `io::ErrorKind::TimedOut` when a socket sits idle too long.
#[derive(Debug, thiserror::Error)]
#[error("no activity for {}ms", .0.as_millis())]
pub(crate) struct IdleTimeout(pub Duration);

/// Wraps a stream so that any read, write or flush left pending longer than
/// the limit fails. Until the server has sent its first byte the limit is the
/// greeting timeout; after that it is the socket timeout.
pub(crate) struct IdleStream<S> {
    inner: S,
    peer: SocketAddr,
    greeting: Duration,
    idle: Duration,
    greeted: bool,
    timer: Pin<Box<Sleep>>,
    armed: bool,
}

impl<S> IdleStream<S> {
    pub(crate) fn new(inner: S, peer: SocketAddr, timeouts: &Timeouts) -> Self {
        IdleStream {
            inner,
            peer,
            greeting: timeouts.greeting,
            idle: timeouts.socket,
            greeted: false,
            timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: false,
        }
    }

    fn limit(&self) -> Duration {
        if self.greeted {
            self.idle
        } else {
            self.greeting
        }
    }

    fn watch<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.armed = false;
            return poll;
        }

        let limit = self.limit();
        if !self.armed {
            self.timer.as_mut().reset(Instant::now() + limit);
            self.armed = true;
        }
        match self.timer.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.armed = false;
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    IdleTimeout(limit),
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> fmt::Debug for IdleStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleStream")
            .field("peer", &self.peer)
            .field("greeted", &self.greeted)
            .field("limit", &self.limit())
            .finish()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if buf.filled().len() > before {
            this.greeted = true;
        }
        this.watch(cx, poll)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.watch(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.watch(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.watch(cx, poll)
    }
}

impl<S> AsyncTokioStream for IdleStream<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

/// The inactivity limit behind `err`, if it failed on one.
pub(crate) fn idle_timeout(err: &SmtpError) -> Option<Duration> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return io_err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<IdleTimeout>())
                .map(|idle| idle.0);
        }
        source = cause.source();
    }
    None
}

/// Opens authenticated sessions to one relay.
#[derive(Clone)]
pub(crate) struct Connector {
    endpoint: Endpoint,
    credentials: Credentials,
    timeouts: Timeouts,
    hello: ClientId,
    implicit_tls: Option<TlsConnector>,
}

impl Connector {
    pub(crate) fn new(endpoint: Endpoint, credentials: Credentials, timeouts: Timeouts) -> Result<Self, MailError> {
        let implicit_tls = match endpoint.tls {
            TlsMode::Tls => Some(tls_connector()?),
            TlsMode::Starttls | TlsMode::None => None,
        };
        Ok(Connector {
            endpoint,
            credentials,
            timeouts,
            hello: ClientId::default(),
            implicit_tls,
        })
    }

    pub(crate) fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Connect, read the greeting, negotiate TLS and authenticate.
    ///
    /// Every failure here means the relay could not be reached or would not
    /// accept the account, so none of them are reported as rejections.
    pub(crate) async fn open(&self) -> Result<AsyncSmtpConnection, MailError> {
        let stream = tokio::time::timeout(self.timeouts.connection, self.connect())
            .await
            .map_err(|_| MailError::Timeout(self.timeouts.connection))??;

        let mut conn = AsyncSmtpConnection::connect_with_transport(stream, &self.hello)
            .await
            .map_err(|e| self.setup_error(e))?;

        if self.endpoint.tls == TlsMode::Starttls {
            let params = TlsParameters::new(self.endpoint.host.clone())
                .map_err(|e| MailError::Connection(e.to_string()))?;
            conn.starttls(params, &self.hello)
                .await
                .map_err(|e| self.setup_error(e))?;
        }

        conn.auth(DEFAULT_MECHANISMS, &self.credentials)
            .await
            .map_err(|e| self.setup_error(e))?;

        tracing::debug!(host = %self.endpoint.host, port = self.endpoint.port, "SMTP session ready");
        Ok(conn)
    }

    async fn connect(&self) -> Result<Box<dyn AsyncTokioStream>, MailError> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| MailError::Connection(format!("{}:{}: {e}", self.endpoint.host, self.endpoint.port)))?;
        let peer = tcp
            .peer_addr()
            .map_err(|e| MailError::Connection(e.to_string()))?;

        match &self.implicit_tls {
            Some(connector) => {
                let name = rustls::pki_types::ServerName::try_from(self.endpoint.host.clone())
                    .map_err(|e| MailError::Connection(format!("invalid server name: {e}")))?;
                let tls = connector
                    .connect(name, tcp)
                    .await
                    .map_err(|e| MailError::Connection(format!("TLS handshake failed: {e}")))?;
                Ok(Box::new(IdleStream::new(tls, peer, &self.timeouts)))
            }
            None => Ok(Box::new(IdleStream::new(tcp, peer, &self.timeouts))),
        }
    }

    fn setup_error(&self, err: SmtpError) -> MailError {
        match idle_timeout(&err) {
            Some(limit) => MailError::Timeout(limit),
            None if err.is_timeout() => MailError::Timeout(self.timeouts.socket),
            None => MailError::Connection(err.to_string()),
        }
    }
}

fn tls_connector() -> Result<TlsConnector, MailError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MailError::Connection(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
