use crate::{
    config::Config,
    http::mime::MimeTypes,
    limits::{ConnLimits, ReqLimits, RespLimits, SecurityLimits},
    security::{BanList, Brig, Suspicion, Watchlist},
    server::{
        connection::HttpConnection,
        routes::{Endpoint, LastMinute, Router},
        socket::{LiveSockets, SocketWrapper, Transport},
    },
    Method, Request, Response,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
};

/// Everything a connection task needs from its server.
pub(crate) struct Shared {
    pub(crate) router: Router,
    pub(crate) last_minute: Option<LastMinute>,

    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) security_limits: SecurityLimits,

    pub(crate) ban_list: Box<dyn BanList>,
    pub(crate) suspicion: Box<dyn Suspicion>,
    pub(crate) mime: MimeTypes,
    pub(crate) live: LiveSockets,
    rng: Mutex<fastrand::Rng>,
}

impl Shared {
    /// A random number tying a `500` response to its log line.
    pub(crate) fn correlation_id(&self) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .u32(..)
    }
}

/// An HTTP server: a listener, the registered endpoints and the limits that
/// apply to every connection.
///
/// Each accepted connection runs in its own tokio task.
///
/// # Examples
///
/// ```no_run
/// use hearth_web::{Endpoint, Method, Request, Response, Server};
///
/// struct Hello;
///
/// impl Endpoint for Hello {
///     async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
///         Ok(Response::html_ok("<h1>Hello world!</h1>"))
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
///         .route(Method::Get, "hello", Hello)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    stop: Arc<watch::Sender<bool>>,
    running: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "hello", Hello)
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: Router::new(),
            last_minute: None,
            mime: MimeTypes::default(),
            ban_list: None,
            suspicion: None,

            request_limits: None,
            response_limits: None,
            connection_limits: None,
            security_limits: None,
        }
    }

    /// Opens a listening socket with `SO_REUSEADDR` and a backlog of 1024.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        TcpListener::from_std(socket.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sockets currently open on this server.
    pub fn live_sockets(&self) -> &LiveSockets {
        &self.shared.live
    }

    /// A handle that stops this server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
            running: self.running.clone(),
            live: self.shared.live.clone(),
        }
    }

    /// Accepts one connection from the listener, for callers that wrap the
    /// stream themselves (TLS, say) before handing it to
    /// [`serve_connection`](Self::serve_connection).
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    /// Serves one already established stream.
    ///
    /// The socket is registered right away; the returned future runs the
    /// connection to its end and can be spawned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() -> std::io::Result<()> {
    /// use hearth_web::{Method, Server};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8443".parse().unwrap())?)
    ///     .route(Method::Get, "hello", Hello)
    ///     .build();
    ///
    /// loop {
    ///     let (stream, remote) = server.accept().await?;
    ///     // a TLS handshake would go here
    ///     tokio::spawn(server.serve_connection(stream, remote));
    /// }
    /// # }
    /// ```
    pub fn serve_connection<T: Transport>(
        &self,
        stream: T,
        remote: SocketAddr,
    ) -> impl Future<Output = ()> + Send + 'static {
        let socket = SocketWrapper::new(stream, remote, &self.shared.conn_limits, &self.shared.live);
        HttpConnection::new(self.shared.clone(), socket).run()
    }

    /// Accepts connections until [`ShutdownHandle::shutdown`] is called.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "hello", Hello)
    ///     .build();
    ///
    /// let handle = server.shutdown_handle();
    /// tokio::spawn(async move {
    ///     let _ = tokio::signal::ctrl_c().await;
    ///     handle.shutdown().await;
    /// });
    ///
    /// server.launch().await;
    /// # }
    /// ```
    pub async fn launch(self) {
        self.running.send_replace(true);
        let mut stop = self.stop.subscribe();
        tracing::debug!("accepting connections on {:?}", self.listener.local_addr());

        loop {
            // the watch guard must not live across the back-off sleep
            let accepted = tokio::select! {
                biased;

                _ = stop.wait_for(|stop| *stop) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote)) => {
                    tokio::spawn(self.serve_connection(stream, remote));
                }
                Err(error) => {
                    tracing::debug!("accept failed: {error}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        tracing::debug!("stopped accepting connections");
        let Self { listener, running, .. } = self;
        drop(listener);
        running.send_replace(false);
    }
}

/// Stops a [`Server`] from another task.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<bool>>,
    running: Arc<watch::Sender<bool>>,
    live: LiveSockets,
}

impl ShutdownHandle {
    /// Stops the accept loop, waits for it to exit, then closes every live
    /// connection.
    ///
    /// Endpoints already running are not cancelled; their connections close
    /// at the next socket read.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);

        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !running).await;

        tracing::debug!("closing {} live connections", self.live.len());
        self.live.close_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Router,
    last_minute: Option<LastMinute>,
    mime: MimeTypes,
    ban_list: Option<Box<dyn BanList>>,
    suspicion: Option<Box<dyn Suspicion>>,

    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    security_limits: Option<SecurityLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers `endpoint` for `method` on exactly `path`.
    ///
    /// The path is matched without case; the leading `/` is optional.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "/hello", Hello)
    ///     .route(Method::Get, "", Hello) // the root, `/`
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn route<E: Endpoint>(mut self, method: Method, path: &str, endpoint: E) -> Self {
        self.router.route(method, path, endpoint);
        self
    }

    /// Registers `endpoint` for every path starting with `prefix`. The
    /// longest matching prefix wins.
    #[inline(always)]
    pub fn route_prefix<E: Endpoint>(mut self, method: Method, prefix: &str, endpoint: E) -> Self {
        self.router.route_prefix(method, prefix, endpoint);
        self
    }

    /// Sets a hook that sees every response just before it is sent.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server, StatusCode};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "hello", Hello)
    ///     .last_minute(|_request, response| match response.status() {
    ///         StatusCode::NotFound => hearth_web::Response::html_ok("<p>nothing here</p>")
    ///             .with_status(StatusCode::NotFound),
    ///         _ => response,
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn last_minute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request<'_>, Response) -> Response + Send + Sync + 'static,
    {
        self.last_minute = Some(Arc::new(hook));
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server, limits::ReqLimits};
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "hello", Hello)
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         header_count: 32,
    ///         body_size: 64 * 1024,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response assembly.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures socket timeouts.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hearth_web::impt_default_endpoint!{ Hello }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hearth_web::{Method, Server, limits::ConnLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
    ///     .route(Method::Get, "hello", Hello)
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures bans and the default [`Watchlist`].
    #[inline(always)]
    pub fn security_limits(mut self, limits: SecurityLimits) -> Self {
        self.security_limits = Some(limits);
        self
    }

    /// Replaces the default in-memory [`Brig`].
    #[inline(always)]
    pub fn ban_list<B: BanList>(mut self, ban_list: B) -> Self {
        self.ban_list = Some(Box::new(ban_list));
        self
    }

    /// Replaces the default [`Watchlist`].
    #[inline(always)]
    pub fn suspicion<S: Suspicion>(mut self, suspicion: S) -> Self {
        self.suspicion = Some(Box::new(suspicion));
        self
    }

    /// Maps a file suffix to a `Content-Type` for file responses.
    #[inline(always)]
    pub fn mime(mut self, suffix: &str, mime: &str) -> Self {
        self.mime.insert(suffix, mime);
        self
    }

    /// Applies every limit and MIME mapping of a loaded [`Config`].
    ///
    /// The listen address is not applied; bind it with [`Server::bind`].
    pub fn config(mut self, config: &Config) -> Self {
        self.connection_limits = Some(config.connection.clone());
        self.request_limits = Some(config.request.clone());
        self.response_limits = Some(config.response.clone());
        self.security_limits = Some(config.security.clone());
        self.mime.extend(config.mime.iter());
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error message:
    /// - ``The `listener` method must be called to create``
    ///
    /// Panics when the `listener` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");

        let security_limits = self.security_limits.unwrap_or_default();
        let suspicion = self
            .suspicion
            .unwrap_or_else(|| Box::new(Watchlist::from_limits(&security_limits)));

        let shared = Shared {
            router: self.router,
            last_minute: self.last_minute,

            conn_limits: self.connection_limits.unwrap_or_default(),
            req_limits: self.request_limits.unwrap_or_default(),
            resp_limits: self.response_limits.unwrap_or_default(),
            security_limits,

            ban_list: self.ban_list.unwrap_or_else(|| Box::new(Brig::new())),
            suspicion,
            mime: self.mime,
            live: LiveSockets::new(),
            rng: Mutex::new(fastrand::Rng::new()),
        };
        tracing::debug!("built a server with {} routes", shared.router.len());

        Server {
            listener,
            shared: Arc::new(shared),
            stop: Arc::new(watch::channel(false).0),
            running: Arc::new(watch::channel(false).0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Hello;

    impl Endpoint for Hello {
        async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("hello"))
        }
    }

    struct Echo;

    impl Endpoint for Echo {
        async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
            let body = request.body().await?;
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body(body.as_string("value_a").unwrap_or_default()))
        }
    }

    struct Big;

    impl Endpoint for Big {
        async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
            Ok(Response::new(StatusCode::Ok)
                .header("Content-Type", "text/html")
                .body("<p>hearth</p>".repeat(500)))
        }
    }

    struct Failing;

    impl Endpoint for Failing {
        async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
            anyhow::bail!("database is on fire")
        }
    }

    struct Misuse;

    impl Endpoint for Misuse {
        async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
            request.body().await?;
            request.body().await?;
            Ok(Response::lean(StatusCode::NoContent))
        }
    }

    struct FileDownload(std::path::PathBuf);

    impl Endpoint for FileDownload {
        async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
            let extra: [(&str, &str); 0] = [];
            Ok(Response::large_file(&self.0, extra, request.headers()).await?)
        }
    }

    /// A parsed response read off a client socket.
    #[derive(Debug)]
    struct Reply {
        status_line: String,
        headers: Vec<String>,
        body: Vec<u8>,
    }

    impl Reply {
        fn header(&self, name: &str) -> Option<&str> {
            let prefix = format!("{}: ", name.to_ascii_lowercase());
            self.headers
                .iter()
                .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
                .map(|line| &line[prefix.len()..])
        }
    }

    /// Reads one response; the body is framed by `Content-Length` unless
    /// `head_only`.
    async fn read_reply<R: tokio::io::AsyncRead + Unpin>(client: &mut R, head_only: bool) -> Option<Reply> {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            match client.read(&mut byte).await {
                // a reset counts as a close
                Ok(0) | Err(_) => return None,
                Ok(_) => head.push(byte[0]),
            }
        }

        let text = String::from_utf8(head).unwrap();
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
        let status_line = lines.next().unwrap().to_string();
        let headers: Vec<String> = lines.map(str::to_string).collect();

        let mut reply = Reply {
            status_line,
            headers,
            body: Vec::new(),
        };
        if !head_only {
            let length: usize = reply.header("content-length").unwrap().parse().unwrap();
            reply.body = vec![0u8; length];
            client.read_exact(&mut reply.body).await.unwrap();
        }
        Some(reply)
    }

    async fn start(builder: ServerBuilder) -> (SocketAddr, ShutdownHandle, LiveSockets) {
        let server = builder
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .build();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let live = server.live_sockets().clone();

        tokio::spawn(server.launch());
        (addr, handle, live)
    }

    fn routes() -> ServerBuilder {
        Server::builder()
            .route(Method::Get, "hello", Hello)
            .route(Method::Post, "echo", Echo)
            .route(Method::Get, "big", Big)
            .route(Method::Get, "fail", Failing)
            .route(Method::Post, "misuse", Misuse)
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Option<Reply> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request).await.unwrap();
        read_reply(&mut client, false).await
    }

    #[tokio::test]
    async fn echo_form() {
        let (addr, handle, _) = start(routes()).await;

        let reply = exchange(
            addr,
            b"POST /echo HTTP/1.1\r\nHost: test\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 23\r\n\r\nvalue_a=123&value_b=456",
        )
        .await
        .unwrap();

        assert_eq!(reply.status_line, "HTTP/1.1 200 OK");
        assert_eq!(reply.body, b"123");
        assert_eq!(reply.header("server"), Some("hearth"));
        assert_eq!(reply.header("keep-alive"), Some("timeout=3"));
        assert!(reply.header("date").is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn not_found_and_last_minute() {
        let (addr, handle, _) = start(routes()).await;
        let reply = exchange(addr, b"GET /nowhere HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 404 Not Found");
        assert_eq!(reply.header("content-length"), Some("0"));
        assert!(reply.body.is_empty());
        handle.shutdown().await;

        let builder = routes().last_minute(|request, response| match response.status() {
            StatusCode::NotFound => Response::new(StatusCode::NotFound)
                .header("Content-Type", "text/plain")
                .body(format!("no {}", request.path().isolated_path())),
            _ => response,
        });
        let (addr, handle, _) = start(builder).await;

        let reply = exchange(addr, b"GET /nowhere HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 404 Not Found");
        assert_eq!(reply.body, b"no nowhere");

        let reply = exchange(addr, b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.body, b"hello");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn gzip_negotiation() {
        let (addr, handle, _) = start(routes()).await;

        let reply = exchange(addr, b"GET /big HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(reply.header("content-encoding"), Some("gzip"));
        assert_eq!(reply.header("vary"), Some("accept-encoding"));

        let plain = "<p>hearth</p>".repeat(500);
        assert!(reply.body.len() < plain.len());
        let mut decoded = String::new();
        GzDecoder::new(&reply.body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, plain);

        let reply = exchange(addr, b"GET /big HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.header("content-encoding"), None);
        assert_eq!(reply.body, plain.as_bytes());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failing_endpoint() {
        let (addr, handle, _) = start(routes()).await;

        let reply = exchange(addr, b"GET /fail HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 500 Internal Server Error");
        assert_eq!(reply.header("content-type"), Some("text/plain;charset=UTF-8"));

        let body = String::from_utf8(reply.body).unwrap();
        let id = body.strip_prefix("Server error: ").unwrap();
        assert!(id.parse::<u32>().is_ok(), "{body}");

        let reply = exchange(
            addr,
            b"POST /misuse HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 1\r\n\r\nx",
        )
        .await
        .unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 500 Internal Server Error");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn head_requests() {
        let (addr, handle, _) = start(routes()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"HEAD /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let head = read_reply(&mut client, true).await.unwrap();
        assert_eq!(head.status_line, "HTTP/1.1 200 OK");
        assert_eq!(head.header("content-length"), Some("5"));

        // the next bytes on the wire belong to the GET response
        let get = read_reply(&mut client, false).await.unwrap();
        assert_eq!(get.status_line, "HTTP/1.1 200 OK");
        assert_eq!(get.body, b"hello");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn keep_alive_pipelining() {
        let (addr, handle, _) = start(routes()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"POST /echo HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 9\r\n\r\nvalue_a=1\
                  POST /hello HTTP/1.1\r\nContent-Length: 4\r\n\r\nskip\
                  GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let first = read_reply(&mut client, false).await.unwrap();
        assert_eq!(first.body, b"1");

        let second = read_reply(&mut client, false).await.unwrap();
        assert_eq!(second.status_line, "HTTP/1.1 404 Not Found");

        let third = read_reply(&mut client, false).await.unwrap();
        assert_eq!(third.body, b"hello");
        assert_eq!(third.header("keep-alive"), None);

        assert!(read_reply(&mut client, false).await.is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn http10_closes_by_default() {
        let (addr, handle, _) = start(routes()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /hello HTTP/1.0\r\n\r\n").await.unwrap();

        let reply = read_reply(&mut client, false).await.unwrap();
        assert_eq!(reply.body, b"hello");
        assert_eq!(reply.header("keep-alive"), None);
        assert!(read_reply(&mut client, false).await.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn suspicious_paths_ban() {
        let builder = routes().security_limits(SecurityLimits {
            suspicious_paths: vec!["wp-login.php".into()],
            ..SecurityLimits::default()
        });
        let (addr, handle, _) = start(builder).await;

        assert!(exchange(addr, b"GET /wp-login.php HTTP/1.1\r\n\r\n").await.is_none());
        // banned now, even for a valid path
        assert!(exchange(addr, b"GET /hello HTTP/1.1\r\n\r\n").await.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn suspicious_paths_ban_before_headers() {
        let builder = routes().security_limits(SecurityLimits {
            suspicious_paths: vec![".env".into()],
            ..SecurityLimits::default()
        });
        let (addr, handle, _) = start(builder).await;

        // only the start line; waiting for headers would hit the 7s read timeout
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /.env HTTP/1.1\r\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), read_reply(&mut client, false))
            .await
            .unwrap();
        assert!(reply.is_none());

        assert!(exchange(addr, b"GET /hello HTTP/1.1\r\n\r\n").await.is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn banned_clients_get_nothing() {
        let brig = Arc::new(Brig::new());
        brig.ban("127.0.0.1_vuln_seeking", Duration::from_secs(60));

        struct SharedBrig(Arc<Brig>);
        impl BanList for SharedBrig {
            fn is_banned(&self, key: &str) -> bool {
                self.0.is_banned(key)
            }
            fn ban(&self, key: &str, duration: Duration) {
                self.0.ban(key, duration)
            }
        }

        let (addr, handle, _) = start(routes().ban_list(SharedBrig(brig))).await;
        assert!(exchange(addr, b"GET /hello HTTP/1.1\r\n\r\n").await.is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn limits_ban() {
        let builder = routes().request_limits(ReqLimits {
            header_count: 2,
            ..ReqLimits::default()
        });
        let (addr, handle, _) = start(builder).await;

        assert!(exchange(addr, b"GET /hello HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n")
            .await
            .is_none());
        assert!(exchange(addr, b"GET /hello HTTP/1.1\r\n\r\n").await.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ranged_files() {
        let contents: Vec<u8> = (0..1000u32).map(|i| (i % 253) as u8).collect();
        let path = crate::http::response::tests::temp_file("ranged_files.bin", &contents);
        let builder = routes().route(Method::Get, "download", FileDownload(path.clone()));
        let (addr, handle, _) = start(builder).await;

        let reply = exchange(addr, b"GET /download HTTP/1.1\r\nRange: bytes=0-499\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 206 Partial Content");
        assert_eq!(reply.header("content-range"), Some("bytes 0-499/1000"));
        assert_eq!(reply.header("content-type"), Some("application/octet-stream"));
        assert_eq!(reply.body, &contents[..500]);

        let reply = exchange(addr, b"GET /download HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reply.status_line, "HTTP/1.1 200 OK");
        assert_eq!(reply.body, contents);

        handle.shutdown().await;
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_live_connections() {
        let (addr, handle, live) = start(routes()).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        read_reply(&mut idle, false).await.unwrap();
        assert_eq!(live.len(), 1);

        handle.shutdown().await;
        assert!(handle.is_shutting_down());

        // the server side closes, so the client sees the end of the stream
        assert!(read_reply(&mut idle, false).await.is_none());
        tokio::time::timeout(Duration::from_secs(1), async {
            while !live.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn serve_connection_over_any_stream() {
        let server = routes()
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .build();
        let (stream, mut client) = tokio::io::duplex(16 * 1024);

        let remote: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        let task = tokio::spawn(server.serve_connection(stream, remote));
        assert_eq!(server.live_sockets().remote_addrs(), [remote]);

        client
            .write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let reply = read_reply(&mut client, false).await.unwrap();
        assert_eq!(reply.body, b"hello");

        task.await.unwrap();
        assert!(server.live_sockets().is_empty());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn server_futures_are_send() {
        let server = routes()
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .build();
        let handle = server.shutdown_handle();

        assert_send(&handle.shutdown());
        assert_send(&server.serve_connection(tokio::io::duplex(64).0, "10.0.0.1:1".parse().unwrap()));
        assert_send(&server.launch());
    }

    #[test]
    fn correlation_ids_vary() {
        let shared = Shared {
            router: Router::new(),
            last_minute: None,
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
            resp_limits: RespLimits::default(),
            security_limits: SecurityLimits::default(),
            ban_list: Box::new(Brig::new()),
            suspicion: Box::new(Watchlist::default()),
            mime: MimeTypes::default(),
            live: LiveSockets::new(),
            rng: Mutex::new(fastrand::Rng::with_seed(7)),
        };

        let ids: std::collections::HashSet<u32> = (0..100).map(|_| shared.correlation_id()).collect();
        assert!(ids.len() > 90);
    }
}
