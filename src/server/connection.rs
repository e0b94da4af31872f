use crate::{
    errors::{Error, Result},
    http::{
        headers::Headers,
        request::Request,
        request_line::RequestLine,
        response::{Outgoing, Response},
        source::ByteSource,
        types::{Method, StatusCode, Version},
    },
    server::{server_impl::Shared, socket::SocketWrapper},
};
use std::{net::SocketAddr, sync::Arc};

/// One client connection, served request after request until it closes.
pub(crate) struct HttpConnection {
    shared: Arc<Shared>,
    socket: SocketWrapper,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(shared: Arc<Shared>, socket: SocketWrapper) -> Self {
        Self { shared, socket }
    }

    /// Serves the connection, then reports whatever ended it and closes the
    /// socket.
    pub(crate) async fn run(mut self) {
        let remote = self.socket.remote_addr();

        if let Err(error) = self.impl_run().await {
            self.classify(remote, error);
        }

        self.socket.close().await;
    }

    async fn impl_run(&mut self) -> Result<()> {
        let Self { shared, socket } = self;
        let remote = socket.remote_addr();

        if shared.ban_list.is_banned(&vuln_key(remote)) {
            tracing::trace!("{remote} is in jail, closing without a response");
            return Ok(());
        }

        loop {
            let Some(raw) = socket.read_line(shared.req_limits.max_line_size).await? else {
                tracing::trace!("{remote} closed the connection");
                return Ok(());
            };

            let line = RequestLine::parse(&raw, shared.req_limits.query_keys)?;
            if line.is_empty() {
                tracing::trace!("{remote} sent an unparseable start line: {raw:?}");
                return Ok(());
            }
            tracing::trace!("{remote} requested {raw}");

            // checked before any header is read
            if let Some(reason) = shared.suspicion.suspicious_path(line.path().isolated_path()) {
                return Err(Error::ForbiddenUse(reason));
            }

            let headers = Headers::read(socket, &shared.req_limits).await?;
            let keep_alive = is_keep_alive(line.version(), &headers) && !headers.is_chunked();

            let head_only = line.method() == Method::Head;
            let mut request = Request::new(line, headers, socket, &shared.req_limits)?;

            let response = dispatch(shared, &mut request).await?;
            let response = match &shared.last_minute {
                Some(hook) => hook(&request, response),
                None => response,
            };

            let prepared = response.prepare(&Outgoing {
                keep_alive: keep_alive.then_some(shared.conn_limits.keep_alive_timeout),
                request_headers: request.headers(),
                limits: &shared.resp_limits,
                mime: &shared.mime,
            })?;
            prepared.send(request.source.socket(), head_only).await?;

            if !request.source.drain(shared.req_limits.body_size).await? {
                tracing::trace!("{remote} left too much body unread, closing");
                return Ok(());
            }

            if !keep_alive {
                tracing::trace!("not keep-alive, closing the connection to {remote}");
                return Ok(());
            }
        }
    }

    fn classify(&self, remote: SocketAddr, error: Error) {
        let shared = &self.shared;

        match error {
            error if error.is_quiet() => tracing::trace!("{remote}: {error}"),
            Error::Io(error) => {
                let message = error.to_string();
                tracing::debug!("{remote}: {message}");

                if let Some(reason) = shared.suspicion.suspicious_error(&message) {
                    tracing::debug!("{remote} looks like it is probing ({reason}), banning");
                    shared
                        .ban_list
                        .ban(&vuln_key(remote), shared.security_limits.jail_duration);
                }
            }
            Error::ForbiddenUse(reason) => {
                tracing::debug!(
                    "{remote} is banned for {:?}: {reason}",
                    shared.security_limits.jail_duration
                );
                shared
                    .ban_list
                    .ban(&vuln_key(remote), shared.security_limits.jail_duration);
            }
            error => tracing::error!("{remote}: {error}"),
        }
    }
}

/// Runs the endpoint for a request, or picks the `404`.
///
/// Endpoint failures become a `500` with a correlation number, except limit
/// violations and socket failures, which end the connection.
async fn dispatch(shared: &Shared, request: &mut Request<'_>) -> Result<Response> {
    let Some(route) = shared
        .router
        .resolve(request.method(), request.path().isolated_path())
    else {
        tracing::trace!("no endpoint for {}", request.line().raw());
        return Ok(Response::lean(StatusCode::NotFound));
    };

    let error = match route.call(request).await {
        Ok(response) => return Ok(response),
        Err(error) => match error.downcast::<Error>() {
            Ok(error @ (Error::ForbiddenUse(_) | Error::Io(_))) => return Err(error),
            Ok(error) => anyhow::Error::from(error),
            Err(error) => error,
        },
    };

    let id = shared.correlation_id();
    tracing::error!("{id} - endpoint for {} failed: {error:?}", request.line().raw());

    Ok(Response::new(StatusCode::InternalServerError)
        .header("Content-Type", "text/plain;charset=UTF-8")
        .body(format!("Server error: {id}")))
}

/// HTTP/1.0 stays open only when asked to, HTTP/1.1 unless asked to close.
pub(crate) fn is_keep_alive(version: Version, headers: &Headers) -> bool {
    match version {
        Version::Http10 => headers.has_keep_alive(),
        Version::Http11 => !headers.has_connection_close(),
        Version::None => false,
    }
}

#[inline]
pub(crate) fn vuln_key(remote: SocketAddr) -> String {
    format!("{}_vuln_seeking", remote.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_matrix() {
        #[rustfmt::skip]
        let cases = [
            (Version::Http10, &[][..],                         false),
            (Version::Http10, &["Connection: keep-alive"][..], true),
            (Version::Http10, &["Connection: close"][..],      false),
            (Version::Http11, &[][..],                         true),
            (Version::Http11, &["Connection: keep-alive"][..], true),
            (Version::Http11, &["Connection: close"][..],      false),
            (Version::None,   &[][..],                         false),
        ];

        for (version, lines, expected) in cases {
            let headers = Headers::from_lines(lines.iter().copied());
            assert_eq!(is_keep_alive(version, &headers), expected, "{version:?} {lines:?}");
        }
    }

    #[test]
    fn ban_keys() {
        let remote: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        assert_eq!(vuln_key(remote), "10.1.2.3_vuln_seeking");
    }
}
