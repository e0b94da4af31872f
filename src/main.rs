use hearth_web::{config::Config, Body, Endpoint, Method, Request, Response, Server, StatusCode};
use tracing_subscriber::EnvFilter;

struct Hello;

impl Endpoint for Hello {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        let name = match request.path().query().get("name") {
            Some(name) => name.as_str(),
            None => "world",
        };
        Ok(Response::html_ok(format!("<p>Hello, {name}!</p>")))
    }
}

/// Answers with every field of a posted form.
struct Echo;

impl Endpoint for Echo {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        let mut text = String::new();
        match request.body().await? {
            Body::None => text += "no body\n",
            Body::Unrecognized(raw) => text += &format!("{} unrecognized bytes\n", raw.len()),
            Body::FormUrlEncoded(fields) => {
                let mut fields: Vec<_> = fields.into_iter().collect();
                fields.sort();
                for (key, value) in fields {
                    text += &format!("{key} = {}\n", String::from_utf8_lossy(&value));
                }
            }
            Body::Multipart(partitions) => {
                for partition in partitions {
                    let name = partition.content_disposition().name();
                    text += &format!("{name} = {}\n", String::from_utf8_lossy(partition.content()));
                }
            }
        }

        Ok(Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain; charset=UTF-8")
            .body(text))
    }
}

/// Counts uploaded bytes per partition without holding them in memory.
struct Upload;

impl Endpoint for Upload {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        let mut report = String::new();
        let mut parts = request.multipart()?;

        while let Some(mut part) = parts.next_partition().await? {
            let name = part.content_disposition().name().to_string();
            let filename = part.content_disposition().filename().to_string();

            let mut size = 0;
            let mut chunk = [0u8; 8192];
            loop {
                match part.read_chunk(&mut chunk).await? {
                    0 => break,
                    read => size += read,
                }
            }

            tracing::info!("received {size} bytes for {name:?} ({filename:?})");
            report += &format!("{name} {filename} {size}\n");
        }

        Ok(Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain; charset=UTF-8")
            .body(report))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_level(true)
        .init();

    let config = Config::load()?;

    let server = Server::builder()
        .listener(Server::bind(config.listen)?)
        .config(&config)
        .route(Method::Get, "", Hello)
        .route(Method::Get, "hello", Hello)
        .route(Method::Post, "echo", Echo)
        .route(Method::Post, "upload", Upload)
        .build();
    tracing::info!("listening on {}", server.local_addr()?);

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            handle.shutdown().await;
        }
    });

    server.launch().await;
    tracing::info!("stopped");
    Ok(())
}
