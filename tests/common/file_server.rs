//! Minimal HTTP server publishing sequence files for remote acquisition tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

enum Route {
    File(String),
    Redirect(String),
}

/// Serves files and redirects until dropped. Every response closes the connection.
pub struct FileServer {
    pub base_url: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct FileServerBuilder {
    routes: HashMap<String, Route>,
}

impl FileServerBuilder {
    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.routes
            .insert(path.to_string(), Route::File(contents.to_string()));
        self
    }

    pub fn redirect(mut self, path: &str, location: &str) -> Self {
        self.routes
            .insert(path.to_string(), Route::Redirect(location.to_string()));
        self
    }

    pub async fn spawn(self) -> FileServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let routes = Arc::new(self.routes);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &routes).await;
                });
            }
        });

        FileServer {
            base_url: format!("http://{}", addr),
            handle,
        }
    }
}

impl FileServer {
    pub fn builder() -> FileServerBuilder {
        FileServerBuilder::default()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: &HashMap<String, Route>) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let request = String::from_utf8_lossy(&request);
    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("");

    let response = match routes.get(path) {
        Some(Route::File(contents)) => {
            let body = if method == "HEAD" { "" } else { contents.as_str() };
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                contents.len(),
                body
            )
        }
        Some(Route::Redirect(location)) => format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            location
        ),
        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
    };
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
