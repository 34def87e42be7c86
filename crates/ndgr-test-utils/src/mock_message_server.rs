// mock_message_server: A mock HTTP server for entry/segment/backward
// endpoints.
//
// Bodies are staged per path+query; unstaged paths return 404. A "pending"
// staging serves a body that never completes, mimicking a live entry stream
// that stays open waiting for server push.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

#[derive(Clone)]
enum Staged {
    Body(Bytes),
    /// Responds 200 with a body that never finishes.
    Pending,
}

type Routes = Arc<Mutex<HashMap<String, Staged>>>;

pub struct MockMessageServer {
    addr: SocketAddr,
    routes: Routes,
    /// Background accept loop; dropped with the server.
    _task: tokio::task::JoinHandle<()>,
}

impl MockMessageServer {
    /// Start the server on a random local port.
    pub async fn start() -> Self {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let app = Router::new()
            .fallback(serve_staged)
            .with_state(Arc::clone(&routes));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock message server");
        let addr = listener.local_addr().expect("local_addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock message server");
        });
        MockMessageServer {
            addr,
            routes,
            _task: task,
        }
    }

    /// `http://127.0.0.1:<port>` — prepend to staged paths.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stage a complete body for `path_and_query` (e.g. `"/entry?at=now"`).
    /// Re-staging a path replaces its body.
    pub fn stage(&self, path_and_query: &str, body: Vec<u8>) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path_and_query.to_owned(), Staged::Body(Bytes::from(body)));
    }

    /// Stage a response whose body stays open forever.
    pub fn stage_pending(&self, path_and_query: &str) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path_and_query.to_owned(), Staged::Pending);
    }
}

async fn serve_staged(State(routes): State<Routes>, request: Request) -> Response {
    let key = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_owned(), |pq| pq.as_str().to_owned());
    let staged = routes.lock().expect("routes lock").get(&key).cloned();
    match staged {
        Some(Staged::Body(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Some(Staged::Pending) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(futures_util::stream::pending::<
                Result<Bytes, std::io::Error>,
            >()))
            .expect("pending response"),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
