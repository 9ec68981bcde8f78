mod http_server;

pub use http_server::{
    router, AppState, HealthResponse, HttpServer, UpstreamsResponse, UPSTREAM_ORIGIN_HEADER,
};
