use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: 'static,
    {
        self.endpoints.push(format!("GET {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: 'static,
    {
        self.endpoints.push(format!("POST {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const QUERY: &str = "/api/query";
    pub const CANCEL: &str = "/api/cancel";
    pub const CLEAR: &str = "/api/clear";
    pub const EXPORT_CSV: &str = "/api/export/csv";
    pub const HEALTH: &str = "/api/health";
    pub const OPENAPI: &str = "/api/openapi.json";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_post(paths::QUERY, api::query::query)
        .route_post(paths::CANCEL, api::session::cancel)
        .route_post(paths::CLEAR, api::session::clear)
        .route_post(paths::EXPORT_CSV, api::export::export_csv)
        .route_get(paths::HEALTH, api::meta::health)
        .route_get(paths::OPENAPI, api::meta::openapi_json);
    builder.build()
}
