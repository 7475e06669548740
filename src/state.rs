use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::{
    auth::{PrincipalResolver, TokenResolver},
    config::Config,
    coordinator::Coordinator,
    store::SqliteStore,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub coordinator: Arc<Coordinator>,
    pub tokens: TokenResolver,
    pub resolver: Arc<dyn PrincipalResolver>,
}

impl AppState {
    /// Wires the SQLite store, coordinator and token resolver over one pool.
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            store,
            config.activation_policy,
        ));
        let tokens = TokenResolver::new(pool.clone(), &config.jwt_secret, config.jwt_expiration);

        Self {
            pool,
            coordinator,
            resolver: Arc::new(tokens.clone()),
            tokens,
            config,
        }
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<Coordinator> {
    fn from_ref(state: &AppState) -> Self {
        state.coordinator.clone()
    }
}

impl FromRef<AppState> for TokenResolver {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}
