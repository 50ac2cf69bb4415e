// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL connection pool.
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype injected into
//! the `postgres_*` repository implementations when `BrokerConfig::storage`
//! selects the `postgres` backend; the `in_memory` backend never touches
//! this module.

use sqlx::postgres::{PgPool, PgPoolOptions};
use anyhow::Result;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
            
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
