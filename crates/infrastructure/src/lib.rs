// Outpost - Infrastructure Layer
// Adapters behind the domain ports:
// - persistence: Postgres repositories (sqlx) and in-memory equivalents
// - messaging: NATS JetStream broker adapter and an in-memory broker fake
// - http: reqwest-based document fetcher

pub mod http;
pub mod messaging;
pub mod persistence;
