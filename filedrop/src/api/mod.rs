//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response bodies
//!
//! # Routes
//!
//! - `GET /`: HTML upload form
//! - `POST /upload`: Upload one file (single mode) or several (multi mode)
//! - `GET /uploads/{key}`: Retrieve a stored file
//!
//! All endpoints are documented with `utoipa`; the document is served at
//! `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;
