// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod csv_store;
pub mod error;
pub mod html_export;
pub mod http_response;
pub mod plotly_mapper;
pub mod postgres_repository;
pub mod timestamps;
