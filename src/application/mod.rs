// Application layer - Use cases over the domain, storage behind traits
pub mod controller;
pub mod figure_service;
pub mod manual_event_store;
pub mod navigation_service;
pub mod pipeline_service;
pub mod sensor_repository;
pub mod session_loader;
pub mod tagging_service;
pub mod upload_service;
