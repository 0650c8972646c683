// Domain layer - Pure types and rules, no I/O
pub mod anomaly;
pub mod event;
pub mod figure;
pub mod machine;
pub mod pipeline;
pub mod session;
pub mod telemetry;
