pub mod terminology;
pub mod rollup;
pub mod batch;
pub mod scheduler; // Debounced pass triggering
pub mod ingress; // Queue trigger messages
