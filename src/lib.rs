// Encrypted credential envelope and store
pub mod credentials;

// Token freshness classification
pub mod freshness;

// Provider refresh flows
pub mod refresh;

// Single-flight token coordination
pub mod vault;

// Proactive refresh scheduling
pub mod scheduler;

// Operator alerting seam
pub mod alert;

// Daemon configuration
pub mod config;
