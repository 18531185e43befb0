// Message model and classification
pub mod event;

// State store and snapshots
pub mod state;

// Threshold rules
pub mod rules;

// MQTT transport session
pub mod mqtt;

// Automation loop and gateway seams
pub mod engine;

// SQLite persistence
pub mod storage;

// Time-series mirror
pub mod report;

// Configuration
pub mod config;
