//! Notification Service - stores and lists per-user notifications.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
