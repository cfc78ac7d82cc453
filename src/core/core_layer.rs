// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "auth/auth_service.rs"]
pub mod auth;

#[path = "monitor/refresh_monitor.rs"]
pub mod monitor;
