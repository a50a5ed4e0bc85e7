//! Helpdesk statistics computed from cached tickets.

pub mod analytics;
pub mod business;

pub use analytics::{AnalyticsEngine, AnalyticsPolicy, NoResponsePolicy, ResponseReport, TouchCounts};
pub use business::BusinessCalendar;
