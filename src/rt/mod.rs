//! Client for Request Tracker's REST 1.0 interface.

pub mod api_types;
pub mod error;
pub mod fetcher;
pub mod repair;
pub mod search;
pub mod session;
pub mod types;

pub use error::FetchError;
pub use fetcher::TicketFetcher;
pub use search::TicketQueries;
pub use session::SessionClient;
pub use types::Ticket;
