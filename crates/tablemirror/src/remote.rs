//! Remote record source.
//!
//! The engine only sees the [`RecordSource`] trait: a paginated fetch with an
//! optional server-side filter. [`AirtableClient`] implements it over the
//! [`HttpTransport`](crate::http::HttpTransport) seam.
//!
//! # Example
//!
//! ```ignore
//! use tablemirror::remote::{AirtableClient, ApiRateLimiter, FetchRequest, RecordSource, rate_limits};
//!
//! let limiter = ApiRateLimiter::new(rate_limits::AIRTABLE_DEFAULT_RPS);
//! let client = AirtableClient::new(AIRTABLE_API_URL, "appXXXX", &token, Some(limiter))?;
//! let records = client
//!     .fetch_all(FetchRequest { dataset: "events", table_id: "tbl", view_id: "viw", filter: None }, None)
//!     .await?;
//! ```

mod airtable;
mod errors;
mod rate_limit;
mod types;

pub use airtable::{AIRTABLE_API_URL, AirtableClient};
pub use errors::{RemoteError, Result, classify_error_response, short_error_message};
pub use rate_limit::{ApiRateLimiter, rate_limits};
pub use types::{
    Attachment, FetchRequest, Record, RecordPage, RecordSource, is_attachment_list,
    parse_attachments,
};
