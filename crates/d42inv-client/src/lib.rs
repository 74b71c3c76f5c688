//! d42inv-client: Device42 HTTP client
//!
//! Runs DOQL queries (CSV or JSON), walks paginated bulk listings and looks
//! up stored passwords. [`HttpClient`] implements
//! [`d42inv_core::RecordSource`], so it can feed the inventory collector
//! directly.
//!
//! # Examples
//!
//! ```no_run
//! use d42inv_client::{ClientOptions, Credentials, DoqlFormat, HttpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(
//!     "https://d42.example.com",
//!     Credentials::new("admin", "secret"),
//!     &ClientOptions::default(),
//! )?;
//!
//! let rows = client
//!     .doql("SELECT device_pk, name FROM view_device_v2", DoqlFormat::Csv)
//!     .await?;
//! println!("{} devices", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod error;
pub mod http;

pub use decode::DoqlFormat;
pub use error::{ClientError, Result};
pub use http::{ClientOptions, Credentials, HttpClient};
