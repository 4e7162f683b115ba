//! Upstream session and queue collection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      PollLoop                            │
//! │  ┌────────────────────┐      ┌────────────────────────┐  │
//! │  │   SessionManager   │      │      QueueFetcher      │  │
//! │  │  - sign-on         │      │  - one query per cycle │  │
//! │  │  - invalidate      │      │  - raw body or error   │  │
//! │  │  - sign-out        │      └───────────┬────────────┘  │
//! │  └─────────┬──────────┘                  │               │
//! │            └──────────────┬──────────────┘               │
//! │                    ┌──────▼──────┐                       │
//! │                    │ ControlApi  │ (trait)               │
//! │                    └──────┬──────┘                       │
//! └───────────────────────────┼──────────────────────────────┘
//!                  ┌──────────┴──────────┐
//!           ┌──────▼──────┐       ┌──────▼──────┐
//!           │   RestApi   │       │   MockApi   │
//!           │ (reqwest)   │       │ (Testing)   │
//!           └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use cdexporter_core::collector::{QueueFetcher, RestApi, SessionManager};
//! use cdexporter_core::config::{Credentials, PollConfig};
//!
//! let config = PollConfig::new(
//!     "https://cdws.local:9443",
//!     Credentials { user: "admin".into(), password: "secret".into() },
//!     "10.0.0.5",
//! );
//! let api = RestApi::new(&config).unwrap();
//! let mut sessions = SessionManager::new();
//! let session = sessions.ensure(&api).unwrap();
//! let body = QueueFetcher::fetch(&api, session).unwrap();
//! println!("{body}");
//! ```

mod fetch;
pub mod mock;
mod rest;
mod session;
pub mod traits;

pub use fetch::{FetchError, QueueFetcher};
pub use mock::{MockApi, RecordingSink};
pub use rest::RestApi;
pub use session::{
    AuthError, INITIAL_XSRF_TOKEN, Session, SessionManager, SignOutError, basic_credential,
};
pub use traits::ControlApi;
