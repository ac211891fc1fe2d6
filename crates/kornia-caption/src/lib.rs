#![deny(missing_docs)]
//! # Kornia Caption
//!
//! Image captioning served over a line-delimited JSON protocol.
//!
//! A host process writes one JSON command per line (`caption`, `ping` or `exit`) and reads one
//! JSON message per line back. The model is loaded once at startup; a failing request is
//! reported and never stops the service.
//!
//! # Example
//!
//! ```no_run
//! use kornia_caption::{blip::{Blip, BlipConfig}, device::select_device, server::CaptionServer};
//!
//! let device = select_device(false);
//! let mut server = CaptionServer::new(std::io::stdout().lock());
//! server.startup(&device, |device| Blip::new(BlipConfig::default(), device))?;
//! server.serve(std::io::stdin().lock())?;
//! # Ok::<(), kornia_caption::CaptionError>(())
//! ```

/// The captioning backend trait and the model handle.
pub mod backend;

/// Salesforce Blip captioning model integration.
#[allow(missing_docs)]
pub mod blip;

/// Compute device selection.
pub mod device;

/// Error types for the caption service.
pub mod error;

/// Image decoding and model input preprocessing.
#[allow(missing_docs)]
pub mod preprocessor;

/// Request and response messages of the line protocol.
pub mod protocol;

/// The request loop.
#[allow(missing_docs)]
pub mod server;

pub use crate::backend::{CaptionBackend, ModelHandle};
pub use crate::error::CaptionError;
pub use crate::protocol::{Envelope, Request, Response};
