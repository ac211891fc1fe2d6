use std::io::{BufRead, Write};

use candle_core::Device;
use log::{debug, error, info, warn};

use crate::backend::{CaptionBackend, ModelHandle};
use crate::device::device_label;
use crate::error::CaptionError;
use crate::protocol::{MessageWriter, Request, Response};

/// What the loop should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Serves caption requests read line by line, one response line per unit of work.
///
/// The server owns the model handle and the output sink. Requests are handled strictly in
/// order; a failing line is reported as an `error` message and never stops the loop. The only
/// error that escapes [`CaptionServer::serve`] is a failure to read the input or to write the
/// output.
pub struct CaptionServer<B, W: Write> {
    handle: ModelHandle<B>,
    writer: MessageWriter<W>,
}

impl<B: CaptionBackend, W: Write> CaptionServer<B, W> {
    /// Create a server with an empty model handle writing to `output`.
    pub fn new(output: W) -> Self {
        Self {
            handle: ModelHandle::empty(),
            writer: MessageWriter::new(output),
        }
    }

    /// The model handle, empty until [`Self::load_backend`] succeeds.
    pub fn handle(&self) -> &ModelHandle<B> {
        &self.handle
    }

    /// Announce the device and load the backend.
    ///
    /// Emits `status` messages, then exactly one of `ready` or `error`.
    pub fn startup<F>(&mut self, device: &Device, load: F) -> Result<(), CaptionError>
    where
        F: FnOnce(&Device) -> Result<B, CaptionError>,
    {
        self.announce_device(device)?;
        self.load_backend(|| load(device))
    }

    /// Emit the `status` message naming the selected device.
    pub fn announce_device(&mut self, device: &Device) -> Result<(), CaptionError> {
        let label = device_label(device);
        info!("using device: {label}");
        self.writer
            .send(&Response::status(format!("Using device: {label}")))
    }

    /// Run the load step and report its outcome.
    ///
    /// A load failure leaves the handle empty and is reported as an `error` message; it is not
    /// returned to the caller, so the service stays up to answer `ping` and `exit`.
    pub fn load_backend<F>(&mut self, load: F) -> Result<(), CaptionError>
    where
        F: FnOnce() -> Result<B, CaptionError>,
    {
        self.writer.send(&Response::status("Loading model..."))?;

        match load() {
            Ok(backend) => {
                self.handle = ModelHandle::loaded(backend);
                info!("model loaded");
                self.writer.send(&Response::ready("Model loaded successfully"))
            }
            Err(e) => {
                self.handle = ModelHandle::empty();
                error!("failed to load model: {e}");
                self.writer
                    .send(&Response::error(format!("Failed to load model: {e}")))
            }
        }
    }

    /// Read requests until the input ends or an `exit` command arrives.
    pub fn serve<R: BufRead>(&mut self, mut input: R) -> Result<(), CaptionError> {
        let mut line = Vec::new();

        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                debug!("input closed");
                return Ok(());
            }

            if self.handle_line(&line)? == Flow::Exit {
                debug!("exit requested");
                return Ok(());
            }
        }
    }

    /// Handle a single raw input line.
    ///
    /// Parse failures are answered with an `error` message. Only output failures are returned.
    pub fn handle_line(&mut self, line: &[u8]) -> Result<Flow, CaptionError> {
        let request = std::str::from_utf8(line)
            .map_err(CaptionError::from)
            .and_then(Request::parse);

        match request {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                warn!("request error: {e}");
                self.writer
                    .send(&Response::error(format!("Request error: {e}")))?;
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Flow, CaptionError> {
        match request {
            Request::Caption { image_path } => {
                debug!("caption request for {image_path}");
                let envelope = self.handle.caption(&image_path);
                self.writer.send(&Response::Result {
                    image_path,
                    envelope,
                })?;
            }
            Request::Ping => self.writer.send(&Response::Pong)?,
            Request::Exit => return Ok(Flow::Exit),
            Request::Unrecognized(command) => {
                // no response is part of the protocol for unknown commands
                debug!("ignoring unrecognized command: {command:?}");
            }
        }

        Ok(Flow::Continue)
    }

    /// Consume the server and return the output sink.
    pub fn into_output(self) -> W {
        self.writer.into_inner()
    }
}
