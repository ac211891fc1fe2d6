use std::io::Write;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::CaptionError;

/// A command read from one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Generate a caption for the image at `image_path`.
    ///
    /// The path is kept as the raw JSON value so it can be echoed back as-is,
    /// `Value::Null` when the field is absent.
    Caption {
        /// The raw `image_path` field of the request.
        image_path: Value,
    },
    /// Liveness probe.
    Ping,
    /// Stop serving.
    Exit,
    /// Any other `command`, or none at all. Ignored by the server.
    Unrecognized(Option<Value>),
}

impl Request {
    /// Parse a request from a single input line.
    ///
    /// Surrounding whitespace is stripped. Fails if the line is not valid JSON or
    /// is not a JSON object; an unknown or missing `command` is not an error.
    pub fn parse(line: &str) -> Result<Self, CaptionError> {
        let value: Value = serde_json::from_str(line.trim())?;
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Err(CaptionError::InvalidRequest(other.to_string())),
        };

        let command = fields
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let request = match command.as_deref() {
            Some("caption") => Request::Caption {
                image_path: fields.remove("image_path").unwrap_or(Value::Null),
            },
            Some("ping") => Request::Ping,
            Some("exit") => Request::Exit,
            _ => Request::Unrecognized(fields.remove("command")),
        };

        Ok(request)
    }
}

/// The outcome of a single caption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The model produced a caption.
    Success {
        /// The generated text.
        caption: String,
    },
    /// Something failed between opening the image and decoding the tokens.
    Failure {
        /// A description of the failure.
        error: String,
    },
}

impl Envelope {
    /// Whether the caption attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }
}

impl From<Result<String, CaptionError>> for Envelope {
    fn from(result: Result<String, CaptionError>) -> Self {
        match result {
            Ok(caption) => Envelope::Success { caption },
            Err(e) => Envelope::Failure {
                error: e.to_string(),
            },
        }
    }
}

/// A message written as one line of output, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Informational text emitted during startup.
    Status {
        /// The text.
        message: String,
    },
    /// The model is loaded and the service is usable.
    Ready {
        /// The text.
        message: String,
    },
    /// A model load failure or a failure handling one input line.
    Error {
        /// A description of the failure.
        message: String,
    },
    /// The outcome of a `caption` command.
    Result {
        /// The `image_path` of the request, echoed verbatim.
        image_path: Value,
        /// The caption or the failure.
        envelope: Envelope,
    },
    /// Reply to a `ping` command.
    Pong,
}

impl Response {
    /// Create a `status` message.
    pub fn status(message: impl Into<String>) -> Self {
        Response::Status {
            message: message.into(),
        }
    }

    /// Create a `ready` message.
    pub fn ready(message: impl Into<String>) -> Self {
        Response::Ready {
            message: message.into(),
        }
    }

    /// Create an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// The value of the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Status { .. } => "status",
            Response::Ready { .. } => "ready",
            Response::Error { .. } => "error",
            Response::Result { .. } => "result",
            Response::Pong => "pong",
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind())?;

        match self {
            Response::Status { message }
            | Response::Ready { message }
            | Response::Error { message } => {
                map.serialize_entry("message", message)?;
            }
            Response::Result {
                image_path,
                envelope,
            } => {
                map.serialize_entry("image_path", image_path)?;
                match envelope {
                    Envelope::Success { caption } => {
                        map.serialize_entry("success", &true)?;
                        map.serialize_entry("caption", caption)?;
                    }
                    Envelope::Failure { error } => {
                        map.serialize_entry("success", &false)?;
                        map.serialize_entry("error", error)?;
                    }
                }
            }
            Response::Pong => {}
        }

        map.end()
    }
}

/// Writes responses as newline-delimited JSON, flushing after every message.
pub struct MessageWriter<W: Write> {
    inner: W,
}

impl<W: Write> MessageWriter<W> {
    /// Wrap a writer, typically the process stdout.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one response as a single line and flush it.
    pub fn send(&mut self, response: &Response) -> Result<(), CaptionError> {
        serde_json::to_writer(&mut self.inner, response)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        log::debug!("sent {} message", response.kind());
        Ok(())
    }

    /// Consume the writer and return the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode(response: &Response) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn parse_known_commands() {
        assert_eq!(Request::parse(r#"{"command":"ping"}"#).unwrap(), Request::Ping);
        assert_eq!(
            Request::parse("  {\"command\": \"exit\"}\n").unwrap(),
            Request::Exit
        );
        assert_eq!(
            Request::parse(r#"{"command":"caption","image_path":"/tmp/a.png"}"#).unwrap(),
            Request::Caption {
                image_path: json!("/tmp/a.png")
            }
        );
    }

    #[test]
    fn parse_caption_without_path_keeps_null() {
        assert_eq!(
            Request::parse(r#"{"command":"caption"}"#).unwrap(),
            Request::Caption {
                image_path: Value::Null
            }
        );
        assert_eq!(
            Request::parse(r#"{"command":"caption","image_path":7}"#).unwrap(),
            Request::Caption {
                image_path: json!(7)
            }
        );
    }

    #[test]
    fn parse_unrecognized_commands() {
        assert_eq!(
            Request::parse(r#"{"command":"resize"}"#).unwrap(),
            Request::Unrecognized(Some(json!("resize")))
        );
        assert_eq!(
            Request::parse(r#"{"image_path":"a.png"}"#).unwrap(),
            Request::Unrecognized(None)
        );
        assert_eq!(
            Request::parse(r#"{"command":42}"#).unwrap(),
            Request::Unrecognized(Some(json!(42)))
        );
    }

    #[test]
    fn parse_rejects_invalid_lines() {
        assert!(matches!(
            Request::parse("{not json"),
            Err(CaptionError::SerializationError(_))
        ));
        assert!(matches!(
            Request::parse(""),
            Err(CaptionError::SerializationError(_))
        ));
        assert!(matches!(
            Request::parse("[1, 2]"),
            Err(CaptionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn encode_messages() {
        assert_eq!(encode(&Response::Pong), json!({"type": "pong"}));
        assert_eq!(
            encode(&Response::status("Loading model...")),
            json!({"type": "status", "message": "Loading model..."})
        );
        assert_eq!(
            encode(&Response::error("boom")),
            json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn encode_result_merges_envelope() {
        let ok = Response::Result {
            image_path: json!("cat.png"),
            envelope: Envelope::Success {
                caption: "a cat".to_string(),
            },
        };
        assert_eq!(
            encode(&ok),
            json!({"type": "result", "image_path": "cat.png", "success": true, "caption": "a cat"})
        );

        let failed = Response::Result {
            image_path: Value::Null,
            envelope: Envelope::Failure {
                error: "Missing image_path".to_string(),
            },
        };
        assert_eq!(
            encode(&failed),
            json!({"type": "result", "image_path": null, "success": false, "error": "Missing image_path"})
        );
    }

    #[test]
    fn writer_emits_one_line_per_message() {
        let mut writer = MessageWriter::new(Vec::new());
        writer.send(&Response::Pong).unwrap();
        writer.send(&Response::ready("ok")).unwrap();

        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec![r#"{"type":"pong"}"#, r#"{"type":"ready","message":"ok"}"#]);
    }
}
